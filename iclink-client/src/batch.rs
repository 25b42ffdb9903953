//! Attribute registration batching
//!
//! The controller rejects registration requests naming too many attributes.
//! After every (re)connect the union of all consumers' interests is flattened
//! into (object, attribute) pairs and cut into chunks of at most `batch_size`
//! pairs; each chunk becomes one `RequestParamList` request.
//!
//! Interest maps are ordered, so the same subscriptions always produce the
//! same chunks.
//!
//! # Examples
//!
//! ```rust
//! use iclink_client::SubscriptionBatcher;
//! use std::collections::{BTreeMap, BTreeSet};
//!
//! let mut interest = BTreeMap::new();
//! interest.insert(
//!     "C0001".to_string(),
//!     ["STATUS", "LISTORD"].iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
//! );
//!
//! let chunks = SubscriptionBatcher::new(1).plan(&interest);
//! assert_eq!(chunks.len(), 2);
//! ```

use iclink_core::{types::query_params, AttributeQuery, Params};
use std::collections::{BTreeMap, BTreeSet};

/// Object name to attribute names
pub type Interest = BTreeMap<String, BTreeSet<String>>;

/// One registration request worth of attribute queries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationChunk {
    queries: Vec<AttributeQuery>,
    pairs: usize,
}

impl RegistrationChunk {
    /// Queries in this chunk, one per object
    pub fn queries(&self) -> &[AttributeQuery] {
        &self.queries
    }

    /// Number of (object, attribute) pairs
    pub fn pairs(&self) -> usize {
        self.pairs
    }

    /// Request parameters for this chunk
    pub fn params(&self) -> Params {
        query_params(&self.queries)
    }

    fn push(&mut self, objnam: &str, attribute: &str) {
        match self.queries.last_mut() {
            Some(query) if query.objnam == objnam => query.keys.push(attribute.to_string()),
            _ => self.queries.push(AttributeQuery {
                objnam: objnam.to_string(),
                keys: vec![attribute.to_string()],
            }),
        }
        self.pairs += 1;
    }
}

/// Splits interest into size-bounded registration chunks
#[derive(Debug, Clone, Copy)]
pub struct SubscriptionBatcher {
    batch_size: usize,
}

impl SubscriptionBatcher {
    /// Batcher producing chunks of at most `batch_size` pairs
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    /// Maximum pairs per chunk
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Cut `interest` into chunks
    pub fn plan(&self, interest: &Interest) -> Vec<RegistrationChunk> {
        let mut chunks = Vec::new();
        let mut current = RegistrationChunk {
            queries: Vec::new(),
            pairs: 0,
        };

        for (objnam, attributes) in interest {
            for attribute in attributes {
                if current.pairs == self.batch_size {
                    chunks.push(std::mem::replace(
                        &mut current,
                        RegistrationChunk {
                            queries: Vec::new(),
                            pairs: 0,
                        },
                    ));
                }
                current.push(objnam, attribute);
            }
        }

        if current.pairs > 0 {
            chunks.push(current);
        }
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interest(objects: &[(&str, &[&str])]) -> Interest {
        objects
            .iter()
            .map(|(objnam, keys)| {
                (
                    objnam.to_string(),
                    keys.iter().map(|k| k.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_empty_interest_plans_nothing() {
        assert!(SubscriptionBatcher::new(50).plan(&Interest::new()).is_empty());
    }

    #[test]
    fn test_chunk_sizes_137_pairs() {
        let mut map = Interest::new();
        for n in 0..137 {
            map.entry(format!("C{:04}", n / 10))
                .or_default()
                .insert(format!("ATTR{}", n % 10));
        }

        let chunks = SubscriptionBatcher::new(50).plan(&map);
        let sizes: Vec<usize> = chunks.iter().map(RegistrationChunk::pairs).collect();
        assert_eq!(sizes, vec![50, 50, 37]);

        let keys: usize = chunks
            .iter()
            .flat_map(|c| c.queries())
            .map(|q| q.keys.len())
            .sum();
        assert_eq!(keys, 137);
    }

    #[test]
    fn test_object_split_across_chunks() {
        let map = interest(&[("B1101", &["A", "B", "C"]), ("B1202", &["D"])]);
        let chunks = SubscriptionBatcher::new(2).plan(&map);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].queries().len(), 1);
        assert_eq!(chunks[0].queries()[0].keys, vec!["A", "B"]);
        assert_eq!(chunks[1].queries()[0].objnam, "B1101");
        assert_eq!(chunks[1].queries()[0].keys, vec!["C"]);
        assert_eq!(chunks[1].queries()[1].objnam, "B1202");
    }

    #[test]
    fn test_chunk_params_shape() {
        let map = interest(&[("C0003", &["STATUS"])]);
        let chunks = SubscriptionBatcher::new(50).plan(&map);
        let params = chunks[0].params();
        assert_eq!(params["condition"], "");
        assert_eq!(params["objectList"][0]["objnam"], "C0003");
        assert_eq!(params["objectList"][0]["keys"][0], "STATUS");
    }

    #[test]
    fn test_zero_batch_size_clamped() {
        assert_eq!(SubscriptionBatcher::new(0).batch_size(), 1);
    }
}
