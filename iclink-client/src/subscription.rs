//! Consumer registrations
//!
//! Each consumer names one object and the attributes it cares about. The
//! registry answers two questions: which consumers an update concerns, and
//! the union of all interests (what must be registered with the controller).

use crate::batch::Interest;
use iclink_core::ObjectUpdate;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Receiver of attribute updates for one object
///
/// Called on the coordinator task; implementations should return quickly and
/// hand heavy work to their own task.
pub trait UpdateConsumer: Send + Sync {
    /// New values for some of the subscribed attributes
    fn on_update(&self, update: &ObjectUpdate);
}

impl<F> UpdateConsumer for F
where
    F: Fn(&ObjectUpdate) + Send + Sync,
{
    fn on_update(&self, update: &ObjectUpdate) {
        self(update)
    }
}

/// Identifies one registration; pass it to `unsubscribe`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    objnam: String,
}

impl SubscriptionHandle {
    /// Object this registration watches
    pub fn objnam(&self) -> &str {
        &self.objnam
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.objnam, self.id)
    }
}

struct Registration {
    id: u64,
    attributes: BTreeSet<String>,
    consumer: Arc<dyn UpdateConsumer>,
}

/// Registration table keyed by object
#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    next_id: u64,
    by_object: HashMap<String, Vec<Registration>>,
}

impl SubscriptionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(
        &mut self,
        objnam: String,
        attributes: BTreeSet<String>,
        consumer: Arc<dyn UpdateConsumer>,
    ) -> SubscriptionHandle {
        self.next_id += 1;
        let id = self.next_id;
        self.by_object
            .entry(objnam.clone())
            .or_default()
            .push(Registration {
                id,
                attributes,
                consumer,
            });
        SubscriptionHandle { id, objnam }
    }

    pub(crate) fn remove(&mut self, handle: &SubscriptionHandle) -> bool {
        let Some(registrations) = self.by_object.get_mut(&handle.objnam) else {
            return false;
        };
        let before = registrations.len();
        registrations.retain(|r| r.id != handle.id);
        let removed = registrations.len() != before;
        if registrations.is_empty() {
            self.by_object.remove(&handle.objnam);
        }
        removed
    }

    /// Consumers whose attributes intersect the ones carried by `update`
    pub(crate) fn interested(&self, update: &ObjectUpdate) -> Vec<Arc<dyn UpdateConsumer>> {
        self.by_object
            .get(&update.objnam)
            .map(|registrations| {
                registrations
                    .iter()
                    .filter(|r| update.attribute_names().any(|name| r.attributes.contains(name)))
                    .map(|r| Arc::clone(&r.consumer))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Union of every registration's attributes, per object
    pub(crate) fn interest(&self) -> Interest {
        let mut interest = Interest::new();
        for (objnam, registrations) in &self.by_object {
            let attributes = interest.entry(objnam.clone()).or_default();
            for registration in registrations {
                attributes.extend(registration.attributes.iter().cloned());
            }
        }
        interest.retain(|_, attributes| !attributes.is_empty());
        interest
    }

    pub(crate) fn len(&self) -> usize {
        self.by_object.values().map(Vec::len).sum()
    }
}
