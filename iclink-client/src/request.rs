//! Request tracking and flow control
//!
//! The controller processes one request at a time, so the tracker holds every
//! outbound request in a FIFO queue and releases the next one only when the
//! in-flight slot is free.
//!
//! # Request Lifecycle
//!
//! 1. **Enqueue**: assign the next identifier, record creation time
//! 2. **Reserve**: `next_to_send` pops the queue head and takes the slot in
//!    the same call, so no other request can be released in between
//! 3. **Write**: the coordinator writes the returned request to the transport
//! 4. **Resolve**: a response with the in-flight identifier frees the slot;
//!    the deadlock timeout frees it if no such response arrives
//!
//! The tracker is owned by the coordinator task and mutated through `&mut
//! self` only. The slot check and the reservation cannot be separated by an
//! await point.
//!
//! # Identifier mismatch
//!
//! The controller sometimes answers a failed request with an unrelated
//! `messageID`. Such a response does not free the slot; the stuck request is
//! failed by the deadlock timeout instead.

use iclink_core::{Params, Request, Response, Result};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Who receives the outcome of a request
pub(crate) enum Completion {
    /// A caller of `send_request` awaiting the response
    Caller(oneshot::Sender<Result<Response>>),
    /// Sent without waiting for a response
    Detached,
    /// Session handshake
    Handshake,
    /// Keepalive probe
    Keepalive,
    /// One chunk of attribute registration
    Registration { pairs: usize },
}

impl Completion {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Completion::Caller(_) => "caller",
            Completion::Detached => "detached",
            Completion::Handshake => "handshake",
            Completion::Keepalive => "keepalive",
            Completion::Registration { .. } => "registration",
        }
    }

    /// Whether the request belongs to a single session and is worthless
    /// after it ends
    pub(crate) fn is_session_bound(&self) -> bool {
        matches!(
            self,
            Completion::Handshake | Completion::Keepalive | Completion::Registration { .. }
        )
    }

    fn is_abandoned(&self) -> bool {
        matches!(self, Completion::Caller(tx) if tx.is_closed())
    }
}

/// Request waiting in the queue or on the wire
pub(crate) struct PendingRequest {
    pub(crate) request: Request,
    pub(crate) created: Instant,
    pub(crate) completion: Completion,
}

impl PendingRequest {
    pub(crate) fn command(&self) -> &str {
        &self.request.command
    }
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    id: u64,
    sent_at: Instant,
}

/// One-in-flight request queue
pub(crate) struct RequestTracker {
    next_id: u64,
    queue: VecDeque<u64>,
    pending: HashMap<u64, PendingRequest>,
    in_flight: Option<InFlight>,
    deadlock_timeout: Duration,
    max_age: Duration,
}

impl RequestTracker {
    pub(crate) fn new(deadlock_timeout: Duration, max_age: Duration) -> Self {
        Self {
            next_id: 1,
            queue: VecDeque::new(),
            pending: HashMap::new(),
            in_flight: None,
            deadlock_timeout,
            max_age,
        }
    }

    /// Append a request to the queue
    pub(crate) fn enqueue(
        &mut self,
        command: &str,
        params: Params,
        completion: Completion,
        now: Instant,
    ) -> u64 {
        let id = self.insert(command, params, completion, now);
        self.queue.push_back(id);
        id
    }

    /// Put a request at the head of the queue
    pub(crate) fn enqueue_front(
        &mut self,
        command: &str,
        params: Params,
        completion: Completion,
        now: Instant,
    ) -> u64 {
        let id = self.insert(command, params, completion, now);
        self.queue.push_front(id);
        id
    }

    fn insert(&mut self, command: &str, params: Params, completion: Completion, now: Instant) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert(
            id,
            PendingRequest {
                request: Request::new(id, command, params),
                created: now,
                completion,
            },
        );
        id
    }

    /// Reserve the slot for the queue head and return its request
    ///
    /// Returns `None` when a request is already in flight or nothing is
    /// queued. Requests whose caller has gone away are dropped here.
    pub(crate) fn next_to_send(&mut self, now: Instant) -> Option<Request> {
        if self.in_flight.is_some() {
            return None;
        }
        while let Some(id) = self.queue.pop_front() {
            let Some(entry) = self.pending.get(&id) else {
                continue;
            };
            if entry.completion.is_abandoned() {
                tracing::debug!(id, command = %entry.request.command, "Dropping request abandoned by caller");
                self.pending.remove(&id);
                continue;
            }
            self.in_flight = Some(InFlight { id, sent_at: now });
            return Some(entry.request.clone());
        }
        None
    }

    /// Resolve the in-flight request if `response` answers it
    ///
    /// Returns the entry and its round-trip time. A response for any other
    /// identifier leaves the slot occupied.
    pub(crate) fn complete(&mut self, response: &Response, now: Instant) -> Option<(PendingRequest, Duration)> {
        let in_flight = self.in_flight?;
        if response.id() != Some(in_flight.id) {
            return None;
        }
        self.in_flight = None;
        let entry = self.pending.remove(&in_flight.id)?;
        Some((entry, now.saturating_duration_since(in_flight.sent_at)))
    }

    /// Free the slot and hand back whatever occupied it
    pub(crate) fn fail_in_flight(&mut self) -> Option<PendingRequest> {
        let in_flight = self.in_flight.take()?;
        self.pending.remove(&in_flight.id)
    }

    /// When the in-flight request will be declared stuck
    pub(crate) fn deadlock_deadline(&self) -> Option<Instant> {
        self.in_flight
            .map(|in_flight| in_flight.sent_at + self.deadlock_timeout)
    }

    /// Remove queued requests older than the maximum age
    ///
    /// The in-flight request is left to the deadlock timeout.
    pub(crate) fn sweep(&mut self, now: Instant) -> Vec<PendingRequest> {
        let in_flight = self.in_flight.map(|f| f.id);
        let max_age = self.max_age;
        let expired: Vec<u64> = self
            .pending
            .iter()
            .filter(|(id, entry)| {
                Some(**id) != in_flight && now.saturating_duration_since(entry.created) >= max_age
            })
            .map(|(id, _)| *id)
            .collect();
        self.remove_all(&expired)
    }

    /// Clear state tied to a session that just ended
    ///
    /// Returns the in-flight request, every session-bound request and, unless
    /// `keep_queued` is set, every queued caller request.
    pub(crate) fn reset_session(&mut self, keep_queued: bool) -> Vec<PendingRequest> {
        let in_flight = self.in_flight.take().map(|f| f.id);
        let doomed: Vec<u64> = self
            .pending
            .iter()
            .filter(|(id, entry)| {
                Some(**id) == in_flight || !keep_queued || entry.completion.is_session_bound()
            })
            .map(|(id, _)| *id)
            .collect();
        self.remove_all(&doomed)
    }

    /// Remove every request
    pub(crate) fn drain(&mut self) -> Vec<PendingRequest> {
        self.in_flight = None;
        self.queue.clear();
        let mut entries: Vec<PendingRequest> = self.pending.drain().map(|(_, entry)| entry).collect();
        entries.sort_by_key(|entry| entry.created);
        entries
    }

    fn remove_all(&mut self, ids: &[u64]) -> Vec<PendingRequest> {
        if ids.is_empty() {
            return Vec::new();
        }
        self.queue.retain(|id| !ids.contains(id));
        let mut removed: Vec<(u64, PendingRequest)> = ids
            .iter()
            .filter_map(|id| self.pending.remove(id).map(|entry| (*id, entry)))
            .collect();
        removed.sort_by_key(|(id, _)| *id);
        removed.into_iter().map(|(_, entry)| entry).collect()
    }

    #[cfg(test)]
    pub(crate) fn has_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub(crate) fn queued(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}
