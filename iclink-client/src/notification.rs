//! Update dispatch and availability publication
//!
//! Push notifications and registration responses both carry a list of
//! changed objects. The dispatcher hands each changed object to the
//! consumers registered for it, skipping consumers none of whose attributes
//! changed.
//!
//! Availability transitions go through the [`AvailabilityDebouncer`] and are
//! published to listeners and to a `watch` channel.
//!
//! # Examples
//!
//! ```rust,no_run
//! use iclink_client::Coordinator;
//!
//! # async fn example(coordinator: &Coordinator) -> iclink_core::Result<()> {
//! let handle = coordinator
//!     .subscribe("C0001", ["STATUS"], |update: &iclink_core::ObjectUpdate| {
//!         println!("{} is now {:?}", update.objnam, update.params.get("STATUS"));
//!     })
//!     .await?;
//!
//! coordinator.on_availability_changed(|available| {
//!     println!("controller available: {}", available);
//! });
//!
//! coordinator.unsubscribe(&handle).await?;
//! # Ok(())
//! # }
//! ```

use crate::availability::AvailabilityDebouncer;
use crate::batch::Interest;
use crate::subscription::{SubscriptionHandle, SubscriptionRegistry, UpdateConsumer};
use iclink_core::ObjectUpdate;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;

/// Callback invoked with each published availability value
pub type AvailabilityListener = Arc<dyn Fn(bool) + Send + Sync>;

/// Fan-out of updates and availability to consumers
pub(crate) struct UpdateDispatcher {
    registry: SubscriptionRegistry,
    debouncer: AvailabilityDebouncer,
    listeners: Vec<AvailabilityListener>,
    available: watch::Sender<bool>,
}

impl UpdateDispatcher {
    pub(crate) fn new(debouncer: AvailabilityDebouncer) -> (Self, watch::Receiver<bool>) {
        let (available, rx) = watch::channel(debouncer.is_available());
        (
            Self {
                registry: SubscriptionRegistry::new(),
                debouncer,
                listeners: Vec::new(),
                available,
            },
            rx,
        )
    }

    pub(crate) fn subscribe(
        &mut self,
        objnam: String,
        attributes: BTreeSet<String>,
        consumer: Arc<dyn UpdateConsumer>,
    ) -> SubscriptionHandle {
        let handle = self.registry.insert(objnam, attributes, consumer);
        tracing::debug!(handle = %handle, consumers = self.registry.len(), "Consumer subscribed");
        handle
    }

    pub(crate) fn unsubscribe(&mut self, handle: &SubscriptionHandle) -> bool {
        let removed = self.registry.remove(handle);
        if removed {
            tracing::debug!(handle = %handle, consumers = self.registry.len(), "Consumer unsubscribed");
        }
        removed
    }

    pub(crate) fn interest(&self) -> Interest {
        self.registry.interest()
    }

    /// Deliver updates; returns the number of consumer invocations
    pub(crate) fn dispatch(&self, updates: &[ObjectUpdate]) -> usize {
        let mut invoked = 0;
        for update in updates {
            let consumers = self.registry.interested(update);
            if consumers.is_empty() {
                tracing::trace!(objnam = %update.objnam, "No consumer for update");
                continue;
            }
            for consumer in consumers {
                consumer.on_update(update);
                invoked += 1;
            }
        }
        invoked
    }

    pub(crate) fn add_listener(&mut self, listener: AvailabilityListener) {
        self.listeners.push(listener);
    }

    #[cfg(test)]
    pub(crate) fn is_available(&self) -> bool {
        self.debouncer.is_available()
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.debouncer.deadline()
    }

    pub(crate) fn connected(&mut self) {
        let change = self.debouncer.connected();
        self.publish(change);
    }

    pub(crate) fn connection_lost(&mut self, now: Instant) {
        self.debouncer.connection_lost(now);
        if let Some(at) = self.debouncer.deadline() {
            tracing::debug!(
                grace_secs = at.saturating_duration_since(now).as_secs(),
                "Availability loss pending"
            );
        }
    }

    pub(crate) fn poll(&mut self, now: Instant) {
        let change = self.debouncer.poll(now);
        self.publish(change);
    }

    pub(crate) fn force_unavailable(&mut self) {
        let change = self.debouncer.force_unavailable();
        self.publish(change);
    }

    fn publish(&mut self, change: Option<bool>) {
        let Some(available) = change else {
            return;
        };
        tracing::info!(available, "Availability changed");
        self.available.send_replace(available);
        for listener in &self.listeners {
            listener(available);
        }
    }
}
