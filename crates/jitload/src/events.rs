//! N+1 observability.
//!
//! The event bus is a pure side channel: it reports that an association or
//! aggregate was resolved one-record-at-a-time for a record that was known
//! to belong to a batch. Consumers (logging, test assertions, metrics)
//! subscribe externally; jitload only guarantees the firing conditions,
//! not delivery.

use jitload_core::Value;
use std::sync::{Mutex, PoisonError};

/// A missed batching opportunity.
#[derive(Debug, Clone, PartialEq)]
pub struct NPlusOneEvent {
    /// Entity type of the record that triggered the access.
    pub entity: &'static str,

    /// Primary key of that record.
    pub key: Value,

    /// The association that was resolved without batching. Aggregate
    /// resolutions append the function, e.g. `"addresses.count"`.
    pub association: String,
}

type Subscriber = Box<dyn Fn(&NPlusOneEvent) + Send + Sync>;

/// Publishes [`NPlusOneEvent`]s to registered subscribers.
///
/// Every publish is also logged under the `jitload::n1` tracing target,
/// so detection works out of the box without a subscriber.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl EventBus {
    /// Create an event bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber.
    pub fn subscribe(&self, subscriber: impl Fn(&NPlusOneEvent) + Send + Sync + 'static) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(subscriber));
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: &NPlusOneEvent) {
        tracing::warn!(
            target: "jitload::n1",
            entity = event.entity,
            key = %event.key,
            association = %event.association,
            "N+1 query detected; the access was resolved per-record"
        );

        let subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for subscriber in subscribers.iter() {
            subscriber(event);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self
            .subscribers
            .lock()
            .map_or(0, |subscribers| subscribers.len());
        f.debug_struct("EventBus")
            .field("subscribers", &count)
            .finish()
    }
}
