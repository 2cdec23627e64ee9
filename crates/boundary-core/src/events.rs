//! Synchronous, best-effort lifecycle event bus.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde::Serialize;
use tracing::warn;

use crate::domain::Fingerprint;
use crate::provider::ProviderId;

/// Lifecycle event published by the boundary service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum BoundaryEvent {
    CacheHit {
        fingerprint: Fingerprint,
    },
    Resolved {
        fingerprint: Fingerprint,
        provider_id: ProviderId,
        attempts: u32,
    },
    ProviderDown {
        provider_id: ProviderId,
        consecutive_failures: u32,
        cool_down_ms: u64,
    },
    ProviderRecovered {
        provider_id: ProviderId,
    },
    RetryScheduled {
        fingerprint: Fingerprint,
        /// Attempts made so far.
        attempt: u32,
        delay_ms: u64,
    },
    Failed {
        fingerprint: Fingerprint,
        attempts: u32,
        served_approximate: bool,
    },
}

impl BoundaryEvent {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::CacheHit { .. } => "cache-hit",
            Self::Resolved { .. } => "resolved",
            Self::ProviderDown { .. } => "provider-down",
            Self::ProviderRecovered { .. } => "provider-recovered",
            Self::RetryScheduled { .. } => "retry-scheduled",
            Self::Failed { .. } => "failed",
        }
    }
}

type Callback = Arc<dyn Fn(&BoundaryEvent) + Send + Sync>;

/// Event bus delivering each event to every subscriber, in subscription order.
///
/// Callbacks run on the publishing task and must not block. A panicking callback is
/// logged and skipped; remaining subscribers still receive the event.
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(u64, Callback)>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(self: &Arc<Self>, callback: F) -> Subscription
    where
        F: Fn(&BoundaryEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .expect("event subscribers lock is not poisoned")
            .push((id, Arc::new(callback)));
        Subscription {
            id,
            bus: Arc::downgrade(self),
        }
    }

    /// Delivers `event` and returns how many subscribers handled it without panicking.
    pub fn publish(&self, event: &BoundaryEvent) -> usize {
        // snapshot so callbacks may subscribe or unsubscribe re-entrantly
        let subscribers = self
            .subscribers
            .lock()
            .expect("event subscribers lock is not poisoned")
            .iter()
            .map(|(id, callback)| (*id, Arc::clone(callback)))
            .collect::<Vec<_>>();

        let mut delivered = 0;
        for (id, callback) in subscribers {
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(()) => delivered += 1,
                Err(_) => warn!(subscriber = id, kind = event.kind(), "event subscriber panicked"),
            }
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .expect("event subscribers lock is not poisoned")
            .len()
    }

    fn remove(&self, id: u64) -> bool {
        let mut subscribers = self
            .subscribers
            .lock()
            .expect("event subscribers lock is not poisoned");
        let before = subscribers.len();
        subscribers.retain(|(subscriber, _)| *subscriber != id);
        subscribers.len() != before
    }
}

/// Handle returned by [`EventBus::subscribe`].
///
/// Dropping it keeps the subscription alive; call [`Subscription::unsubscribe`] to stop delivery.
#[derive(Debug, Clone)]
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    id: u64,
    bus: Weak<EventBus>,
}

impl Subscription {
    /// Returns false when already unsubscribed or the bus is gone.
    pub fn unsubscribe(&self) -> bool {
        self.bus
            .upgrade()
            .map(|bus| bus.remove(self.id))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn down(provider: &str) -> BoundaryEvent {
        BoundaryEvent::ProviderDown {
            provider_id: ProviderId::new(provider),
            consecutive_failures: 3,
            cool_down_ms: 30_000,
        }
    }

    #[test]
    fn delivers_in_subscription_order() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&seen);
        let _a = bus.subscribe(move |event| first.lock().unwrap().push(("a", event.kind())));
        let second = Arc::clone(&seen);
        let _b = bus.subscribe(move |event| second.lock().unwrap().push(("b", event.kind())));

        assert_eq!(bus.publish(&down("osm")), 2);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("a", "provider-down"), ("b", "provider-down")]
        );
    }

    #[test]
    fn panicking_subscriber_does_not_block_the_rest() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(AtomicU64::new(0));

        let _panics = bus.subscribe(|_| panic!("subscriber bug"));
        let counter = Arc::clone(&seen);
        let _counts = bus.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(bus.publish(&down("osm")), 1);
        assert_eq!(bus.publish(&down("nominatim")), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&seen);
        let subscription = bus.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(&down("osm"));
        assert!(subscription.unsubscribe());
        assert!(!subscription.unsubscribe());
        bus.publish(&down("osm"));

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn events_serialize_with_kind_tag() {
        let json = serde_json::to_value(BoundaryEvent::RetryScheduled {
            fingerprint: Fingerprint::compute("Athens", &Default::default(), None)
                .expect("valid query"),
            attempt: 1,
            delay_ms: 1_000,
        })
        .expect("serialize");

        assert_eq!(json["kind"], "retry-scheduled");
        assert_eq!(json["attempt"], 1);
        assert_eq!(json["delayMs"], 1_000);
    }
}
