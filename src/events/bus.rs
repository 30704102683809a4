//! Multicast event bus between the consumer loop and downstream observers.
//!
//! The bus is a single-producer fan-out, not a full reactive stream:
//! back-pressure is handled upstream by broker pacing, never signalled into
//! the producer. Each `publish` notifies every observer registered at the
//! moment the registry snapshot was taken, in subscription order, outside
//! the registry lock.
//!
//! Observer failures are contained here: an `Err` from a callback is
//! logged at warn level and the remaining observers still receive the
//! event. Observers that need visibility into their own failures must log
//! inside their callbacks.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use super::user_event::UserEvent;

pub type ObserverResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Capability set every observer exposes.
#[async_trait]
pub trait EventObserver: Send + Sync {
    async fn on_next(&self, event: &UserEvent) -> ObserverResult;

    async fn on_error(&self, error: &(dyn std::error::Error + Send + Sync)) -> ObserverResult;

    async fn on_completed(&self) -> ObserverResult;
}

#[derive(Clone)]
struct Registered {
    id: u64,
    observer: Arc<dyn EventObserver>,
}

struct BusInner {
    registry: Mutex<Vec<Registered>>,
    next_id: AtomicU64,
}

impl BusInner {
    // The lock is held only long enough to copy the registry; callbacks
    // always run against the snapshot.
    fn snapshot(&self) -> Vec<Registered> {
        self.registry.lock().unwrap().clone()
    }
}

/// Handle binding one observer registration to the bus.
///
/// Release is explicit and idempotent; dropping the handle does not
/// unsubscribe. After `release` returns, the observer receives no further
/// notifications.
pub struct Subscription {
    inner: Weak<BusInner>,
    id: u64,
    released: AtomicBool,
}

impl Subscription {
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(inner) = self.inner.upgrade() {
            inner
                .registry
                .lock()
                .unwrap()
                .retain(|registered| registered.id != self.id);
            log::debug!("Subscription {} released", self.id);
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

/// The fan-out surface. Cheap to clone; clones share one registry.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                registry: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Registers an observer and returns its release handle.
    ///
    /// Re-subscribing the same observer instance (pointer identity) is a
    /// no-op: the existing registration is kept and a handle to it is
    /// returned.
    pub fn subscribe(&self, observer: Arc<dyn EventObserver>) -> Subscription {
        let mut registry = self.inner.registry.lock().unwrap();

        if let Some(existing) = registry
            .iter()
            .find(|registered| Arc::ptr_eq(&registered.observer, &observer))
        {
            return Subscription {
                inner: Arc::downgrade(&self.inner),
                id: existing.id,
                released: AtomicBool::new(false),
            };
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        registry.push(Registered { id, observer });

        Subscription {
            inner: Arc::downgrade(&self.inner),
            id,
            released: AtomicBool::new(false),
        }
    }

    /// Delivers `event` to every observer subscribed at the moment the
    /// registry snapshot was taken, in subscription order. A failing
    /// observer never starves the ones behind it.
    pub async fn publish(&self, event: &UserEvent) {
        for registered in self.inner.snapshot() {
            if let Err(err) = registered.observer.on_next(event).await {
                log::warn!(
                    "⚠️  Observer {} failed to handle event for user {}: {}",
                    registered.id,
                    event.user_id(),
                    err
                );
            }
        }
    }

    /// Multicasts an error signal. The registry is left intact.
    pub async fn publish_error(&self, error: &(dyn std::error::Error + Send + Sync)) {
        for registered in self.inner.snapshot() {
            if let Err(err) = registered.observer.on_error(error).await {
                log::warn!(
                    "⚠️  Observer {} failed to handle error signal: {}",
                    registered.id,
                    err
                );
            }
        }
    }

    /// Delivers `on_completed` to every observer, then leaves the registry
    /// empty. Later `publish`/`publish_error` calls are legal no-ops.
    pub async fn complete(&self) {
        let drained = {
            let mut registry = self.inner.registry.lock().unwrap();
            std::mem::take(&mut *registry)
        };

        let observer_count = drained.len();
        for registered in drained {
            if let Err(err) = registered.observer.on_completed().await {
                log::warn!(
                    "⚠️  Observer {} failed to handle completion: {}",
                    registered.id,
                    err
                );
            }
        }

        log::info!("✅ Event bus completed ({} observers notified)", observer_count);
    }

    pub fn observer_count(&self) -> usize {
        self.inner.registry.lock().unwrap().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    fn make_event(user_id: i64, event_type: &str) -> UserEvent {
        UserEvent::new(user_id, event_type, Utc::now(), HashMap::new()).unwrap()
    }

    #[derive(Default)]
    struct RecordingObserver {
        seen: Mutex<Vec<String>>,
        errors: AtomicU64,
        completions: AtomicU64,
    }

    impl RecordingObserver {
        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventObserver for RecordingObserver {
        async fn on_next(&self, event: &UserEvent) -> ObserverResult {
            self.seen
                .lock()
                .unwrap()
                .push(format!("{}:{}", event.user_id(), event.event_type()));
            Ok(())
        }

        async fn on_error(&self, _error: &(dyn std::error::Error + Send + Sync)) -> ObserverResult {
            self.errors.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_completed(&self) -> ObserverResult {
            self.completions.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingObserver;

    #[async_trait]
    impl EventObserver for FailingObserver {
        async fn on_next(&self, _event: &UserEvent) -> ObserverResult {
            Err("observer exploded".into())
        }

        async fn on_error(&self, _error: &(dyn std::error::Error + Send + Sync)) -> ObserverResult {
            Err("observer exploded".into())
        }

        async fn on_completed(&self) -> ObserverResult {
            Err("observer exploded".into())
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_all_observers_in_order() {
        let bus = EventBus::new();
        let a = Arc::new(RecordingObserver::default());
        let b = Arc::new(RecordingObserver::default());

        let _sub_a = bus.subscribe(a.clone());
        let _sub_b = bus.subscribe(b.clone());

        bus.publish(&make_event(1, "click")).await;
        bus.publish(&make_event(2, "hover")).await;

        assert_eq!(a.seen(), vec!["1:click", "2:hover"]);
        assert_eq!(b.seen(), vec!["1:click", "2:hover"]);
    }

    #[tokio::test]
    async fn test_resubscribe_same_instance_is_noop() {
        let bus = EventBus::new();
        let observer = Arc::new(RecordingObserver::default());

        let _first = bus.subscribe(observer.clone());
        let _second = bus.subscribe(observer.clone());

        assert_eq!(bus.observer_count(), 1);

        bus.publish(&make_event(1, "click")).await;
        assert_eq!(observer.seen().len(), 1);
    }

    #[tokio::test]
    async fn test_release_stops_delivery_and_is_idempotent() {
        let bus = EventBus::new();
        let observer = Arc::new(RecordingObserver::default());

        let sub = bus.subscribe(observer.clone());
        bus.publish(&make_event(1, "click")).await;

        sub.release();
        sub.release();
        assert!(sub.is_released());
        assert_eq!(bus.observer_count(), 0);

        bus.publish(&make_event(2, "click")).await;
        assert_eq!(observer.seen(), vec!["1:click"]);
    }

    #[tokio::test]
    async fn test_failing_observer_does_not_starve_others() {
        let bus = EventBus::new();
        let failing = Arc::new(FailingObserver);
        let recording = Arc::new(RecordingObserver::default());

        let _sub_a = bus.subscribe(failing);
        let _sub_b = bus.subscribe(recording.clone());

        bus.publish(&make_event(1, "click")).await;

        assert_eq!(recording.seen(), vec!["1:click"]);
    }

    #[tokio::test]
    async fn test_publish_error_keeps_registry() {
        let bus = EventBus::new();
        let observer = Arc::new(RecordingObserver::default());
        let _sub = bus.subscribe(observer.clone());

        let error = std::io::Error::new(std::io::ErrorKind::Other, "broker down");
        bus.publish_error(&error).await;

        assert_eq!(observer.errors.load(Ordering::SeqCst), 1);
        assert_eq!(bus.observer_count(), 1);
    }

    #[tokio::test]
    async fn test_complete_notifies_then_clears() {
        let bus = EventBus::new();
        let observer = Arc::new(RecordingObserver::default());
        let _sub = bus.subscribe(observer.clone());

        bus.complete().await;

        assert_eq!(observer.completions.load(Ordering::SeqCst), 1);
        assert_eq!(bus.observer_count(), 0);

        // Publishing after completion is a legal no-op
        bus.publish(&make_event(1, "click")).await;
        assert!(observer.seen().is_empty());
    }

    #[tokio::test]
    async fn test_release_during_iteration_is_safe() {
        // An observer releasing its own subscription from inside a callback
        // must not skip observers behind it.
        struct SelfReleasing {
            sub: Mutex<Option<Subscription>>,
        }

        #[async_trait]
        impl EventObserver for SelfReleasing {
            async fn on_next(&self, _event: &UserEvent) -> ObserverResult {
                if let Some(sub) = self.sub.lock().unwrap().take() {
                    sub.release();
                }
                Ok(())
            }

            async fn on_error(
                &self,
                _error: &(dyn std::error::Error + Send + Sync),
            ) -> ObserverResult {
                Ok(())
            }

            async fn on_completed(&self) -> ObserverResult {
                Ok(())
            }
        }

        let bus = EventBus::new();
        let self_releasing = Arc::new(SelfReleasing {
            sub: Mutex::new(None),
        });
        let trailing = Arc::new(RecordingObserver::default());

        let sub = bus.subscribe(self_releasing.clone());
        *self_releasing.sub.lock().unwrap() = Some(sub);
        let _sub_b = bus.subscribe(trailing.clone());

        bus.publish(&make_event(1, "click")).await;

        assert_eq!(trailing.seen(), vec!["1:click"]);
        assert_eq!(bus.observer_count(), 1);
    }
}
