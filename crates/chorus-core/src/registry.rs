//! Subscriber registry.
//!
//! The registry is the single source of truth for who receives the next
//! broadcast. All state sits behind one mutex whose critical sections are
//! O(1) map operations or a snapshot copy; the lock is never held while a
//! message is handed to a subscriber.

use crate::message::{Message, MessageId};
use crate::metrics;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// A subscriber identifier, numbered independently from message IDs.
pub type SubscriberId = u64;

/// Delivery model of a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriberKind {
    /// Long-lived push connection with a buffered delivery queue.
    Push,
    /// Single pending pull request with a one-message slot.
    Pull,
}

impl fmt::Display for SubscriberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriberKind::Push => f.write_str("push"),
            SubscriberKind::Pull => f.write_str("pull"),
        }
    }
}

/// Why a delivery attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The subscriber's queue is full.
    #[error("delivery queue saturated")]
    Saturated,
    /// The subscriber went away.
    #[error("subscriber closed")]
    Closed,
}

/// Sending half of a subscriber's delivery queue.
#[derive(Debug, Clone)]
pub struct DeliveryHandle {
    tx: mpsc::Sender<Arc<Message>>,
}

impl DeliveryHandle {
    /// Create a handle and its receiving end with room for `capacity`
    /// undelivered messages.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Arc<Message>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Hand a message to the subscriber without waiting.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue is full or the receiver was dropped.
    pub fn try_deliver(&self, message: &Arc<Message>) -> Result<(), DeliveryError> {
        self.tx.try_send(Arc::clone(message)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Saturated,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// A registry entry.
#[derive(Debug, Clone)]
pub struct Subscription {
    /// Subscriber identifier.
    pub id: SubscriberId,
    /// Delivery model.
    pub kind: SubscriberKind,
    /// Highest message ID the subscriber had at join time (push only).
    pub watermark: Option<MessageId>,
    /// Where broadcasts go.
    pub handle: DeliveryHandle,
}

#[derive(Debug, Default)]
struct RegistryInner {
    next_id: SubscriberId,
    subscribers: HashMap<SubscriberId, Subscription>,
}

/// Directory of currently subscribed delivery endpoints.
#[derive(Debug, Default)]
pub struct Registry {
    inner: Mutex<RegistryInner>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a delivery handle and return its fresh subscriber ID.
    pub fn register(
        &self,
        kind: SubscriberKind,
        handle: DeliveryHandle,
        watermark: Option<MessageId>,
    ) -> SubscriberId {
        let (id, count) = {
            let mut inner = self.inner.lock();
            inner.next_id += 1;
            let id = inner.next_id;
            inner.subscribers.insert(
                id,
                Subscription {
                    id,
                    kind,
                    watermark,
                    handle,
                },
            );
            let count = inner.subscribers.len();
            // Under the lock so concurrent updates land in order
            metrics::set_active_subscribers(count);
            (id, count)
        };

        debug!(subscriber = id, kind = %kind, subscribers = count, "Registered");
        id
    }

    /// Remove a subscriber.
    ///
    /// Returns `true` if it was registered. Removing an absent ID is a no-op.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let (removed, count) = {
            let mut inner = self.inner.lock();
            let removed = inner.subscribers.remove(&id).is_some();
            let count = inner.subscribers.len();
            if removed {
                metrics::set_active_subscribers(count);
            }
            (removed, count)
        };

        if removed {
            debug!(subscriber = id, subscribers = count, "Unregistered");
        }
        removed
    }

    /// Point-in-time copy of every registered subscription.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Subscription> {
        self.inner.lock().subscribers.values().cloned().collect()
    }

    /// Check whether a subscriber is registered.
    #[must_use]
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.inner.lock().subscribers.contains_key(&id)
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    /// Check if no subscriber is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let inner = self.inner.lock();
        let push = inner
            .subscribers
            .values()
            .filter(|s| s.kind == SubscriberKind::Push)
            .count();
        RegistryStats {
            push,
            pull: inner.subscribers.len() - push,
        }
    }

    /// Register a push subscriber with a buffered queue.
    ///
    /// The returned guard unregisters on drop.
    pub fn subscribe_push(
        self: &Arc<Self>,
        capacity: usize,
        watermark: Option<MessageId>,
    ) -> (SubscriptionGuard, mpsc::Receiver<Arc<Message>>) {
        let (handle, rx) = DeliveryHandle::channel(capacity);
        let id = self.register(SubscriberKind::Push, handle, watermark);
        (SubscriptionGuard::new(Arc::clone(self), id), rx)
    }

    /// Register a single-slot pull subscriber.
    ///
    /// The returned guard unregisters on drop.
    pub fn subscribe_pull(self: &Arc<Self>) -> (SubscriptionGuard, mpsc::Receiver<Arc<Message>>) {
        let (handle, rx) = DeliveryHandle::channel(1);
        let id = self.register(SubscriberKind::Pull, handle, None);
        (SubscriptionGuard::new(Arc::clone(self), id), rx)
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Registered push subscribers.
    pub push: usize,
    /// Registered pull subscribers.
    pub pull: usize,
}

/// Unregisters its subscriber when dropped.
#[derive(Debug)]
pub struct SubscriptionGuard {
    registry: Arc<Registry>,
    id: SubscriberId,
}

impl SubscriptionGuard {
    fn new(registry: Arc<Registry>, id: SubscriberId) -> Self {
        Self { registry, id }
    }

    /// The guarded subscriber ID.
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::metrics::{
        Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit,
    };
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Records the active-subscriber gauge and ignores everything else.
    #[derive(Default)]
    struct SubscriberGauge(Arc<AtomicU64>);

    impl SubscriberGauge {
        fn value(&self) -> f64 {
            f64::from_bits(self.0.load(Ordering::SeqCst))
        }
    }

    impl Recorder for SubscriberGauge {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn register_counter(&self, _: &Key, _: &Metadata<'_>) -> Counter {
            Counter::noop()
        }

        fn register_gauge(&self, key: &Key, _: &Metadata<'_>) -> Gauge {
            if key.name() == crate::metrics::names::SUBSCRIBERS_ACTIVE {
                Gauge::from_arc(Arc::clone(&self.0))
            } else {
                Gauge::noop()
            }
        }

        fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
            Histogram::noop()
        }
    }

    #[test]
    fn test_active_gauge_tracks_registrations() {
        let recorder = SubscriberGauge::default();
        let registry = Registry::new();
        let (handle, _rx) = DeliveryHandle::channel(1);

        ::metrics::with_local_recorder(&recorder, || {
            let a = registry.register(SubscriberKind::Push, handle.clone(), None);
            let b = registry.register(SubscriberKind::Pull, handle.clone(), None);
            assert_eq!(recorder.value(), 2.0);

            registry.unregister(a);
            assert_eq!(recorder.value(), 1.0);

            // Removing an absent ID leaves the gauge alone
            registry.unregister(a);
            assert_eq!(recorder.value(), 1.0);

            registry.unregister(b);
            assert_eq!(recorder.value(), 0.0);
        });
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_unregister() {
        let registry = Registry::new();
        let (handle, _rx) = DeliveryHandle::channel(4);

        let a = registry.register(SubscriberKind::Push, handle.clone(), Some(3));
        let b = registry.register(SubscriberKind::Pull, handle, None);
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.stats(), RegistryStats { push: 1, pull: 1 });

        assert!(registry.unregister(a));
        assert!(!registry.contains(a));
        assert!(registry.contains(b));

        // Idempotent
        assert!(!registry.unregister(a));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_ids_never_reused() {
        let registry = Registry::new();
        let (handle, _rx) = DeliveryHandle::channel(1);

        let first = registry.register(SubscriberKind::Pull, handle.clone(), None);
        registry.unregister(first);
        let second = registry.register(SubscriberKind::Pull, handle, None);
        assert!(second > first);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let registry = Registry::new();
        let (handle, _rx) = DeliveryHandle::channel(1);
        let id = registry.register(SubscriberKind::Push, handle, Some(7));

        let snapshot = registry.snapshot();
        registry.unregister(id);

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, id);
        assert_eq!(snapshot[0].watermark, Some(7));
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_try_deliver_saturation_and_close() {
        let (handle, mut rx) = DeliveryHandle::channel(1);
        let msg = Arc::new(Message::new(1, "alice", "hi"));

        assert_eq!(handle.try_deliver(&msg), Ok(()));
        assert_eq!(handle.try_deliver(&msg), Err(DeliveryError::Saturated));
        assert_eq!(rx.try_recv().unwrap().id, 1);

        drop(rx);
        assert_eq!(handle.try_deliver(&msg), Err(DeliveryError::Closed));
    }

    #[test]
    fn test_guard_unregisters_on_drop() {
        let registry = Arc::new(Registry::new());

        let (guard, _rx) = registry.subscribe_pull();
        let id = guard.id();
        assert!(registry.contains(id));

        drop(guard);
        assert!(!registry.contains(id));
        assert!(registry.is_empty());
    }
}
