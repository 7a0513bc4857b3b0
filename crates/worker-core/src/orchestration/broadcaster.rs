//! Fan-out of [`EventStreamMessage`]s to independent subscribers.
//!
//! Every subscriber owns a bounded queue. `publish` never waits: when a
//! subscriber's queue is full the message being published is dropped for that
//! subscriber alone (drop-newest). Messages already buffered are kept, so a
//! slow listener sees a gap at the tail, never a reordering.
//!
//! ```text
//!    publish(msg)
//!        ├──► [queue S1] ─► Subscription::recv()
//!        ├──► [queue S2] ─► Subscription::recv()
//!        └──► [queue SN] ─► Subscription::recv()
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;

use crate::models::{CoreError, CoreResult, EventStreamMessage};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub u64);

/// Per-publish delivery counts.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PublishReport {
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    senders: BTreeMap<SubscriberId, mpsc::Sender<Arc<EventStreamMessage>>>,
}

#[derive(Clone)]
pub struct EventBroadcaster {
    buffer_capacity: usize,
    registry: Arc<Mutex<Registry>>,
}

impl EventBroadcaster {
    pub fn new(buffer_capacity: usize) -> CoreResult<Self> {
        if buffer_capacity == 0 {
            return Err(CoreError::invalid_configuration(
                "subscriber buffer capacity must be greater than zero",
            ));
        }

        Ok(Self {
            buffer_capacity,
            registry: Arc::new(Mutex::new(Registry::default())),
        })
    }

    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.buffer_capacity);
        let mut registry = lock_registry(&self.registry);
        let id = SubscriberId(registry.next_id);
        registry.next_id = registry.next_id.wrapping_add(1);
        registry.senders.insert(id, sender);
        tracing::debug!(subscriber = id.0, total = registry.senders.len(), "subscriber registered");

        Subscription {
            id,
            receiver,
            registry: Arc::downgrade(&self.registry),
        }
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = lock_registry(&self.registry).senders.remove(&id).is_some();
        if removed {
            tracing::debug!(subscriber = id.0, "subscriber released");
        }
        removed
    }

    pub fn publish(&self, message: EventStreamMessage) -> PublishReport {
        let message = Arc::new(message);
        let mut report = PublishReport::default();
        let mut registry = lock_registry(&self.registry);
        let mut closed = Vec::new();

        for (id, sender) in &registry.senders {
            match sender.try_send(Arc::clone(&message)) {
                Ok(()) => report.delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    report.dropped += 1;
                    tracing::warn!(subscriber = id.0, "subscriber buffer full; event dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    report.dropped += 1;
                    closed.push(*id);
                }
            }
        }

        for id in closed {
            registry.senders.remove(&id);
            tracing::debug!(subscriber = id.0, "disconnected subscriber pruned");
        }

        report
    }

    pub fn subscriber_count(&self) -> usize {
        lock_registry(&self.registry).senders.len()
    }
}

/// One listener's end of the stream; dropping it unsubscribes.
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::Receiver<Arc<EventStreamMessage>>,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Waits for the next message; `None` once the subscription has been released.
    pub async fn recv(&mut self) -> Option<Arc<EventStreamMessage>> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<EventStreamMessage>> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock_registry(&registry).senders.remove(&self.id);
        }
    }
}

fn lock_registry(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::EventBroadcaster;
    use crate::models::{CoreErrorKind, EventStreamMessage};

    fn settings(seconds: u64) -> EventStreamMessage {
        EventStreamMessage::SettingsUpdate {
            shutdown_timeout_seconds: seconds,
        }
    }

    #[test]
    fn zero_buffer_is_rejected() {
        let error = EventBroadcaster::new(0).err().unwrap();
        assert_eq!(error.kind, CoreErrorKind::InvalidConfiguration);
    }

    #[test]
    fn dropping_subscription_unregisters_it() {
        let broadcaster = EventBroadcaster::new(4).unwrap();
        let subscription = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count(), 1);

        drop(subscription);
        assert_eq!(broadcaster.subscriber_count(), 0);
        assert_eq!(broadcaster.publish(settings(1)).delivered, 0);
    }

    #[test]
    fn unsubscribe_closes_the_stream() {
        let broadcaster = EventBroadcaster::new(4).unwrap();
        let mut subscription = broadcaster.subscribe();
        broadcaster.publish(settings(1));

        assert!(broadcaster.unsubscribe(subscription.id()));
        assert!(!broadcaster.unsubscribe(subscription.id()));
        assert_eq!(subscription.try_recv().as_deref(), Some(&settings(1)));
        assert!(subscription.try_recv().is_none());
    }
}
