//! Fan-out registry for transport notifications.
//!
//! Each subscriber gets its own bounded channel. Dropping or unsubscribing a
//! [`Subscription`] removes it from the registry, so repeated
//! connect/disconnect cycles never accumulate dead listeners.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc;
use tracing::warn;

struct Registry<T> {
    next_id: u64,
    senders: HashMap<u64, mpsc::Sender<T>>,
}

fn lock<T>(registry: &Mutex<Registry<T>>) -> MutexGuard<'_, Registry<T>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Observers<T> {
    name: &'static str,
    capacity: usize,
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T> Clone for Observers<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            capacity: self.capacity,
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<T: Clone> Observers<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity: capacity.max(1),
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                senders: HashMap::new(),
            })),
        }
    }

    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut registry = lock(&self.registry);
        registry.next_id += 1;
        let id = registry.next_id;
        registry.senders.insert(id, tx);
        Subscription {
            id,
            rx,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Delivers `value` to every live subscriber and returns how many got it.
    pub fn publish(&self, value: &T) -> usize {
        let mut registry = lock(&self.registry);
        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, sender) in &registry.senders {
            match sender.try_send(value.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        event = "observer_drop",
                        channel = self.name,
                        subscriber = *id,
                        reason = "queue_full",
                        capacity = self.capacity
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
            }
        }
        for id in closed {
            registry.senders.remove(&id);
        }
        delivered
    }

    pub fn len(&self) -> usize {
        lock(&self.registry).senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct Subscription<T> {
    id: u64,
    rx: mpsc::Receiver<T>,
    registry: Weak<Mutex<Registry<T>>>,
}

impl<T> Subscription<T> {
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(self) {}
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).senders.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_subscriber_receives_published_values() {
        let observers = Observers::<u32>::new("test", 4);
        let mut first = observers.subscribe();
        let mut second = observers.subscribe();
        assert_eq!(observers.publish(&7), 2);
        assert_eq!(first.recv().await, Some(7));
        assert_eq!(second.recv().await, Some(7));
    }

    #[test]
    fn unsubscribe_and_drop_deregister() {
        let observers = Observers::<u32>::new("test", 4);
        let first = observers.subscribe();
        let second = observers.subscribe();
        assert_eq!(observers.len(), 2);
        first.unsubscribe();
        assert_eq!(observers.len(), 1);
        drop(second);
        assert!(observers.is_empty());
        assert_eq!(observers.publish(&1), 0);
    }

    #[test]
    fn full_subscriber_skips_without_blocking_others() {
        let observers = Observers::<u32>::new("test", 1);
        let mut slow = observers.subscribe();
        let mut fast = observers.subscribe();
        assert_eq!(observers.publish(&1), 2);
        assert_eq!(fast.try_recv(), Some(1));
        assert_eq!(observers.publish(&2), 1);
        assert_eq!(slow.try_recv(), Some(1));
        assert_eq!(fast.try_recv(), Some(2));
        assert_eq!(slow.try_recv(), None);
    }

    #[test]
    fn subscription_outlives_registry() {
        let observers = Observers::<u32>::new("test", 1);
        let subscription = observers.subscribe();
        drop(observers);
        drop(subscription);
    }
}
