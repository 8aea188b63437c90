use std::sync::Arc;
use tokio::sync::watch;
use tq_core::progress::{reduce, ProgressAction, ProgressState};

/// Before/after pair of one dispatch. `changed()` is pointer inequality.
#[derive(Debug, Clone)]
pub struct Transition {
    pub prev: Arc<ProgressState>,
    pub next: Arc<ProgressState>,
}

impl Transition {
    pub fn changed(&self) -> bool {
        !Arc::ptr_eq(&self.prev, &self.next)
    }
}

/// Owns the one `ProgressState` value. Readers watch it; `dispatch` is the
/// only way to change it, and watchers are woken only on a real change.
#[derive(Clone)]
pub struct ProgressStore {
    tx: Arc<watch::Sender<Arc<ProgressState>>>,
}

impl Default for ProgressStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(ProgressState::default()));
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> Arc<ProgressState> {
        Arc::clone(&self.tx.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<ProgressState>> {
        self.tx.subscribe()
    }

    pub fn dispatch(&self, action: &ProgressAction) -> Transition {
        let mut transition = None;
        self.tx.send_if_modified(|current| {
            let next = reduce(current, action);
            let changed = !Arc::ptr_eq(current, &next);
            let prev = std::mem::replace(current, Arc::clone(&next));
            transition = Some(Transition { prev, next });
            changed
        });
        transition.unwrap_or_else(|| {
            let current = self.snapshot();
            Transition {
                prev: Arc::clone(&current),
                next: current,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tq_core::event::ProgressEvent;
    use tq_core::status::{BatchStatus, StatusToken};

    #[tokio::test]
    async fn watchers_wake_only_on_change() {
        let store = ProgressStore::new();
        let mut rx = store.subscribe();
        let _ = rx.borrow_and_update();

        let started = store.dispatch(&ProgressAction::Start {
            batch_id: "B1".to_string(),
            total: 5,
            num_tabs: 1,
        });
        assert!(started.changed());
        assert!(rx.has_changed().expect("sender alive"));
        assert_eq!(rx.borrow_and_update().status, BatchStatus::Started);

        let event = ProgressAction::Event(ProgressEvent {
            current: Some(2),
            ..ProgressEvent::with_status(StatusToken::Processing)
        });
        assert!(store.dispatch(&event).changed());
        let _ = rx.borrow_and_update();
        let replay = store.dispatch(&event);
        assert!(!replay.changed());
        assert!(!rx.has_changed().expect("sender alive"));
        assert_eq!(store.snapshot().current, 2);
    }
}
