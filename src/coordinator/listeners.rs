//! Snapshot listeners
//!
//! Listeners carry no payload; they re-read the coordinator's snapshot when
//! called. Calls happen synchronously, in registration order, after the
//! registry lock has been released so a listener may (un)subscribe itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

pub type Listener = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
pub(crate) struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, Listener)>>,
}

impl ListenerRegistry {
    pub fn add(self: &Arc<Self>, listener: Listener) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));

        Subscription {
            id,
            registry: Arc::downgrade(self),
        }
    }

    fn remove(&self, id: u64) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn notify(&self) {
        let current: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, l)| l.clone())
            .collect();

        for listener in current {
            listener();
        }
    }
}

/// Handle returned by `Coordinator::subscribe`
#[must_use = "dropping the handle keeps the listener registered; call unsubscribe to remove it"]
pub struct Subscription {
    id: u64,
    registry: Weak<ListenerRegistry>,
}

impl Subscription {
    /// Remove the listener. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        self.registry
            .upgrade()
            .map(|registry| registry.remove(self.id))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(log: &Arc<Mutex<Vec<u32>>>, tag: u32) -> Listener {
        let log = log.clone();
        Arc::new(move || log.lock().unwrap().push(tag))
    }

    #[test]
    fn test_notify_in_registration_order() {
        let registry = Arc::new(ListenerRegistry::default());
        let log = Arc::new(Mutex::new(Vec::new()));

        let first = registry.add(recorder(&log, 1));
        let _second = registry.add(recorder(&log, 2));
        let _third = registry.add(recorder(&log, 3));

        registry.notify();
        assert_eq!(*log.lock().unwrap(), vec![1, 2, 3]);

        assert!(first.unsubscribe());
        registry.notify();
        assert_eq!(*log.lock().unwrap(), vec![1, 2, 3, 2, 3]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_listener_may_subscribe_during_notify() {
        let registry = Arc::new(ListenerRegistry::default());
        let reg = registry.clone();
        let _s = registry.add(Arc::new(move || {
            let _late = reg.add(Arc::new(|| {}));
        }));

        registry.notify();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_unsubscribe_after_registry_dropped() {
        let registry = Arc::new(ListenerRegistry::default());
        let sub = registry.add(Arc::new(|| {}));
        drop(registry);
        assert!(!sub.unsubscribe());
    }
}
