//! Multicast delegates.

use std::sync::atomic::{AtomicU64, Ordering::SeqCst};
use std::sync::Arc;

use parking_lot::Mutex;

/// Identifies a listener registered with a [`MulticastDelegate`] so it can be
/// removed later.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DelegateHandle(u64);

type Listener = Arc<dyn Fn() + Send + Sync>;

/// A list of listeners that can all be invoked with one [`broadcast`][Self::broadcast].
#[derive(Default)]
pub struct MulticastDelegate {
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
}

impl MulticastDelegate {
    /// Create an empty delegate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener.
    pub fn add(&self, f: impl Fn() + Send + Sync + 'static) -> DelegateHandle {
        let id = self.next_id.fetch_add(1, SeqCst);
        self.listeners.lock().push((id, Arc::new(f)));
        DelegateHandle(id)
    }

    /// Remove a previously-registered listener.
    pub fn remove(&self, handle: DelegateHandle) {
        self.listeners.lock().retain(|(id, _)| *id != handle.0);
    }

    /// Invoke every registered listener.
    ///
    /// Listeners are cloned out of the lock before being called, so a
    /// listener may register or remove listeners without deadlocking.
    pub fn broadcast(&self) {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener();
        }
    }
}

impl std::fmt::Debug for MulticastDelegate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MulticastDelegate")
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn broadcast_reaches_all_listeners() {
        let delegate = MulticastDelegate::new();
        let count = Arc::new(AtomicU32::new(0));

        let c1 = count.clone();
        delegate.add(move || {
            c1.fetch_add(1, SeqCst);
        });
        let c2 = count.clone();
        let handle = delegate.add(move || {
            c2.fetch_add(10, SeqCst);
        });

        delegate.broadcast();
        assert_eq!(count.load(SeqCst), 11);

        delegate.remove(handle);
        delegate.broadcast();
        assert_eq!(count.load(SeqCst), 12);
    }
}
