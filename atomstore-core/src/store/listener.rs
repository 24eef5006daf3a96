//! Store listeners.
//!
//! A listener is a callback attached to a mounted atom. It receives no
//! arguments: it is told that the atom changed and reads the new value from
//! the store if it wants it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Unique identifier for a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Generate a new unique listener ID.
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// A change callback registered through [`Store::subscribe`](crate::Store::subscribe).
#[derive(Clone)]
pub(crate) struct Listener {
    notify: Arc<dyn Fn() + Send + Sync>,
}

impl Listener {
    pub(crate) fn new<F>(notify: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            notify: Arc::new(notify),
        }
    }

    pub(crate) fn notify(&self) {
        (self.notify)();
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Listener")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn listener_ids_are_unique() {
        let id1 = ListenerId::next();
        let id2 = ListenerId::next();
        assert_ne!(id1, id2);
    }

    #[test]
    fn notify_calls_callback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let listener = Listener::new(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        listener.notify();
        listener.clone().notify();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
