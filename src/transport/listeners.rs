//! Event-name keyed listener multimap.
//!
//! Shared by the requester's event subscriptions, bridge fan-out and the
//! bundled transports. Handlers are cloned out under the lock and invoked
//! after it is released, so a handler may register or remove listeners.

use std::panic::{AssertUnwindSafe, catch_unwind};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::error;

use crate::identifiers::SubscriptionId;

/// Multimap from event name to handlers, preserving registration order.
pub struct ListenerMap<H> {
    inner: RwLock<FxHashMap<String, Vec<(SubscriptionId, H)>>>,
}

impl<H: Clone> ListenerMap<H> {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(FxHashMap::default()),
        }
    }

    /// Adds `handler` under `event`.
    pub fn add(&self, event: &str, handler: H) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.inner
            .write()
            .entry(event.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    /// Removes one handler. Returns `true` if it was present.
    pub fn remove(&self, event: &str, id: SubscriptionId) -> bool {
        let mut inner = self.inner.write();
        let Some(handlers) = inner.get_mut(event) else {
            return false;
        };

        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        let removed = handlers.len() != before;

        if handlers.is_empty() {
            inner.remove(event);
        }
        removed
    }

    /// Clones the handlers registered under `event`.
    #[must_use]
    pub fn snapshot(&self, event: &str) -> Vec<H> {
        self.inner
            .read()
            .get(event)
            .map(|handlers| handlers.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of handlers under `event`.
    #[must_use]
    pub fn count(&self, event: &str) -> usize {
        self.inner.read().get(event).map_or(0, Vec::len)
    }

    /// Returns `true` if no handler is registered at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Removes every handler.
    pub fn clear(&self) {
        self.inner.write().clear();
    }
}

impl<H: Clone> Default for ListenerMap<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs one listener, containing a panic so sibling listeners and the
/// delivering task keep running.
pub(crate) fn invoke_guarded(event: &str, listener: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(listener)).is_err() {
        error!(event = %event, "Listener panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_snapshot_in_order() {
        let map: ListenerMap<u32> = ListenerMap::new();
        map.add("log", 1);
        map.add("log", 2);
        map.add("other", 3);

        assert_eq!(map.snapshot("log"), vec![1, 2]);
        assert_eq!(map.count("other"), 1);
        assert!(map.snapshot("missing").is_empty());
    }

    #[test]
    fn test_remove_only_that_instance() {
        let map: ListenerMap<&str> = ListenerMap::new();
        let first = map.add("log", "a");
        map.add("log", "a");

        assert!(map.remove("log", first));
        assert_eq!(map.count("log"), 1);
        assert!(!map.remove("log", first));
    }

    #[test]
    fn test_empty_event_is_dropped() {
        let map: ListenerMap<u8> = ListenerMap::new();
        let id = map.add("log", 0);
        map.remove("log", id);
        assert!(map.is_empty());
    }

    #[test]
    fn test_invoke_guarded_contains_panic() {
        let mut ran_after = false;
        invoke_guarded("log", || panic!("listener failure"));
        invoke_guarded("log", || ran_after = true);
        assert!(ran_after);
    }

    #[test]
    fn test_clear() {
        let map: ListenerMap<u8> = ListenerMap::new();
        map.add("a", 0);
        map.add("b", 1);
        map.clear();
        assert!(map.is_empty());
    }
}
