//! Namespaced publish/subscribe over a broadcast transport.
//!
//! Each namespace maps to its own topic (`<ns>:<bridge-namespace>`), so
//! bridges on different namespaces never see each other's traffic. One
//! transport subscription per namespace fans inbound messages out to the
//! listeners registered under the message's `event`.
//!
//! # Example
//!
//! ```ignore
//! let registry = BridgeRegistry::new(broadcast, Topics::default());
//! let console = registry.open("console");
//!
//! let sub = console.on("log", |data| println!("{data}"));
//! console.send("log", json!({ "msg": "hi" }))?;
//!
//! console.close();
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::envelope::{decode, encode};
use crate::protocol::{BridgeMessage, Topics};
use crate::transport::listeners::{ListenerMap, invoke_guarded};
use crate::transport::{BroadcastTransport, MessageHandler, Subscription};

// ============================================================================
// Types
// ============================================================================

type NamespaceMap = FxHashMap<String, Arc<NamespaceState>>;

/// Registry entry of one open namespace.
struct NamespaceState {
    namespace: String,
    topic: String,
    listeners: ListenerMap<MessageHandler>,
    subscription: Mutex<Option<Subscription>>,
    closed: AtomicBool,
}

impl NamespaceState {
    /// Fans one inbound message out to its listeners.
    fn deliver(&self, data: Value) {
        if self.closed.load(Ordering::Acquire) {
            trace!(namespace = %self.namespace, "Dropped message after close");
            return;
        }

        let Some(message) = decode::<BridgeMessage>(data) else {
            warn!(namespace = %self.namespace, "Dropped malformed bridge message");
            return;
        };

        let handlers = self.listeners.snapshot(&message.event);
        if handlers.is_empty() {
            trace!(namespace = %self.namespace, event = %message.event, "No listener for event");
            return;
        }

        let data = message.data.unwrap_or(Value::Null);
        for handler in handlers {
            // A listener may close the bridge mid fan-out.
            if self.closed.load(Ordering::Acquire) {
                break;
            }
            let data = data.clone();
            invoke_guarded(&message.event, || handler(data));
        }
    }
}

// ============================================================================
// BridgeRegistry
// ============================================================================

/// Opens bridges on one broadcast transport.
///
/// Opening a namespace that is already open returns a handle to the same
/// entry; closing any handle closes the namespace for all of them.
#[derive(Clone)]
pub struct BridgeRegistry {
    broadcast: Arc<dyn BroadcastTransport>,
    topics: Topics,
    namespaces: Arc<Mutex<NamespaceMap>>,
}

impl BridgeRegistry {
    /// Creates a registry publishing under `topics`.
    #[must_use]
    pub fn new(broadcast: Arc<dyn BroadcastTransport>, topics: Topics) -> Self {
        Self {
            broadcast,
            topics,
            namespaces: Arc::new(Mutex::new(FxHashMap::default())),
        }
    }

    /// Opens (or reuses) the bridge for `namespace`.
    #[must_use]
    pub fn open(&self, namespace: &str) -> Bridge {
        let mut namespaces = self.namespaces.lock();

        if let Some(state) = namespaces.get(namespace)
            && !state.closed.load(Ordering::Acquire)
        {
            return self.handle(Arc::clone(state));
        }

        let topic = self.topics.bridge(namespace);
        let state = Arc::new(NamespaceState {
            namespace: namespace.to_string(),
            topic: topic.clone(),
            listeners: ListenerMap::new(),
            subscription: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        let on_message: MessageHandler = {
            let weak = Arc::downgrade(&state);
            Arc::new(move |data| {
                if let Some(state) = weak.upgrade() {
                    state.deliver(data);
                }
            })
        };
        *state.subscription.lock() = Some(self.broadcast.subscribe(&topic, on_message));

        namespaces.insert(namespace.to_string(), Arc::clone(&state));
        debug!(namespace = %namespace, topic = %topic, "Bridge opened");

        self.handle(state)
    }

    /// Names of the open namespaces, sorted.
    #[must_use]
    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.namespaces.lock().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Closes every open bridge.
    pub fn close_all(&self) {
        let states: Vec<_> = self.namespaces.lock().values().cloned().collect();
        for state in states {
            self.handle(state).close();
        }
    }

    fn handle(&self, state: Arc<NamespaceState>) -> Bridge {
        Bridge {
            state,
            broadcast: Arc::clone(&self.broadcast),
            registry: Arc::downgrade(&self.namespaces),
        }
    }
}

impl fmt::Debug for BridgeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeRegistry")
            .field("namespace", &self.topics.namespace())
            .field("open", &self.namespaces())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Bridge
// ============================================================================

/// Handle to one open namespace.
#[derive(Clone)]
pub struct Bridge {
    state: Arc<NamespaceState>,
    broadcast: Arc<dyn BroadcastTransport>,
    registry: Weak<Mutex<NamespaceMap>>,
}

impl Bridge {
    /// Publishes `event` to every other context on this namespace.
    ///
    /// Sending on a closed bridge is logged and ignored.
    ///
    /// # Errors
    ///
    /// Propagates transport errors other than [`Error::TransportClosed`].
    pub fn send(&self, event: &str, data: Value) -> Result<()> {
        if self.is_closed() {
            warn!(namespace = %self.state.namespace, event = %event, "Send on closed bridge ignored");
            return Ok(());
        }

        let message = encode(&BridgeMessage::new(event, Some(data)))?;
        match self.broadcast.publish(&self.state.topic, message) {
            Ok(()) => {
                trace!(namespace = %self.state.namespace, event = %event, "Bridge message sent");
                Ok(())
            }
            Err(Error::TransportClosed { topic }) => {
                warn!(topic = %topic, event = %event, "Send on released channel ignored");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Registers `handler` for `event`.
    pub fn on<F>(&self, event: &str, handler: F) -> Subscription
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        if self.is_closed() {
            debug!(namespace = %self.state.namespace, event = %event, "Listener on closed bridge ignored");
            return Subscription::noop();
        }

        let id = self.state.listeners.add(event, Arc::new(handler));
        let weak = Arc::downgrade(&self.state);
        let event = event.to_string();
        Subscription::new(move || {
            if let Some(state) = weak.upgrade() {
                state.listeners.remove(&event, id);
            }
        })
    }

    /// Registers a handler receiving payloads decoded into `T`.
    ///
    /// Payloads that do not decode are logged and dropped.
    pub fn on_typed<T, F>(&self, event: &str, handler: F) -> Subscription
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        let name = event.to_string();
        self.on(event, move |data| match serde_json::from_value::<T>(data) {
            Ok(value) => handler(value),
            Err(e) => warn!(event = %name, error = %e, "Dropped undecodable bridge payload"),
        })
    }

    /// Unsubscribes this namespace entry from the transport and drops every
    /// listener. Idempotent.
    ///
    /// The topic itself stays open on the endpoint: other registries sharing
    /// the endpoint keep their own bridges on the same namespace.
    pub fn close(&self) {
        let state = &self.state;
        if state.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(subscription) = state.subscription.lock().take() {
            subscription.unsubscribe();
        }
        state.listeners.clear();

        if let Some(registry) = self.registry.upgrade() {
            let mut namespaces = registry.lock();
            if namespaces
                .get(&state.namespace)
                .is_some_and(|current| Arc::ptr_eq(current, state))
            {
                namespaces.remove(&state.namespace);
            }
        }

        debug!(namespace = %state.namespace, "Bridge closed");
    }

    /// Bridge namespace.
    #[inline]
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.state.namespace
    }

    /// Returns `true` once closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    /// Number of listeners registered for `event`.
    #[inline]
    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.state.listeners.count(event)
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("namespace", &self.state.namespace)
            .field("topic", &self.state.topic)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use serde::Deserialize;
    use serde_json::json;

    use crate::transport::MemoryHub;

    fn registries() -> (MemoryHub, BridgeRegistry, BridgeRegistry) {
        let hub = MemoryHub::new();
        let a = BridgeRegistry::new(Arc::new(hub.endpoint()), Topics::default());
        let b = BridgeRegistry::new(Arc::new(hub.endpoint()), Topics::default());
        (hub, a, b)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    #[tokio::test]
    async fn test_ping_delivered_once() {
        let (_hub, a, b) = registries();
        let sender = a.open("x");
        let receiver = b.open("x");

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _sub = receiver.on("ping", move |data| {
            let _ = tx.send(data);
        });

        sender.send("ping", json!({ "n": 1 })).expect("send");

        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("delivered");
        assert_eq!(got, Some(json!({ "n": 1 })));

        settle().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_namespace_isolation() {
        let (_hub, a, b) = registries();
        let network = a.open("network");
        let console = b.open("console");

        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let _sub = console.on("log", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        network.send("log", json!("request")).expect("send");
        settle().await;

        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sender_does_not_receive_own_message() {
        let (_hub, a, _b) = registries();
        let bridge = a.open("x");

        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let _sub = bridge.on("ping", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        bridge.send("ping", Value::Null).expect("send");
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_silences_listeners() {
        let (_hub, a, b) = registries();
        let sender = a.open("x");
        let receiver = b.open("x");

        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let _sub = receiver.on("ping", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        receiver.close();
        receiver.close();
        assert!(receiver.is_closed());
        assert_eq!(receiver.listener_count("ping"), 0);
        assert!(b.namespaces().is_empty());

        sender.send("ping", Value::Null).expect("send");
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_send_after_close_is_silent() {
        let (_hub, a, _b) = registries();
        let bridge = a.open("x");
        bridge.close();
        assert!(bridge.send("ping", json!(1)).is_ok());
    }

    #[tokio::test]
    async fn test_close_does_not_affect_other_namespaces() {
        let (_hub, a, b) = registries();
        let x = b.open("x");
        let y = b.open("y");
        let y_sender = a.open("y");

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _sub = y.on("ping", move |data| {
            let _ = tx.send(data);
        });

        x.close();
        y_sender.send("ping", json!("still here")).expect("send");

        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("delivered");
        assert_eq!(got, Some(json!("still here")));
        assert_eq!(b.namespaces(), vec!["y".to_string()]);
    }

    #[tokio::test]
    async fn test_close_leaves_other_registry_on_same_endpoint() {
        let hub = MemoryHub::new();
        let endpoint: Arc<dyn BroadcastTransport> = Arc::new(hub.endpoint());
        let root = BridgeRegistry::new(Arc::clone(&endpoint), Topics::default());
        let scratch = BridgeRegistry::new(endpoint, Topics::default());
        let peer = BridgeRegistry::new(Arc::new(hub.endpoint()), Topics::default());

        let kept = root.open("console");
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _sub = kept.on("log", move |data| {
            let _ = tx.send(data);
        });

        scratch.open("console").close();
        assert!(!kept.is_closed());

        peer.open("console").send("log", json!("after close")).expect("send");
        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("delivered");
        assert_eq!(got, Some(json!("after close")));

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _peer_sub = peer.open("console").on("log", move |data| {
            let _ = tx.send(data);
        });
        kept.send("log", json!("outbound")).expect("send");
        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("delivered");
        assert_eq!(got, Some(json!("outbound")));
    }

    #[tokio::test]
    async fn test_open_twice_shares_entry() {
        let (_hub, a, _b) = registries();
        let first = a.open("x");
        let second = a.open("x");

        let _sub = first.on("ping", |_| {});
        assert_eq!(second.listener_count("ping"), 1);

        second.close();
        assert!(first.is_closed());

        let reopened = a.open("x");
        assert!(!reopened.is_closed());
        assert_eq!(reopened.listener_count("ping"), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_one_listener() {
        let (_hub, a, _b) = registries();
        let bridge = a.open("x");

        let first = bridge.on("ping", |_| {});
        let _second = bridge.on("ping", |_| {});
        assert_eq!(bridge.listener_count("ping"), 2);

        first.unsubscribe();
        assert_eq!(bridge.listener_count("ping"), 1);
    }

    #[tokio::test]
    async fn test_on_typed() {
        #[derive(Deserialize)]
        struct Ping {
            n: u32,
        }

        let (_hub, a, b) = registries();
        let sender = a.open("x");
        let receiver = b.open("x");

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _sub = receiver.on_typed("ping", move |ping: Ping| {
            let _ = tx.send(ping.n);
        });

        sender.send("ping", json!({ "n": "bad" })).expect("send");
        sender.send("ping", json!({ "n": 7 })).expect("send");

        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("delivered");
        assert_eq!(got, Some(7));
    }
}
