//! In-process transports.
//!
//! Used when several contexts live in one process (embedding hosts, tests,
//! benchmarks). Delivery is asynchronous: every subscriber and every client
//! owns a pump task draining an unbounded queue, so messages from one sender
//! reach one receiver in send order and handlers never run on the sender's
//! stack.
//!
//! All constructors spawn tasks and must be called inside a Tokio runtime.
//!
//! # Example
//!
//! ```ignore
//! let hub = MemoryHub::new();
//! let page = hub.endpoint();
//! let tool = hub.endpoint();
//!
//! tool.subscribe("u-devtools:console", Arc::new(|data| println!("{data}")));
//! page.publish("u-devtools:console", json!({ "event": "log", "data": 1 }))?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::{ClientId, SubscriptionId};

use super::listeners::{ListenerMap, invoke_guarded};
use super::{
    BroadcastTransport, ClientTransport, MessageHandler, ReplyChannel, RequestHandler,
    ServerTransport, Subscription,
};

// ============================================================================
// MemoryHub
// ============================================================================

/// One subscriber of a hub topic.
struct HubSubscriber {
    id: SubscriptionId,
    endpoint: u64,
    active: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<Value>,
}

/// Shared state of a hub.
struct HubInner {
    topics: Mutex<FxHashMap<String, Vec<HubSubscriber>>>,
    next_endpoint: AtomicU64,
}

impl HubInner {
    fn remove(&self, topic: &str, id: SubscriptionId) {
        let mut topics = self.topics.lock();
        if let Some(subscribers) = topics.get_mut(topic) {
            subscribers.retain(|s| s.id != id);
            if subscribers.is_empty() {
                topics.remove(topic);
            }
        }
    }
}

/// Broadcast medium shared by several context endpoints.
///
/// Plays the role `BroadcastChannel` plays between browser contexts.
#[derive(Clone)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl MemoryHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                topics: Mutex::new(FxHashMap::default()),
                next_endpoint: AtomicU64::new(1),
            }),
        }
    }

    /// Creates a new context endpoint attached to this hub.
    #[must_use]
    pub fn endpoint(&self) -> MemoryBroadcast {
        let endpoint = self.inner.next_endpoint.fetch_add(1, Ordering::Relaxed);
        debug!(endpoint, "Hub endpoint created");
        MemoryBroadcast {
            hub: Arc::clone(&self.inner),
            endpoint,
            released: Mutex::new(FxHashSet::default()),
        }
    }

    /// Number of live subscribers on `topic` across all endpoints.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner.topics.lock().get(topic).map_or(0, Vec::len)
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryHub")
            .field("topics", &self.inner.topics.lock().len())
            .finish()
    }
}

// ============================================================================
// MemoryBroadcast
// ============================================================================

/// One context's endpoint on a [`MemoryHub`].
///
/// Messages published through an endpoint are never delivered back to
/// subscribers of the same endpoint.
pub struct MemoryBroadcast {
    hub: Arc<HubInner>,
    endpoint: u64,
    released: Mutex<FxHashSet<String>>,
}

impl MemoryBroadcast {
    /// Numeric id of this endpoint within its hub.
    #[inline]
    #[must_use]
    pub fn endpoint_id(&self) -> u64 {
        self.endpoint
    }
}

impl BroadcastTransport for MemoryBroadcast {
    fn publish(&self, topic: &str, data: Value) -> Result<()> {
        if self.released.lock().contains(topic) {
            return Err(Error::transport_closed(topic));
        }

        let mut topics = self.hub.topics.lock();
        if let Some(subscribers) = topics.get_mut(topic) {
            subscribers.retain(|s| !s.tx.is_closed());
            for subscriber in subscribers.iter().filter(|s| s.endpoint != self.endpoint) {
                let _ = subscriber.tx.send(data.clone());
            }
        }

        trace!(endpoint = self.endpoint, topic = %topic, "Published");
        Ok(())
    }

    fn subscribe(&self, topic: &str, handler: MessageHandler) -> Subscription {
        self.released.lock().remove(topic);

        let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
        let active = Arc::new(AtomicBool::new(true));
        let id = SubscriptionId::next();

        let pump_active = Arc::clone(&active);
        let pump_topic = topic.to_string();
        tokio::spawn(async move {
            while let Some(data) = rx.recv().await {
                if !pump_active.load(Ordering::Acquire) {
                    break;
                }
                invoke_guarded(&pump_topic, || handler(data));
            }
        });

        self.hub
            .topics
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(HubSubscriber {
                id,
                endpoint: self.endpoint,
                active: Arc::clone(&active),
                tx,
            });

        debug!(endpoint = self.endpoint, topic = %topic, %id, "Subscribed");

        let hub = Arc::downgrade(&self.hub);
        let topic = topic.to_string();
        Subscription::new(move || {
            active.store(false, Ordering::Release);
            if let Some(hub) = hub.upgrade() {
                hub.remove(&topic, id);
            }
        })
    }

    fn release(&self, topic: &str) {
        self.released.lock().insert(topic.to_string());

        let mut topics = self.hub.topics.lock();
        if let Some(subscribers) = topics.get_mut(topic) {
            subscribers.retain(|s| {
                if s.endpoint == self.endpoint {
                    s.active.store(false, Ordering::Release);
                    false
                } else {
                    true
                }
            });
            if subscribers.is_empty() {
                topics.remove(topic);
            }
        }

        debug!(endpoint = self.endpoint, topic = %topic, "Released");
    }
}

impl fmt::Debug for MemoryBroadcast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBroadcast")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// MemoryServer
// ============================================================================

/// A message travelling from a client to the server.
struct Inbound {
    client: ClientId,
    event: String,
    data: Value,
}

/// Outbound queue of one client.
type ClientQueue = mpsc::UnboundedSender<(String, Value)>;

/// Connected clients of a server.
type ClientMap = RwLock<FxHashMap<ClientId, (ClientQueue, Arc<AtomicBool>)>>;

/// Server end of an in-process point-to-point channel.
///
/// Any number of [`MemoryClient`]s may connect; each request is handed to
/// handlers together with a reply channel addressing its own client.
#[derive(Clone)]
pub struct MemoryServer {
    listeners: Arc<ListenerMap<RequestHandler>>,
    clients: Arc<ClientMap>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
}

impl MemoryServer {
    /// Creates a server and spawns its dispatch task.
    #[must_use]
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let listeners = Arc::new(ListenerMap::new());
        let clients: Arc<ClientMap> = Arc::new(RwLock::new(FxHashMap::default()));

        tokio::spawn(Self::run_dispatch(
            inbound_rx,
            Arc::clone(&listeners),
            Arc::downgrade(&clients),
        ));

        Self {
            listeners,
            clients,
            inbound_tx,
        }
    }

    /// Connects a new client.
    #[must_use]
    pub fn connect(&self) -> MemoryClient {
        let id = ClientId::next();
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let listeners = Arc::new(ListenerMap::new());

        tokio::spawn(MemoryClient::run_dispatch(
            rx,
            Arc::clone(&listeners),
            Arc::clone(&closed),
        ));

        self.clients
            .write()
            .insert(id, (tx, Arc::clone(&closed)));

        debug!(client_id = %id, "Memory client connected");

        MemoryClient {
            id,
            listeners,
            closed,
            server_tx: self.inbound_tx.clone(),
            clients: Arc::downgrade(&self.clients),
        }
    }

    /// Number of connected clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    /// Delivers client messages to handlers.
    async fn run_dispatch(
        mut inbound_rx: mpsc::UnboundedReceiver<Inbound>,
        listeners: Arc<ListenerMap<RequestHandler>>,
        clients: Weak<ClientMap>,
    ) {
        while let Some(Inbound {
            client,
            event,
            data,
        }) = inbound_rx.recv().await
        {
            let Some(clients) = clients.upgrade() else {
                break;
            };

            let reply: Option<Arc<dyn ReplyChannel>> = clients.read().get(&client).map(
                |(tx, closed)| {
                    Arc::new(MemoryReply {
                        tx: tx.clone(),
                        closed: Arc::clone(closed),
                    }) as Arc<dyn ReplyChannel>
                },
            );

            let Some(reply) = reply else {
                trace!(client_id = %client, event = %event, "Dropped message from departed client");
                continue;
            };

            for handler in listeners.snapshot(&event) {
                let data = data.clone();
                let reply = Arc::clone(&reply);
                invoke_guarded(&event, || handler(data, Some(reply)));
            }
        }

        debug!("Memory server dispatch terminated");
    }
}

impl Default for MemoryServer {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerTransport for MemoryServer {
    fn send(&self, event: &str, data: Value) -> Result<()> {
        let clients = self.clients.read();
        for (tx, _) in clients.values() {
            let _ = tx.send((event.to_string(), data.clone()));
        }
        trace!(event = %event, clients = clients.len(), "Sent to all clients");
        Ok(())
    }

    fn on(&self, event: &str, handler: RequestHandler) -> Subscription {
        let id = self.listeners.add(event, handler);
        let listeners = Arc::downgrade(&self.listeners);
        let event = event.to_string();
        Subscription::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                listeners.remove(&event, id);
            }
        })
    }
}

impl fmt::Debug for MemoryServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryServer")
            .field("clients", &self.client_count())
            .finish_non_exhaustive()
    }
}

/// Reply channel addressing one memory client.
struct MemoryReply {
    tx: ClientQueue,
    closed: Arc<AtomicBool>,
}

impl ReplyChannel for MemoryReply {
    fn send(&self, event: &str, data: Value) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }
        self.tx
            .send((event.to_string(), data))
            .map_err(|_| Error::ConnectionClosed)
    }
}

// ============================================================================
// MemoryClient
// ============================================================================

/// Client end of an in-process point-to-point channel.
///
/// Disconnects from its server when dropped.
pub struct MemoryClient {
    id: ClientId,
    listeners: Arc<ListenerMap<MessageHandler>>,
    closed: Arc<AtomicBool>,
    server_tx: mpsc::UnboundedSender<Inbound>,
    clients: Weak<ClientMap>,
}

impl MemoryClient {
    /// Id assigned by the server.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Disconnects from the server. Later sends fail with
    /// [`Error::ConnectionClosed`].
    pub fn disconnect(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(clients) = self.clients.upgrade() {
            clients.write().remove(&self.id);
        }
        debug!(client_id = %self.id, "Memory client disconnected");
    }

    /// Delivers server messages to handlers.
    async fn run_dispatch(
        mut rx: mpsc::UnboundedReceiver<(String, Value)>,
        listeners: Arc<ListenerMap<MessageHandler>>,
        closed: Arc<AtomicBool>,
    ) {
        while let Some((event, data)) = rx.recv().await {
            if closed.load(Ordering::Acquire) {
                break;
            }
            for handler in listeners.snapshot(&event) {
                let data = data.clone();
                invoke_guarded(&event, || handler(data));
            }
        }
    }
}

impl ClientTransport for MemoryClient {
    fn send(&self, event: &str, data: Value) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }
        self.server_tx
            .send(Inbound {
                client: self.id,
                event: event.to_string(),
                data,
            })
            .map_err(|_| Error::ConnectionClosed)
    }

    fn on(&self, event: &str, handler: MessageHandler) -> Subscription {
        let id = self.listeners.add(event, handler);
        let listeners = Arc::downgrade(&self.listeners);
        let event = event.to_string();
        Subscription::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                listeners.remove(&event, id);
            }
        })
    }
}

impl Drop for MemoryClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl fmt::Debug for MemoryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryClient")
            .field("id", &self.id)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
