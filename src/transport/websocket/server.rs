//! WebSocket server side of the point-to-point transport.
//!
//! Plays the dev server's role: every tool UI connects here, requests are
//! handed to handlers with a reply channel addressing the calling client,
//! and `send` fans out to every connected client.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │               WsServer                  │
//! │             (single port)               │
//! │  ┌─────────────────────────────────┐    │
//! │  │ ClientId=1 → Connection 1       │    │
//! │  │ ClientId=2 → Connection 2       │    │
//! │  └─────────────────────────────────┘    │
//! └─────────────────────────────────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::ClientId;
use crate::transport::listeners::{ListenerMap, invoke_guarded};
use crate::transport::{ReplyChannel, RequestHandler, ServerTransport, Subscription};

use super::connection::{CloseHandler, Connection, Frame, FrameHandler};

// ============================================================================
// Constants
// ============================================================================

/// Default bind address (localhost).
const DEFAULT_BIND_IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

// ============================================================================
// WsServer
// ============================================================================

/// WebSocket server accepting any number of clients.
///
/// # Example
///
/// ```ignore
/// let server = WsServer::bind_localhost(0).await?;
/// println!("Connect to {}", server.ws_url());
///
/// let responder = Responder::new(server.clone(), &options)?;
/// ```
pub struct WsServer {
    /// Bound address.
    local_addr: SocketAddr,

    /// Active connections by client id.
    connections: RwLock<FxHashMap<ClientId, Connection>>,

    /// Handlers by event name.
    listeners: Arc<ListenerMap<RequestHandler>>,

    /// Shutdown flag.
    shutdown: AtomicBool,

    /// Wakes the accept loop on shutdown.
    shutdown_notify: Notify,
}

// ============================================================================
// WsServer - Constructor
// ============================================================================

impl WsServer {
    /// Binds to `localhost:port` (0 for a random port) and starts accepting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind_localhost(port: u16) -> Result<Arc<Self>> {
        Self::bind(SocketAddr::new(DEFAULT_BIND_IP, port)).await
    }

    /// Binds to `addr` and starts accepting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind(addr: SocketAddr) -> Result<Arc<Self>> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let server = Arc::new(Self {
            local_addr,
            connections: RwLock::new(FxHashMap::default()),
            listeners: Arc::new(ListenerMap::new()),
            shutdown: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
        });

        let accept = Arc::clone(&server);
        tokio::spawn(async move {
            accept.accept_loop(listener).await;
        });

        info!(addr = %local_addr, "WebSocket server started");

        Ok(server)
    }
}

// ============================================================================
// WsServer - Public API
// ============================================================================

impl WsServer {
    /// Returns the WebSocket URL for this server.
    ///
    /// Format: `ws://{ip}:{port}`
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    /// Returns the port the server is bound to.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Returns the number of connected clients.
    #[inline]
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Stops accepting and closes every connection.
    pub fn shutdown(&self) {
        info!("WebSocket server shutting down");

        self.shutdown.store(true, Ordering::SeqCst);
        self.shutdown_notify.notify_one();

        let connections: Vec<_> = self.connections.write().drain().collect();
        for (client_id, connection) in connections {
            connection.shutdown();
            debug!(client_id = %client_id, "Connection closed during shutdown");
        }
    }

    /// Sends a frame to one client.
    fn send_to(&self, client_id: ClientId, event: &str, data: Value) -> Result<()> {
        let connection = self
            .connections
            .read()
            .get(&client_id)
            .cloned()
            .ok_or(Error::ConnectionClosed)?;

        connection.send(Frame::new(event, data))
    }
}

// ============================================================================
// WsServer - ServerTransport
// ============================================================================

impl ServerTransport for WsServer {
    fn send(&self, event: &str, data: Value) -> Result<()> {
        let connections: Vec<_> = self.connections.read().values().cloned().collect();

        for connection in &connections {
            if let Err(e) = connection.send(Frame::new(event, data.clone())) {
                trace!(error = %e, event = %event, "Skipped closed connection");
            }
        }

        trace!(event = %event, clients = connections.len(), "Sent to all clients");
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

// ============================================================================
// WsServer - Accept Loop
// ============================================================================

impl WsServer {
    /// Background task that accepts new connections.
    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        debug!("Accept loop started");

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let server = Arc::clone(&self);
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, addr).await {
                                    warn!(error = %e, ?addr, "Connection handling failed");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Accept failed");
                        }
                    }
                }

                _ = self.shutdown_notify.notified() => {
                    break;
                }
            }
        }

        debug!("Accept loop terminated");
    }

    /// Upgrades one TCP stream and registers the connection.
    async fn handle_connection(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        let ws_stream = tokio_tungstenite::accept_async(stream)
            .await
            .map_err(|e| Error::connection(format!("WebSocket upgrade failed: {e}")))?;

        let client_id = ClientId::next();

        let on_frame: FrameHandler = {
            let server = Arc::downgrade(self);
            Arc::new(move |frame: Frame| {
                if let Some(server) = server.upgrade() {
                    server.dispatch(client_id, frame);
                }
            })
        };

        let on_close: CloseHandler = {
            let server = Arc::downgrade(self);
            Box::new(move || {
                if let Some(server) = server.upgrade()
                    && server.connections.write().remove(&client_id).is_some()
                {
                    debug!(client_id = %client_id, "Client disconnected");
                }
            })
        };

        // Registered under the lock so a reply to the first frame finds it.
        {
            let mut connections = self.connections.write();
            let connection = Connection::new(ws_stream, on_frame, Some(on_close));
            connections.insert(client_id, connection);
        }

        info!(client_id = %client_id, ?addr, "WebSocket client connected");
        Ok(())
    }

    /// Hands one inbound frame to every handler of its event.
    fn dispatch(self: &Arc<Self>, client_id: ClientId, frame: Frame) {
        let handlers = self.listeners.snapshot(&frame.event);
        if handlers.is_empty() {
            trace!(event = %frame.event, "No handler for frame");
            return;
        }

        let reply: Arc<dyn ReplyChannel> = Arc::new(WsReply {
            server: Arc::downgrade(self),
            client_id,
        });

        for handler in handlers {
            let data = frame.data.clone();
            let reply = Arc::clone(&reply);
            invoke_guarded(&frame.event, || handler(data, Some(reply)));
        }
    }
}

impl fmt::Debug for WsServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsServer")
            .field("addr", &self.local_addr)
            .field("clients", &self.client_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// WsReply
// ============================================================================

/// Reply channel addressing the client a frame came from.
///
/// Resolved at send time, so a reply to a departed client fails instead
/// of reaching someone else.
struct WsReply {
    server: Weak<WsServer>,
    client_id: ClientId,
}

impl ReplyChannel for WsReply {
    fn send(&self, event: &str, data: Value) -> Result<()> {
        let server = self.server.upgrade().ok_or(Error::ConnectionClosed)?;
        server.send_to(self.client_id, event, data)
    }
}

// ============================================================================
// Tests
// ============================================================================
