//! WebSocket client side of the point-to-point transport.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, info, trace};
use url::Url;

use crate::error::{Error, Result};
use crate::transport::listeners::{ListenerMap, invoke_guarded};
use crate::transport::{ClientTransport, MessageHandler, Subscription};

use super::connection::{Connection, Frame, FrameHandler};

// ============================================================================
// Constants
// ============================================================================

/// Timeout for the TCP connect and WebSocket handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// WsClient
// ============================================================================

/// WebSocket client connected to a [`super::WsServer`] or any peer
/// speaking the same frame format.
///
/// # Example
///
/// ```ignore
/// let client = WsClient::connect("ws://127.0.0.1:5173").await?;
/// let requester = Requester::new(Arc::new(client), &options);
/// ```
pub struct WsClient {
    url: Url,
    connection: Connection,
    listeners: Arc<ListenerMap<MessageHandler>>,
}

impl WsClient {
    /// Connects to `url` (`ws://` or `wss://`).
    ///
    /// # Errors
    ///
    /// - [`Error::Url`] if `url` does not parse
    /// - [`Error::Config`] if the scheme is not `ws` or `wss`
    /// - [`Error::Connection`] if the handshake does not finish within 10s
    /// - [`Error::WebSocket`] if the handshake fails
    pub async fn connect(url: &str) -> Result<Self> {
        let url = Url::parse(url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "WebSocket URL must use ws:// or wss://, got {}",
                url.scheme()
            )));
        }

        let handshake = tokio_tungstenite::connect_async(url.as_str());
        let (ws_stream, _response) = timeout(CONNECT_TIMEOUT, handshake)
            .await
            .map_err(|_| {
                Error::connection(format!(
                    "Timed out after {}ms connecting to {url}",
                    CONNECT_TIMEOUT.as_millis()
                ))
            })??;

        let listeners: Arc<ListenerMap<MessageHandler>> = Arc::new(ListenerMap::new());

        let on_frame: FrameHandler = {
            let listeners = Arc::clone(&listeners);
            Arc::new(move |frame: Frame| {
                let handlers = listeners.snapshot(&frame.event);
                if handlers.is_empty() {
                    trace!(event = %frame.event, "No handler for frame");
                }
                for handler in handlers {
                    let data = frame.data.clone();
                    invoke_guarded(&frame.event, || handler(data));
                }
            })
        };

        let connection = Connection::new(ws_stream, on_frame, None);

        info!(url = %url, "WebSocket client connected");

        Ok(Self {
            url,
            connection,
            listeners,
        })
    }

    /// The URL this client connected to.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns `true` once the socket is closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    /// Closes the socket.
    pub fn close(&self) {
        debug!(url = %self.url, "Closing WebSocket client");
        self.connection.shutdown();
    }
}

impl ClientTransport for WsClient {
    fn send(&self, event: &str, data: Value) -> Result<()> {
        self.connection.send(Frame::new(event, data))
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

impl Drop for WsClient {
    fn drop(&mut self) {
        self.connection.shutdown();
    }
}

impl fmt::Debug for WsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsClient")
            .field("url", &self.url.as_str())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
