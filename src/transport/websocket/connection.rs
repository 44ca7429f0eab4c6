//! WebSocket connection and event loop.
//!
//! This module drives one WebSocket, on either the server or the client
//! side, and turns it into a stream of [`Frame`]s.
//!
//! # Event Loop
//!
//! The connection spawns a tokio task that handles:
//!
//! - Incoming text frames (parsed and handed to the frame handler)
//! - Outgoing frames queued by [`Connection::send`]
//! - Shutdown requests and remote close

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, from_str, to_string};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::transport::listeners::invoke_guarded;

// ============================================================================
// Frame
// ============================================================================

/// A custom event frame, as exchanged over a dev-server HMR socket.
///
/// # Format
///
/// ```json
/// { "type": "custom", "event": "u-devtools:request", "data": { ... } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Frame type marker (always "custom").
    #[serde(rename = "type", default = "Frame::custom")]
    pub frame_type: String,

    /// Event name.
    pub event: String,

    /// Event data.
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    /// Creates a custom event frame.
    #[inline]
    #[must_use]
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            frame_type: Self::custom(),
            event: event.into(),
            data,
        }
    }

    fn custom() -> String {
        "custom".to_string()
    }
}

// ============================================================================
// Types
// ============================================================================

/// Callback invoked for every inbound frame.
pub type FrameHandler = Arc<dyn Fn(Frame) + Send + Sync>;

/// Callback invoked once when the event loop ends.
pub type CloseHandler = Box<dyn FnOnce() + Send>;

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the event loop.
enum ConnectionCommand {
    /// Write a frame to the socket.
    Send(Frame),
    /// Close the socket.
    Shutdown,
}

// ============================================================================
// Connection
// ============================================================================

/// One WebSocket, server- or client-side.
///
/// # Thread Safety
///
/// `Connection` is `Send + Sync` and cheap to clone; clones share the
/// same socket. All operations are non-blocking.
#[derive(Clone)]
pub struct Connection {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    /// Set once the event loop has terminated.
    closed: Arc<AtomicBool>,
}

impl Connection {
    /// Wraps a WebSocket stream and spawns its event loop.
    pub(crate) fn new<S>(
        ws_stream: WebSocketStream<S>,
        on_frame: FrameHandler,
        on_close: Option<CloseHandler>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(Self::run_event_loop(
            ws_stream,
            command_rx,
            on_frame,
            on_close,
            Arc::clone(&closed),
        ));

        Self { command_tx, closed }
    }

    /// Queues a frame for sending.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the event loop has ended.
    pub fn send(&self, frame: Frame) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        self.command_tx
            .send(ConnectionCommand::Send(frame))
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Returns `true` once the socket is closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes the socket gracefully.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(ConnectionCommand::Shutdown);
    }

    /// Event loop that handles WebSocket I/O.
    async fn run_event_loop<S>(
        ws_stream: WebSocketStream<S>,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        on_frame: FrameHandler,
        on_close: Option<CloseHandler>,
        closed: Arc<AtomicBool>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        loop {
            tokio::select! {
                // Incoming frames from the peer
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            Self::handle_incoming_message(&text, &on_frame);
                        }

                        Some(Ok(Message::Close(_))) => {
                            debug!("WebSocket closed by remote");
                            break;
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            break;
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break;
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                // Frames queued locally
                command = command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Send(frame)) => {
                            let json = match to_string(&frame) {
                                Ok(json) => json,
                                Err(e) => {
                                    warn!(error = %e, event = %frame.event, "Failed to serialize frame");
                                    continue;
                                }
                            };

                            if let Err(e) = ws_write.send(Message::Text(json.into())).await {
                                warn!(error = %e, event = %frame.event, "Failed to send frame");
                                break;
                            }

                            trace!(event = %frame.event, "Frame sent");
                        }

                        Some(ConnectionCommand::Shutdown) => {
                            debug!("Shutdown command received");
                            let _ = ws_write.close().await;
                            break;
                        }

                        None => {
                            debug!("Command channel closed");
                            break;
                        }
                    }
                }
            }
        }

        closed.store(true, Ordering::Release);

        if let Some(on_close) = on_close {
            on_close();
        }

        debug!("Event loop terminated");
    }

    /// Parses and dispatches an incoming text frame.
    fn handle_incoming_message(text: &str, on_frame: &FrameHandler) {
        match from_str::<Frame>(text) {
            Ok(frame) => {
                trace!(event = %frame.event, "Frame received");
                let event = frame.event.clone();
                invoke_guarded(&event, || on_frame(frame));
            }
            Err(e) => {
                warn!(error = %e, "Dropped malformed frame");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_frame_format() {
        let frame = Frame::new("u-devtools:request", json!({ "id": "a" }));
        let value = serde_json::to_value(&frame).expect("serialize");
        assert_eq!(
            value,
            json!({ "type": "custom", "event": "u-devtools:request", "data": { "id": "a" } })
        );
    }

    #[test]
    fn test_frame_defaults() {
        let frame: Frame = from_str(r#"{ "event": "x" }"#).expect("parse");
        assert_eq!(frame.frame_type, "custom");
        assert_eq!(frame.data, Value::Null);
    }

    #[test]
    fn test_frame_requires_event() {
        assert!(from_str::<Frame>(r#"{ "type": "custom" }"#).is_err());
    }
}
