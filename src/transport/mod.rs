//! Transport adapters.
//!
//! The messaging core only needs raw send/receive primitives. Hosts plug in
//! whatever carries bytes between their contexts by implementing the traits
//! below; two implementations ship with the crate.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ClientTransport / ServerTransport   ┌──────────────┐
//! │  Requester   │◄─────────────────────────────────────►│  Responder   │
//! │  (tool UI)   │        point-to-point, duplex         │ (dev server) │
//! └──────────────┘                                       └──────────────┘
//!
//! ┌──────────────┐        BroadcastTransport             ┌──────────────┐
//! │ Bridge/State │◄─────────────────────────────────────►│ Bridge/State │
//! │ (host page)  │   topic fan-out, sender excluded      │  (tool UI)   │
//! └──────────────┘                                       └──────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `listeners` | Event-name keyed listener multimap |
//! | `memory` | In-process point-to-point and broadcast transports |
//! | `websocket` | WebSocket point-to-point transport |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;

// ============================================================================
// Submodules
// ============================================================================

/// Event-name keyed listener multimap.
pub mod listeners;

/// In-process transports.
pub mod memory;

/// WebSocket point-to-point transport.
pub mod websocket;

// ============================================================================
// Re-exports
// ============================================================================

pub use listeners::ListenerMap;
pub use memory::{MemoryBroadcast, MemoryClient, MemoryHub, MemoryServer};
pub use websocket::{WsClient, WsServer};

// ============================================================================
// Handler Types
// ============================================================================

/// Callback receiving one inbound message.
pub type MessageHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Callback receiving one inbound request and, when the transport can
/// address callers individually, a channel back to that caller.
pub type RequestHandler = Arc<dyn Fn(Value, Option<Arc<dyn ReplyChannel>>) + Send + Sync>;

// ============================================================================
// Traits
// ============================================================================

/// Client end of a point-to-point channel.
pub trait ClientTransport: Send + Sync {
    /// Sends `data` under `event` to the server.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ConnectionClosed`] if the channel is gone.
    fn send(&self, event: &str, data: Value) -> Result<()>;

    /// Registers a handler for messages arriving under `event`.
    fn on(&self, event: &str, handler: MessageHandler) -> Subscription;
}

/// Server end of a point-to-point channel.
pub trait ServerTransport: Send + Sync {
    /// Sends `data` under `event` to every connected client.
    ///
    /// # Errors
    ///
    /// Returns an error only if the transport itself is unusable.
    fn send(&self, event: &str, data: Value) -> Result<()>;

    /// Registers a handler for messages arriving under `event`.
    fn on(&self, event: &str, handler: RequestHandler) -> Subscription;
}

/// Channel addressing a single caller.
pub trait ReplyChannel: Send + Sync {
    /// Sends `data` under `event` to the caller only.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ConnectionClosed`] if the caller disconnected.
    fn send(&self, event: &str, data: Value) -> Result<()>;
}

/// Topic-based fan-out where a sender never receives its own messages.
pub trait BroadcastTransport: Send + Sync {
    /// Publishes `data` on `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::TransportClosed`] if `topic` was released on
    /// this endpoint.
    fn publish(&self, topic: &str, data: Value) -> Result<()>;

    /// Subscribes to `topic`.
    fn subscribe(&self, topic: &str, handler: MessageHandler) -> Subscription;

    /// Releases this endpoint's handle on `topic`.
    fn release(&self, topic: &str);
}

// ============================================================================
// Subscription
// ============================================================================

/// Handle removing one registered handler.
///
/// Dropping the handle leaves the handler registered; call
/// [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Creates a handle running `cancel` on unsubscribe.
    #[inline]
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Creates a handle with nothing to undo.
    #[inline]
    #[must_use]
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    /// Removes the handler. Only this handler instance is affected.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_unsubscribe_runs_cancel_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let subscription = Subscription::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        subscription.unsubscribe();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_keeps_handler() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        drop(Subscription::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_noop_subscription() {
        Subscription::noop().unsubscribe();
    }
}
