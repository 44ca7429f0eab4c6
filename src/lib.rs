//! Devtools Bridge - messaging substrate for browser-hosted developer tools.
//!
//! This library lets independently built plugins run across several
//! isolated contexts (host page, tool UI, in-page agents, dev server) and
//! talk to each other over transports that only offer raw send/receive.
//!
//! # Architecture
//!
//! Three layers sit on top of pluggable transports:
//!
//! - **RPC**: [`Requester`] and [`Responder`] correlate requests and
//!   responses by id over a point-to-point transport, with timeouts
//! - **Bridges**: [`BridgeRegistry`] multiplexes namespaced pub/sub over one
//!   broadcast transport
//! - **State**: [`DevtoolsControl`] and [`StateOwner`] keep the tool UI's
//!   open/closed flag consistent across contexts
//!
//! ```text
//!  host page                 tool UI                        dev server
//! ┌───────────────┐        ┌───────────────┐  WebSocket    ┌───────────────┐
//! │DevtoolsControl│◄──────►│ StateOwner    │               │               │
//! │ Bridge        │◄──────►│ Bridge        │               │               │
//! │               │ broad- │ Requester     │◄─────────────►│ Responder     │
//! └───────────────┘ cast   └───────────────┘               │ PluginHost    │
//!                                                          └───────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use devtools_bridge::{Devtools, HandlerError, MemoryHub, MemoryServer, Result};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let hub = MemoryHub::new();
//!     let server = MemoryServer::new();
//!
//!     let devtools = Devtools::builder()
//!         .broadcast(Arc::new(hub.endpoint()))
//!         .build()?;
//!
//!     let responder = devtools.responder(Arc::new(server.clone()))?;
//!     responder.handle("math:add", |p: serde_json::Value| async move {
//!         Ok::<_, HandlerError>(json!(p["a"].as_i64().unwrap_or(0) + p["b"].as_i64().unwrap_or(0)))
//!     });
//!
//!     let rpc = devtools.requester(Arc::new(server.connect()));
//!     assert_eq!(rpc.call("math:add", json!({ "a": 5, "b": 3 })).await?, json!(8));
//!
//!     devtools.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`bridge`] | Namespaced pub/sub: [`BridgeRegistry`], [`Bridge`] |
//! | [`context`] | Application root: [`Devtools`], [`BridgeOptions`] |
//! | [`control`] | Open/closed state: [`DevtoolsControl`], [`StateOwner`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`plugin`] | Per-plugin name routing and loading |
//! | [`protocol`] | Wire envelopes and topic names |
//! | [`rpc`] | Correlated request/response |
//! | [`transport`] | Transport traits, memory and WebSocket transports |

// ============================================================================
// Modules
// ============================================================================

/// Namespaced publish/subscribe.
pub mod bridge;

/// Application root and configuration.
///
/// Use [`Devtools::builder()`] to create a configured root.
pub mod context;

/// Cross-context open/closed state.
pub mod control;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Plugin message routing.
pub mod plugin;

/// Wire envelopes, control messages and topic naming.
pub mod protocol;

/// Correlated request/response channel.
pub mod rpc;

/// Transport traits and bundled transports.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Application root
pub use context::{BridgeOptions, Devtools, DevtoolsBuilder};

// Messaging components
pub use bridge::{Bridge, BridgeRegistry};
pub use control::{DevtoolsControl, Selection, SharedState, StateOwner};
pub use rpc::{Handler, HandlerResult, Requester, Responder};

// Plugins
pub use plugin::{DevtoolsPlugin, PluginClient, PluginHost, PluginScope, ServerContext};

// Error types
pub use error::{Error, HandlerError, Result};

// Protocol
pub use protocol::{DEFAULT_NAMESPACE, Topics};

// Identifier types
pub use identifiers::{CallId, ClientId, SubscriptionId};

// Transports
pub use transport::{
    BroadcastTransport, ClientTransport, MemoryBroadcast, MemoryClient, MemoryHub, MemoryServer,
    ReplyChannel, ServerTransport, Subscription, WsClient, WsServer,
};
