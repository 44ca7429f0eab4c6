//! WebSocket point-to-point transport.
//!
//! Carries RPC traffic between the dev server and tool UIs the way a
//! dev-server HMR socket does: every message is a JSON text frame naming a
//! custom event.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Tool UI        │         WebSocket            │  Dev server     │
//! │                 │                              │                 │
//! │  WsClient       │◄────────────────────────────►│  WsServer       │
//! │  → Connection   │      localhost:PORT          │  → Connection*  │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `client` | Client transport |
//! | `connection` | Per-socket event loop and frame format |
//! | `server` | Accepting server transport |

// ============================================================================
// Submodules
// ============================================================================

/// Client transport.
pub mod client;

/// Per-socket event loop and frame format.
pub mod connection;

/// Accepting server transport.
pub mod server;

// ============================================================================
// Re-exports
// ============================================================================

pub use client::WsClient;
pub use connection::{Connection, Frame};
pub use server::WsServer;
