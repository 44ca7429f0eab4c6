//! Correlated request/response channel.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   <ns>:request  {id, method, payload}    ┌──────────────────┐
//! │    Requester     │─────────────────────────────────────────►│    Responder     │
//! │                  │   <ns>:response {id, payload | error}    │                  │
//! │  pending[id]     │◄─────────────────────────────────────────│  methods[name]   │
//! │  events[method]  │   <ns>:event    {method, payload}        │                  │
//! └──────────────────┘◄─────────────────────────────────────────└──────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `handler` | Handler trait and adapters |
//! | `requester` | Client side: calls and event subscriptions |
//! | `responder` | Server side: method registry and broadcasts |

// ============================================================================
// Submodules
// ============================================================================

/// Handler trait and adapters.
pub mod handler;

/// Client side of the channel.
pub mod requester;

/// Server side of the channel.
pub mod responder;

// ============================================================================
// Re-exports
// ============================================================================

pub use handler::{Handler, HandlerResult, SyncHandler, TypedHandler};
pub use requester::Requester;
pub use responder::Responder;
