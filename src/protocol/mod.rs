//! Wire message types.
//!
//! This module defines the envelopes exchanged between execution contexts.
//! All envelopes are JSON values; field names are fixed by existing peers.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `RequestEnvelope` | Requester → Responder | Method call |
//! | `ResponseEnvelope` | Responder → Requester | Call result or error |
//! | `EventEnvelope` | Responder → all Requesters | Push notification |
//! | `BridgeMessage` | Context → Contexts | Namespaced pub/sub event |
//! | `ControlMessage` | Context ↔ State owner | Visibility and selection |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `envelope` | Request, response, event and bridge envelopes |
//! | `control` | State coordinator messages |
//! | `topics` | Topic naming under a namespace |

// ============================================================================
// Submodules
// ============================================================================

/// State coordinator messages.
pub mod control;

/// Request, response, event and bridge envelopes.
pub mod envelope;

/// Topic naming.
pub mod topics;

// ============================================================================
// Re-exports
// ============================================================================

pub use control::ControlMessage;
pub use envelope::{BridgeMessage, EnvelopeType, EventEnvelope, RequestEnvelope, ResponseEnvelope};
pub use topics::{DEFAULT_NAMESPACE, Topics};
