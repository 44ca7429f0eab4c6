//! Per-context application root and its configuration.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Devtools`] | Owns every messaging component of one context |
//! | [`DevtoolsBuilder`] | Fluent configuration builder |
//! | [`BridgeOptions`] | Namespace, timeouts and limits |

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder for the application root.
pub mod builder;

/// Application root.
pub mod core;

/// Deployment options.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::DevtoolsBuilder;
pub use self::core::Devtools;
pub use options::{
    BridgeOptions, DEFAULT_MAX_PENDING_CALLS, DEFAULT_RPC_TIMEOUT, DEFAULT_STATE_QUERY_TIMEOUT,
};
