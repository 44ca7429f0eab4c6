//! Plugin message routing.
//!
//! Independently authored plugins share one responder and one requester.
//! Prefixing every method and event with the plugin name keeps their
//! registrations from colliding.
//!
//! | Side | Type | `run` becomes |
//! |------|------|---------------|
//! | Server | [`PluginScope`] | `terminal:run` |
//! | UI | [`PluginClient`] | `terminal:run` |

// ============================================================================
// Submodules
// ============================================================================

/// Plugin loading on the server side.
pub mod host;

/// Name-prefixing views of the responder and requester.
pub mod scope;

// ============================================================================
// Re-exports
// ============================================================================

pub use host::{DevtoolsPlugin, GET_PLUGINS_METHOD, PluginHost, PluginInfo, ServerContext, parse_plugin_list};
pub use scope::{PluginClient, PluginScope, qualify};
