//! Builder pattern for the application root.
//!
//! Provides a fluent API for configuring and creating [`Devtools`]
//! instances.
//!
//! # Example
//!
//! ```ignore
//! use devtools_bridge::{Devtools, MemoryHub};
//!
//! let hub = MemoryHub::new();
//! let devtools = Devtools::builder()
//!     .namespace("u-devtools")
//!     .broadcast(Arc::new(hub.endpoint()))
//!     .build()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::control::SharedState;
use crate::error::{Error, Result};
use crate::transport::BroadcastTransport;

use super::core::Devtools;
use super::options::BridgeOptions;

// ============================================================================
// DevtoolsBuilder
// ============================================================================

/// Builder for configuring a [`Devtools`] instance.
///
/// Use [`Devtools::builder()`] to create a new builder.
#[derive(Default, Clone)]
pub struct DevtoolsBuilder {
    /// Deployment options.
    options: BridgeOptions,
    /// Broadcast endpoint for control and bridges.
    broadcast: Option<Arc<dyn BroadcastTransport>>,
    /// Separate endpoint for the state owner, if this context owns state.
    owner_broadcast: Option<Arc<dyn BroadcastTransport>>,
    /// State the owner starts from.
    initial_state: Option<SharedState>,
}

// ============================================================================
// DevtoolsBuilder Implementation
// ============================================================================

impl DevtoolsBuilder {
    /// Creates a builder with default options and no transport.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces all options at once.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: BridgeOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the topic namespace.
    #[inline]
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.options.namespace = namespace.into();
        self
    }

    /// Sets the RPC call timeout.
    #[inline]
    #[must_use]
    pub fn rpc_timeout(mut self, timeout: Duration) -> Self {
        self.options.rpc_timeout = timeout;
        self
    }

    /// Sets the state query timeout.
    #[inline]
    #[must_use]
    pub fn state_query_timeout(mut self, timeout: Duration) -> Self {
        self.options.state_query_timeout = timeout;
        self
    }

    /// Sets the pending call cap of requesters created by the root.
    #[inline]
    #[must_use]
    pub fn max_pending_calls(mut self, max: usize) -> Self {
        self.options.max_pending_calls = max;
        self
    }

    /// Sets the broadcast endpoint used by the control and the bridges.
    #[inline]
    #[must_use]
    pub fn broadcast(mut self, transport: Arc<dyn BroadcastTransport>) -> Self {
        self.broadcast = Some(transport);
        self
    }

    /// Makes this context the state owner, on its own endpoint.
    ///
    /// The owner must not share the control's endpoint: a sender never
    /// receives its own messages, so the owner would miss this context's
    /// own requests.
    #[inline]
    #[must_use]
    pub fn state_owner(mut self, transport: Arc<dyn BroadcastTransport>) -> Self {
        self.owner_broadcast = Some(transport);
        self
    }

    /// Sets the state the owner starts from, e.g. restored from storage.
    #[inline]
    #[must_use]
    pub fn initial_state(mut self, state: SharedState) -> Self {
        self.initial_state = Some(state);
        self
    }

    /// Builds the application root with validation.
    ///
    /// Must be called within a Tokio runtime when a state owner is set.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the options are invalid
    /// - [`Error::Config`] if no broadcast transport is set
    /// - [`Error::Config`] if an initial state is set without a state owner
    pub fn build(self) -> Result<Devtools> {
        self.options.validate()?;

        let broadcast = self.broadcast.ok_or_else(|| {
            Error::config(
                "Broadcast transport is required. Use .broadcast() to set it.\n\
                 Example: Devtools::builder().broadcast(Arc::new(hub.endpoint()))",
            )
        })?;

        if self.initial_state.is_some() && self.owner_broadcast.is_none() {
            return Err(Error::config(
                "Initial state requires a state owner. Use .state_owner() to set it.",
            ));
        }

        Ok(Devtools::new(
            self.options,
            broadcast,
            self.owner_broadcast,
            self.initial_state.unwrap_or_default(),
        ))
    }
}

impl fmt::Debug for DevtoolsBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DevtoolsBuilder")
            .field("options", &self.options)
            .field("broadcast", &self.broadcast.is_some())
            .field("state_owner", &self.owner_broadcast.is_some())
            .field("initial_state", &self.initial_state)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::transport::MemoryHub;

    #[test]
    fn test_new_creates_default_builder() {
        let builder = DevtoolsBuilder::new();
        assert_eq!(builder.options, BridgeOptions::default());
        assert!(builder.broadcast.is_none());
        assert!(builder.owner_broadcast.is_none());
    }

    #[test]
    fn test_setters() {
        let builder = DevtoolsBuilder::new()
            .namespace("tools")
            .rpc_timeout(Duration::from_secs(2))
            .state_query_timeout(Duration::from_millis(10))
            .max_pending_calls(4);

        assert_eq!(builder.options.namespace, "tools");
        assert_eq!(builder.options.rpc_timeout, Duration::from_secs(2));
        assert_eq!(builder.options.state_query_timeout, Duration::from_millis(10));
        assert_eq!(builder.options.max_pending_calls, 4);
    }

    #[test]
    fn test_build_fails_without_broadcast() {
        let err = DevtoolsBuilder::new().build().unwrap_err();
        assert!(err.to_string().contains("Broadcast transport is required"));
    }

    #[test]
    fn test_build_fails_with_invalid_options() {
        let hub = MemoryHub::new();
        let err = DevtoolsBuilder::new()
            .namespace("")
            .broadcast(Arc::new(hub.endpoint()))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_build_fails_with_orphan_initial_state() {
        let hub = MemoryHub::new();
        let err = DevtoolsBuilder::new()
            .broadcast(Arc::new(hub.endpoint()))
            .initial_state(SharedState::default())
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("state owner"));
    }

    #[test]
    fn test_builder_is_clone() {
        let builder = DevtoolsBuilder::new().namespace("x");
        let cloned = builder.clone();
        assert_eq!(builder.options, cloned.options);
    }
}
