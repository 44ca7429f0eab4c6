//! Deployment options shared by every component of one context.
//!
//! Defaults match the peers already deployed, so a context built from
//! [`BridgeOptions::default()`] interoperates with them without tuning.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use devtools_bridge::BridgeOptions;
//!
//! let options = BridgeOptions::new()
//!     .with_namespace("my-tools")
//!     .with_rpc_timeout(Duration::from_secs(10));
//!
//! options.validate()?;
//! ```
//!
//! # JSON form
//!
//! ```json
//! { "namespace": "u-devtools", "rpcTimeout": 5000, "stateQueryTimeout": 200, "maxPendingCalls": 100 }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::protocol::{DEFAULT_NAMESPACE, Topics};

// ============================================================================
// Constants
// ============================================================================

/// Default RPC call timeout.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default wait for a `state-response`.
pub const DEFAULT_STATE_QUERY_TIMEOUT: Duration = Duration::from_millis(200);

/// Default cap on calls awaiting a response.
pub const DEFAULT_MAX_PENDING_CALLS: usize = 100;

// ============================================================================
// BridgeOptions
// ============================================================================

/// Options of one context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeOptions {
    /// Prefix of every topic.
    pub namespace: String,

    /// Deadline of an RPC call.
    #[serde(with = "duration_ms")]
    pub rpc_timeout: Duration,

    /// How long a state query waits for the owner.
    #[serde(with = "duration_ms")]
    pub state_query_timeout: Duration,

    /// Maximum number of calls awaiting a response per requester.
    pub max_pending_calls: usize,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl BridgeOptions {
    /// Creates options with the default values.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            state_query_timeout: DEFAULT_STATE_QUERY_TIMEOUT,
            max_pending_calls: DEFAULT_MAX_PENDING_CALLS,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl BridgeOptions {
    /// Sets the topic namespace.
    #[inline]
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Sets the RPC call timeout.
    #[inline]
    #[must_use]
    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    /// Sets the state query timeout.
    #[inline]
    #[must_use]
    pub fn with_state_query_timeout(mut self, timeout: Duration) -> Self {
        self.state_query_timeout = timeout;
        self
    }

    /// Sets the pending call cap.
    #[inline]
    #[must_use]
    pub fn with_max_pending_calls(mut self, max: usize) -> Self {
        self.max_pending_calls = max;
        self
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl BridgeOptions {
    /// Topic names derived from the namespace.
    #[inline]
    #[must_use]
    pub fn topics(&self) -> Topics {
        Topics::new(&self.namespace)
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an empty namespace, a namespace
    /// containing `:`, a zero timeout or a zero pending cap.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(Error::config("Namespace must not be empty"));
        }
        if self.namespace.contains(':') {
            return Err(Error::config(format!(
                "Namespace must not contain ':', got {:?}",
                self.namespace
            )));
        }
        if self.rpc_timeout.is_zero() {
            return Err(Error::config("RPC timeout must be greater than zero"));
        }
        if self.state_query_timeout.is_zero() {
            return Err(Error::config(
                "State query timeout must be greater than zero",
            ));
        }
        if self.max_pending_calls == 0 {
            return Err(Error::config(
                "Pending call cap must be greater than zero",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Duration serde
// ============================================================================

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
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
    fn test_new_creates_default() {
        let options = BridgeOptions::new();
        assert_eq!(options.namespace, "u-devtools");
        assert_eq!(options.rpc_timeout, Duration::from_millis(5000));
        assert_eq!(options.state_query_timeout, Duration::from_millis(200));
        assert_eq!(options.max_pending_calls, 100);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_builder_chain() {
        let options = BridgeOptions::new()
            .with_namespace("tools")
            .with_rpc_timeout(Duration::from_secs(1))
            .with_state_query_timeout(Duration::from_millis(50))
            .with_max_pending_calls(8);

        assert_eq!(options.namespace, "tools");
        assert_eq!(options.rpc_timeout, Duration::from_secs(1));
        assert_eq!(options.state_query_timeout, Duration::from_millis(50));
        assert_eq!(options.max_pending_calls, 8);
        assert_eq!(options.topics().request(), "tools:request");
    }

    #[test]
    fn test_validate_empty_namespace() {
        let options = BridgeOptions::new().with_namespace("");
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_validate_namespace_with_colon() {
        let err = BridgeOptions::new()
            .with_namespace("a:b")
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("':'"));
    }

    #[test]
    fn test_validate_zero_values() {
        assert!(
            BridgeOptions::new()
                .with_rpc_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(
            BridgeOptions::new()
                .with_state_query_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(
            BridgeOptions::new()
                .with_max_pending_calls(0)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_deserialize_partial_json() {
        let options: BridgeOptions =
            serde_json::from_value(json!({ "rpcTimeout": 250, "namespace": "x" }))
                .expect("deserialize");
        assert_eq!(options.namespace, "x");
        assert_eq!(options.rpc_timeout, Duration::from_millis(250));
        assert_eq!(options.state_query_timeout, DEFAULT_STATE_QUERY_TIMEOUT);
    }

    #[test]
    fn test_serialize_uses_millis() {
        let value = serde_json::to_value(BridgeOptions::new()).expect("serialize");
        assert_eq!(value["rpcTimeout"], json!(5000));
        assert_eq!(value["stateQueryTimeout"], json!(200));
        assert_eq!(value["maxPendingCalls"], json!(100));
    }
}
