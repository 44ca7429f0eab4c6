//! Topic and channel naming.
//!
//! Every topic is prefixed with the deployment namespace:
//!
//! | Topic | Name |
//! |-------|------|
//! | RPC request | `<ns>:request` |
//! | RPC response | `<ns>:response` |
//! | RPC event | `<ns>:event` |
//! | Control channel | `<ns>:control` |
//! | Bridge | `<ns>:<bridge-namespace>` |

use std::fmt;
use std::sync::Arc;

/// Namespace used by existing peers.
pub const DEFAULT_NAMESPACE: &str = "u-devtools";

/// Topic name factory for one namespace.
#[derive(Clone, PartialEq, Eq)]
pub struct Topics {
    namespace: Arc<str>,
}

impl Topics {
    /// Creates topic names under `namespace`.
    #[must_use]
    pub fn new(namespace: impl AsRef<str>) -> Self {
        Self {
            namespace: Arc::from(namespace.as_ref()),
        }
    }

    /// The namespace prefix.
    #[inline]
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Topic carrying request envelopes.
    #[must_use]
    pub fn request(&self) -> String {
        self.scoped("request")
    }

    /// Topic carrying response envelopes.
    #[must_use]
    pub fn response(&self) -> String {
        self.scoped("response")
    }

    /// Topic carrying event envelopes.
    #[must_use]
    pub fn event(&self) -> String {
        self.scoped("event")
    }

    /// Broadcast topic of the state coordinator.
    #[must_use]
    pub fn control(&self) -> String {
        self.scoped("control")
    }

    /// Broadcast topic of a bridge namespace.
    #[must_use]
    pub fn bridge(&self, bridge_namespace: &str) -> String {
        self.scoped(bridge_namespace)
    }

    /// `type` value of a state change notification.
    #[must_use]
    pub fn state_changed(&self) -> String {
        self.scoped("state-changed")
    }

    /// `type` value of a state query reply.
    #[must_use]
    pub fn state_response(&self) -> String {
        self.scoped("state-response")
    }

    /// Strips this namespace's `<ns>:` prefix, if present.
    #[must_use]
    pub fn strip<'a>(&self, name: &'a str) -> &'a str {
        name.strip_prefix(self.namespace())
            .and_then(|rest| rest.strip_prefix(':'))
            .unwrap_or(name)
    }

    fn scoped(&self, name: &str) -> String {
        format!("{}:{}", self.namespace, name)
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

impl fmt::Debug for Topics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Topics").field(&self.namespace).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_topics() {
        let topics = Topics::default();
        assert_eq!(topics.request(), "u-devtools:request");
        assert_eq!(topics.response(), "u-devtools:response");
        assert_eq!(topics.event(), "u-devtools:event");
        assert_eq!(topics.control(), "u-devtools:control");
        assert_eq!(topics.bridge("console"), "u-devtools:console");
        assert_eq!(topics.state_changed(), "u-devtools:state-changed");
    }

    #[test]
    fn test_strip_prefix() {
        let topics = Topics::new("dt");
        assert_eq!(topics.strip("dt:state-changed"), "state-changed");
        assert_eq!(topics.strip("state-changed"), "state-changed");
        assert_eq!(topics.strip("other:state-changed"), "other:state-changed");
    }
}
