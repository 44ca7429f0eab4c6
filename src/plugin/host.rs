//! Server-side plugin loading.
//!
//! Each plugin gets a [`PluginScope`] and the [`ServerContext`] and
//! registers its handlers. One plugin failing to set up does not stop the
//! others from loading.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};

use crate::error::{self, Error, HandlerError};
use crate::rpc::Responder;

use super::scope::PluginScope;

// ============================================================================
// Constants
// ============================================================================

/// Built-in method listing the registered plugins.
pub const GET_PLUGINS_METHOD: &str = "sys:getPlugins";

// ============================================================================
// ServerContext
// ============================================================================

/// Environment handed to every plugin at setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerContext {
    /// Project root directory.
    pub root: PathBuf,
}

impl ServerContext {
    /// Creates a context rooted at `root`.
    #[inline]
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

// ============================================================================
// DevtoolsPlugin
// ============================================================================

/// A plugin contributing server-side handlers.
///
/// # Example
///
/// ```ignore
/// struct Terminal;
///
/// impl DevtoolsPlugin for Terminal {
///     fn name(&self) -> &str {
///         "terminal"
///     }
///
///     fn setup_server(&self, scope: &PluginScope, ctx: &ServerContext) -> Result<(), HandlerError> {
///         let root = ctx.root.clone();
///         scope.handle_sync("cwd", move |_| Ok(json!(root.display().to_string())));
///         Ok(())
///     }
/// }
/// ```
pub trait DevtoolsPlugin: Send + Sync {
    /// Unique plugin name, used as method prefix.
    fn name(&self) -> &str;

    /// Registers the plugin's handlers.
    ///
    /// # Errors
    ///
    /// Any error is logged by the host; the plugin stays listed.
    fn setup_server(&self, scope: &PluginScope, ctx: &ServerContext) -> Result<(), HandlerError>;
}

// ============================================================================
// PluginHost
// ============================================================================

/// Entry returned by `sys:getPlugins`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Plugin name.
    pub name: String,
}

/// Loads plugins onto a shared responder.
pub struct PluginHost {
    responder: Arc<Responder>,
    ctx: ServerContext,
    plugins: Arc<RwLock<Vec<PluginInfo>>>,
}

impl PluginHost {
    /// Creates a host and registers `sys:getPlugins` on `responder`.
    #[must_use]
    pub fn new(responder: Arc<Responder>, ctx: ServerContext) -> Self {
        let plugins: Arc<RwLock<Vec<PluginInfo>>> = Arc::new(RwLock::new(Vec::new()));

        let listed = Arc::clone(&plugins);
        responder.handle_sync(GET_PLUGINS_METHOD, move |_| {
            Ok(serde_json::to_value(&*listed.read())?)
        });

        Self {
            responder,
            ctx,
            plugins,
        }
    }

    /// Sets up `plugin`. Returns `false` if its setup failed or panicked.
    pub fn register(&self, plugin: &dyn DevtoolsPlugin) -> bool {
        let name = plugin.name().to_string();
        self.plugins.write().push(PluginInfo { name: name.clone() });

        let scope = PluginScope::new(Arc::clone(&self.responder), name.as_str());
        match catch_unwind(AssertUnwindSafe(|| plugin.setup_server(&scope, &self.ctx))) {
            Ok(Ok(())) => {
                info!(plugin = %name, "Plugin loaded");
                true
            }
            Ok(Err(e)) => {
                error!(plugin = %name, error = %e, "Error setting up plugin");
                false
            }
            Err(_) => {
                error!(plugin = %name, "Plugin setup panicked");
                false
            }
        }
    }

    /// Sets up every plugin in order. Returns how many loaded cleanly.
    pub fn register_all<'a>(&self, plugins: impl IntoIterator<Item = &'a dyn DevtoolsPlugin>) -> usize {
        plugins
            .into_iter()
            .filter(|plugin| self.register(*plugin))
            .count()
    }

    /// Names of the registered plugins, in registration order.
    #[must_use]
    pub fn plugin_names(&self) -> Vec<String> {
        self.plugins.read().iter().map(|p| p.name.clone()).collect()
    }

    /// Context handed to plugins.
    #[inline]
    #[must_use]
    pub fn context(&self) -> &ServerContext {
        &self.ctx
    }

    /// The shared responder.
    #[inline]
    #[must_use]
    pub fn responder(&self) -> &Arc<Responder> {
        &self.responder
    }
}

impl fmt::Debug for PluginHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginHost")
            .field("root", &self.ctx.root)
            .field("plugins", &self.plugin_names())
            .finish_non_exhaustive()
    }
}

/// Decodes a `sys:getPlugins` result.
///
/// # Errors
///
/// Returns [`Error::Protocol`] when `value` is not a plugin list.
pub fn parse_plugin_list(value: Value) -> error::Result<Vec<PluginInfo>> {
    serde_json::from_value(value).map_err(|e| Error::protocol(format!("Malformed plugin list: {e}")))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use serde_json::json;

    use crate::context::BridgeOptions;
    use crate::rpc::Requester;
    use crate::transport::MemoryServer;

    struct Echo;

    impl DevtoolsPlugin for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn setup_server(&self, scope: &PluginScope, ctx: &ServerContext) -> Result<(), HandlerError> {
            let root = ctx.root.display().to_string();
            scope.handle_sync("root", move |_| Ok(json!(root)));
            Ok(())
        }
    }

    struct Broken;

    impl DevtoolsPlugin for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn setup_server(&self, _scope: &PluginScope, _ctx: &ServerContext) -> Result<(), HandlerError> {
            Err("missing binary".into())
        }
    }

    struct Panicky;

    impl DevtoolsPlugin for Panicky {
        fn name(&self) -> &str {
            "panicky"
        }

        fn setup_server(&self, _scope: &PluginScope, _ctx: &ServerContext) -> Result<(), HandlerError> {
            panic!("setup bug")
        }
    }

    fn setup() -> (PluginHost, Requester) {
        let server = MemoryServer::new();
        let client = server.connect();
        let options = BridgeOptions::new().with_rpc_timeout(Duration::from_millis(500));
        let responder = Arc::new(Responder::new(Arc::new(server), &options).expect("responder"));
        let host = PluginHost::new(responder, ServerContext::new("/project"));
        (host, Requester::new(Arc::new(client), &options))
    }

    #[tokio::test]
    async fn test_failing_plugin_does_not_block_others() {
        let (host, requester) = setup();

        let loaded = host.register_all([&Broken as &dyn DevtoolsPlugin, &Panicky, &Echo]);
        assert_eq!(loaded, 1);
        assert_eq!(host.plugin_names(), vec!["broken", "panicky", "echo"]);

        let root = requester.call("echo:root", Value::Null).await.expect("call");
        assert_eq!(root, json!("/project"));
    }

    #[tokio::test]
    async fn test_get_plugins() {
        let (host, requester) = setup();
        assert!(host.register(&Echo));

        let listed = requester.call(GET_PLUGINS_METHOD, Value::Null).await.expect("call");
        assert_eq!(listed, json!([{ "name": "echo" }]));
        assert_eq!(
            parse_plugin_list(listed).expect("parse"),
            vec![PluginInfo { name: "echo".into() }]
        );
    }

    #[test]
    fn test_malformed_plugin_list_is_protocol_error() {
        let err = parse_plugin_list(json!({ "name": "echo" })).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
        assert!(err.to_string().starts_with("Protocol error: Malformed plugin list"));
    }
}
