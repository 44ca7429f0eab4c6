//! Per-plugin name prefixing on both ends of the RPC channel.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{HandlerError, Result};
use crate::rpc::{Handler, HandlerResult, Requester, Responder};
use crate::transport::Subscription;

/// Joins a plugin name and a method or event name.
#[inline]
#[must_use]
pub fn qualify(plugin: &str, name: &str) -> String {
    format!("{plugin}:{name}")
}

// ============================================================================
// PluginScope
// ============================================================================

/// Server-side view of the shared responder for one plugin.
///
/// `scope.handle("run", h)` registers `"<plugin>:run"`.
#[derive(Clone)]
pub struct PluginScope {
    responder: Arc<Responder>,
    plugin: String,
}

impl PluginScope {
    /// Scopes `responder` to `plugin`.
    #[must_use]
    pub fn new(responder: Arc<Responder>, plugin: impl Into<String>) -> Self {
        Self {
            responder,
            plugin: plugin.into(),
        }
    }

    /// Plugin name.
    #[inline]
    #[must_use]
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Registers `handler` for `<plugin>:<method>`.
    pub fn handle<H: Handler>(&self, method: &str, handler: H) {
        self.responder.handle(qualify(&self.plugin, method), handler);
    }

    /// Registers a synchronous handler for `<plugin>:<method>`.
    pub fn handle_sync<F>(&self, method: &str, func: F)
    where
        F: Fn(Value) -> HandlerResult + Send + Sync + 'static,
    {
        self.responder
            .handle_sync(qualify(&self.plugin, method), func);
    }

    /// Registers a typed handler for `<plugin>:<method>`.
    pub fn handle_typed<F, Fut, Req, Res>(&self, method: &str, func: F)
    where
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Res, HandlerError>> + Send + 'static,
        Req: DeserializeOwned + Send + 'static,
        Res: Serialize + Send + 'static,
    {
        self.responder
            .handle_typed(qualify(&self.plugin, method), func);
    }

    /// Broadcasts `<plugin>:<event>` to every requester.
    ///
    /// # Errors
    ///
    /// Returns an error only if the transport itself is unusable.
    pub fn broadcast(&self, event: &str, payload: Value) -> Result<()> {
        self.responder
            .broadcast(&qualify(&self.plugin, event), payload)
    }

    /// The unscoped responder, for plugins that register foreign names.
    #[inline]
    #[must_use]
    pub fn responder(&self) -> &Arc<Responder> {
        &self.responder
    }
}

impl fmt::Debug for PluginScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginScope")
            .field("plugin", &self.plugin)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// PluginClient
// ============================================================================

/// UI-side view of the shared requester for one plugin.
///
/// `client.call("run", p)` calls `"<plugin>:run"`.
#[derive(Clone)]
pub struct PluginClient {
    requester: Requester,
    plugin: String,
}

impl PluginClient {
    /// Scopes `requester` to `plugin`.
    #[must_use]
    pub fn new(requester: Requester, plugin: impl Into<String>) -> Self {
        Self {
            requester,
            plugin: plugin.into(),
        }
    }

    /// Plugin name.
    #[inline]
    #[must_use]
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Calls `<plugin>:<method>`.
    ///
    /// # Errors
    ///
    /// Same as [`Requester::call`].
    pub async fn call(&self, method: &str, payload: Value) -> Result<Value> {
        self.requester
            .call(&qualify(&self.plugin, method), payload)
            .await
    }

    /// Calls `<plugin>:<method>` with typed payload and result.
    ///
    /// # Errors
    ///
    /// Same as [`Requester::call_typed`].
    pub async fn call_typed<P, T>(&self, method: &str, payload: &P) -> Result<T>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.requester
            .call_typed(&qualify(&self.plugin, method), payload)
            .await
    }

    /// Subscribes to `<plugin>:<event>`.
    pub fn subscribe<F>(&self, event: &str, handler: F) -> Subscription
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.requester
            .subscribe(&qualify(&self.plugin, event), handler)
    }

    /// The unscoped requester.
    #[inline]
    #[must_use]
    pub fn requester(&self) -> &Requester {
        &self.requester
    }
}

impl fmt::Debug for PluginClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginClient")
            .field("plugin", &self.plugin)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
