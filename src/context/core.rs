//! Application root of one context.
//!
//! [`Devtools`] is constructed once per context and handed to every
//! consumer. It owns the control, the bridge registry, the state owner (if
//! this context owns state) and every requester and responder it created,
//! and tears all of them down in [`Devtools::shutdown`].
//!
//! # Example
//!
//! ```ignore
//! let hub = MemoryHub::new();
//! let server = MemoryServer::new();
//!
//! // Tool UI: owns the state and talks to the dev server.
//! let ui = Devtools::builder()
//!     .broadcast(Arc::new(hub.endpoint()))
//!     .state_owner(Arc::new(hub.endpoint()))
//!     .build()?;
//! let rpc = ui.requester(Arc::new(server.connect()));
//!
//! // Host page: asks for the UI to open.
//! let page = Devtools::builder().broadcast(Arc::new(hub.endpoint())).build()?;
//! page.control().open()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::bridge::{Bridge, BridgeRegistry};
use crate::control::{DevtoolsControl, SharedState, StateOwner};
use crate::error::Result;
use crate::plugin::{PluginHost, ServerContext};
use crate::rpc::{Requester, Responder};
use crate::transport::{BroadcastTransport, ClientTransport, ServerTransport};

use super::builder::DevtoolsBuilder;
use super::options::BridgeOptions;

// ============================================================================
// Types
// ============================================================================

/// Internal shared state for the root.
pub(crate) struct DevtoolsInner {
    /// Validated options.
    options: BridgeOptions,

    /// Requesting side of the state coordinator.
    control: DevtoolsControl,

    /// Namespaced bridges.
    bridges: BridgeRegistry,

    /// Owning side of the state coordinator, if this context owns state.
    state_owner: Option<StateOwner>,

    /// Requesters created through the root.
    requesters: Mutex<Vec<Requester>>,

    /// Responders created through the root.
    responders: Mutex<Vec<Arc<Responder>>>,

    /// Set once shut down.
    shut_down: AtomicBool,
}

// ============================================================================
// Devtools
// ============================================================================

/// Application root of one context.
///
/// Cheap to clone; clones share everything.
#[derive(Clone)]
pub struct Devtools {
    inner: Arc<DevtoolsInner>,
}

// ============================================================================
// Devtools - Constructor
// ============================================================================

impl Devtools {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> DevtoolsBuilder {
        DevtoolsBuilder::new()
    }

    /// Assembles a root from validated parts.
    pub(crate) fn new(
        options: BridgeOptions,
        broadcast: Arc<dyn BroadcastTransport>,
        owner_broadcast: Option<Arc<dyn BroadcastTransport>>,
        initial_state: SharedState,
    ) -> Self {
        let control = DevtoolsControl::new(Arc::clone(&broadcast), &options);
        let bridges = BridgeRegistry::new(broadcast, options.topics());
        let state_owner = owner_broadcast
            .map(|transport| StateOwner::with_state(transport, &options, initial_state));

        info!(
            namespace = %options.namespace,
            owner = state_owner.is_some(),
            "Devtools context started"
        );

        Self {
            inner: Arc::new(DevtoolsInner {
                options,
                control,
                bridges,
                state_owner,
                requesters: Mutex::new(Vec::new()),
                responders: Mutex::new(Vec::new()),
                shut_down: AtomicBool::new(false),
            }),
        }
    }
}

// ============================================================================
// Devtools - Public API
// ============================================================================

impl Devtools {
    /// Options this context was built with.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &BridgeOptions {
        &self.inner.options
    }

    /// Requesting side of the state coordinator.
    #[inline]
    #[must_use]
    pub fn control(&self) -> &DevtoolsControl {
        &self.inner.control
    }

    /// Namespaced bridge registry.
    #[inline]
    #[must_use]
    pub fn bridges(&self) -> &BridgeRegistry {
        &self.inner.bridges
    }

    /// Opens the bridge for `namespace`.
    #[inline]
    #[must_use]
    pub fn bridge(&self, namespace: &str) -> Bridge {
        self.inner.bridges.open(namespace)
    }

    /// Owning side of the state coordinator, if this context owns state.
    #[inline]
    #[must_use]
    pub fn state_owner(&self) -> Option<&StateOwner> {
        self.inner.state_owner.as_ref()
    }

    /// Creates a requester on `transport`, closed on shutdown.
    #[must_use]
    pub fn requester(&self, transport: Arc<dyn ClientTransport>) -> Requester {
        let requester = Requester::new(transport, &self.inner.options);
        self.inner.requesters.lock().push(requester.clone());
        requester
    }

    /// Creates a responder on `transport`, closed on shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] outside a Tokio runtime.
    pub fn responder(&self, transport: Arc<dyn ServerTransport>) -> Result<Arc<Responder>> {
        let responder = Arc::new(Responder::new(transport, &self.inner.options)?);
        self.inner.responders.lock().push(Arc::clone(&responder));
        Ok(responder)
    }

    /// Creates a responder on `transport` wrapped in a plugin host.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] outside a Tokio runtime.
    pub fn plugin_host(
        &self,
        transport: Arc<dyn ServerTransport>,
        ctx: ServerContext,
    ) -> Result<PluginHost> {
        Ok(PluginHost::new(self.responder(transport)?, ctx))
    }

    /// Returns `true` once shut down.
    #[inline]
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    /// Tears down everything the root owns. Idempotent.
    ///
    /// Pending calls fail with [`crate::Error::ConnectionClosed`]; bridges,
    /// the control and the state owner release their topics.
    pub fn shutdown(&self) {
        let inner = &self.inner;
        if inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let requesters: Vec<_> = inner.requesters.lock().drain(..).collect();
        for requester in &requesters {
            requester.close();
        }

        let responders: Vec<_> = inner.responders.lock().drain(..).collect();
        for responder in &responders {
            responder.close();
        }

        inner.bridges.close_all();
        inner.control.destroy();
        if let Some(owner) = &inner.state_owner {
            owner.shutdown();
        }

        debug!(
            requesters = requesters.len(),
            responders = responders.len(),
            "Devtools context shut down"
        );
    }
}

// ============================================================================
// Devtools - Display
// ============================================================================

impl fmt::Debug for Devtools {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Devtools")
            .field("namespace", &self.inner.options.namespace)
            .field("owner", &self.inner.state_owner.is_some())
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
