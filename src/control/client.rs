//! Requesting side of the state coordinator.
//!
//! Any context can ask the owner to change visibility or focus a plugin;
//! it learns the outcome only from the owner's `state-changed` echo.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::bridge::{Bridge, BridgeRegistry};
use crate::context::BridgeOptions;
use crate::error::{Error, Result};
use crate::protocol::{ControlMessage, Topics};
use crate::transport::{BroadcastTransport, MessageHandler, Subscription};

// ============================================================================
// DevtoolsControl
// ============================================================================

/// Remote control of the tool UI's open/closed state.
///
/// # Example
///
/// ```ignore
/// let control = DevtoolsControl::new(broadcast, &BridgeOptions::default());
/// control.toggle()?;
///
/// let sub = control.on_state_change(|open| println!("open: {open}"));
/// let open = control.is_open().await;
/// ```
pub struct DevtoolsControl {
    broadcast: Arc<dyn BroadcastTransport>,
    topics: Topics,
    query_timeout: Duration,
    bridges: BridgeRegistry,
    destroyed: AtomicBool,
}

impl DevtoolsControl {
    /// Creates a control on `broadcast`.
    #[must_use]
    pub fn new(broadcast: Arc<dyn BroadcastTransport>, options: &BridgeOptions) -> Self {
        let topics = options.topics();
        Self {
            bridges: BridgeRegistry::new(Arc::clone(&broadcast), topics.clone()),
            broadcast,
            topics,
            query_timeout: options.state_query_timeout,
            destroyed: AtomicBool::new(false),
        }
    }

    /// Asks the owner to open the tool UI.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportClosed`] after [`DevtoolsControl::destroy`].
    pub fn open(&self) -> Result<()> {
        self.post(&ControlMessage::Open)
    }

    /// Asks the owner to close the tool UI.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportClosed`] after [`DevtoolsControl::destroy`].
    pub fn close(&self) -> Result<()> {
        self.post(&ControlMessage::Close)
    }

    /// Asks the owner to flip visibility.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportClosed`] after [`DevtoolsControl::destroy`].
    pub fn toggle(&self) -> Result<()> {
        self.post(&ControlMessage::Toggle)
    }

    /// Asks the owner to focus `plugin_name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportClosed`] after [`DevtoolsControl::destroy`].
    pub fn switch_plugin(&self, plugin_name: impl Into<String>) -> Result<()> {
        self.post(&ControlMessage::SwitchPlugin {
            plugin_name: plugin_name.into(),
        })
    }

    /// Asks the owner to focus `tab_name` inside `plugin_name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportClosed`] after [`DevtoolsControl::destroy`].
    pub fn switch_tab(
        &self,
        plugin_name: impl Into<String>,
        tab_name: impl Into<String>,
    ) -> Result<()> {
        self.post(&ControlMessage::SwitchTab {
            plugin_name: plugin_name.into(),
            tab_name: tab_name.into(),
        })
    }

    /// Queries the owner for the current visibility.
    ///
    /// Resolves to `false` when no owner answers within the state query
    /// timeout, or after [`DevtoolsControl::destroy`].
    pub async fn is_open(&self) -> bool {
        if self.is_destroyed() {
            return false;
        }

        let (tx, rx) = oneshot::channel::<bool>();
        let tx = Mutex::new(Some(tx));
        let topics = self.topics.clone();

        let handler: MessageHandler = Arc::new(move |data: Value| {
            if let Some(ControlMessage::StateResponse { is_open }) =
                ControlMessage::parse(&data, &topics)
                && let Some(tx) = tx.lock().take()
            {
                let _ = tx.send(is_open);
            }
        });
        let subscription = self.broadcast.subscribe(&self.topics.control(), handler);

        let answer = match self.post(&ControlMessage::GetState) {
            Ok(()) => timeout(self.query_timeout, rx).await.ok().and_then(|r| r.ok()),
            Err(e) => {
                warn!(error = %e, "State query not sent");
                None
            }
        };
        subscription.unsubscribe();

        match answer {
            Some(is_open) => is_open,
            None => {
                debug!(
                    timeout_ms = u64::try_from(self.query_timeout.as_millis()).unwrap_or(u64::MAX),
                    "No state owner answered, assuming closed"
                );
                false
            }
        }
    }

    /// Calls `callback` with every `state-changed` echo from the owner.
    pub fn on_state_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let topics = self.topics.clone();
        let handler: MessageHandler = Arc::new(move |data: Value| {
            if let Some(ControlMessage::StateChanged { is_open }) =
                ControlMessage::parse(&data, &topics)
            {
                callback(is_open);
            }
        });
        self.broadcast.subscribe(&self.topics.control(), handler)
    }

    /// Opens a bridge on `namespace` over the same transport.
    ///
    /// Closed by [`DevtoolsControl::destroy`] unless closed earlier.
    #[must_use]
    pub fn create_bridge(&self, namespace: &str) -> Bridge {
        self.bridges.open(namespace)
    }

    /// Releases the control topic and closes every bridge created here.
    /// Idempotent.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.broadcast.release(&self.topics.control());
        self.bridges.close_all();
        debug!(namespace = %self.topics.namespace(), "Control destroyed");
    }

    /// Returns `true` once destroyed.
    #[inline]
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    fn post(&self, message: &ControlMessage) -> Result<()> {
        if self.is_destroyed() {
            return Err(Error::transport_closed(self.topics.control()));
        }
        self.broadcast
            .publish(&self.topics.control(), message.to_value(&self.topics))?;
        trace!(action = message.name(), "Control message sent");
        Ok(())
    }
}

impl fmt::Debug for DevtoolsControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DevtoolsControl")
            .field("namespace", &self.topics.namespace())
            .field("query_timeout", &self.query_timeout)
            .field("destroyed", &self.is_destroyed())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
