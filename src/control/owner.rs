//! Owning side of the state coordinator.
//!
//! The owner, conventionally the context rendering the tool UI, holds the
//! authoritative [`SharedState`]. It applies actions from any context and
//! echoes every actual change as `state-changed`.
//!
//! # Loop avoidance
//!
//! `state-changed` and `state-response` share the control topic with the
//! actions. The owner never treats them as actions: a `state-changed` from
//! another owner is adopted silently and a `state-response` is ignored.
//! Otherwise two owners would answer each other forever.
//!
//! # State machine
//!
//! ```text
//!             open / toggle
//!   ┌────────┐ ───────────► ┌────────┐
//!   │ Closed │              │  Open  │
//!   └────────┘ ◄─────────── └────────┘
//!             close / toggle
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::context::BridgeOptions;
use crate::protocol::{ControlMessage, Topics};
use crate::transport::listeners::{ListenerMap, invoke_guarded};
use crate::transport::{BroadcastTransport, MessageHandler, Subscription};

// ============================================================================
// Constants
// ============================================================================

/// Smallest panel height in pixels.
pub const MIN_HEIGHT: u32 = 150;

/// Largest panel height as a fraction of the viewport.
pub const MAX_HEIGHT_RATIO: f64 = 0.9;

/// Panel height of a fresh state.
pub const DEFAULT_HEIGHT: u32 = 400;

const STATE_EVENT: &str = "state";
const SELECTION_EVENT: &str = "selection";

// ============================================================================
// SharedState
// ============================================================================

/// Plugin (and optionally tab) focused in the tool UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    /// Focused plugin.
    pub plugin_name: String,
    /// Focused tab, if a tab was named.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_name: Option<String>,
}

/// Authoritative state kept by the owner.
///
/// Serializable so the host can persist it between reloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SharedState {
    /// Whether the tool UI is visible.
    pub is_open: bool,
    /// Panel height in pixels.
    pub height: u32,
    /// Focused plugin and tab.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection: Option<Selection>,
}

impl Default for SharedState {
    fn default() -> Self {
        Self {
            is_open: false,
            height: DEFAULT_HEIGHT,
            selection: None,
        }
    }
}

/// Clamps `height` to `[MIN_HEIGHT, floor(viewport_height * MAX_HEIGHT_RATIO)]`.
///
/// The minimum wins when the viewport is too small for both bounds.
#[must_use]
pub fn clamp_height(height: u32, viewport_height: u32) -> u32 {
    let max = (f64::from(viewport_height) * MAX_HEIGHT_RATIO).floor() as u32;
    height.min(max).max(MIN_HEIGHT)
}

// ============================================================================
// Types
// ============================================================================

type StateListener = Arc<dyn Fn(bool) + Send + Sync>;
type SelectionListener = Arc<dyn Fn(Selection) + Send + Sync>;

struct OwnerInner {
    broadcast: Arc<dyn BroadcastTransport>,
    topics: Topics,
    state: Mutex<SharedState>,
    state_listeners: ListenerMap<StateListener>,
    selection_listeners: ListenerMap<SelectionListener>,
    subscription: Mutex<Option<Subscription>>,
    closed: AtomicBool,
}

// ============================================================================
// StateOwner
// ============================================================================

/// Holder of the authoritative open/closed state.
///
/// Only one owner should be live per namespace at a time; a second one
/// converges on the first one's echoes without re-broadcasting them.
#[derive(Clone)]
pub struct StateOwner {
    inner: Arc<OwnerInner>,
}

impl StateOwner {
    /// Starts owning a fresh state on `broadcast`.
    #[must_use]
    pub fn new(broadcast: Arc<dyn BroadcastTransport>, options: &BridgeOptions) -> Self {
        Self::with_state(broadcast, options, SharedState::default())
    }

    /// Starts owning `state`, typically restored from storage.
    #[must_use]
    pub fn with_state(
        broadcast: Arc<dyn BroadcastTransport>,
        options: &BridgeOptions,
        state: SharedState,
    ) -> Self {
        let topics = options.topics();
        let inner = Arc::new(OwnerInner {
            broadcast,
            topics,
            state: Mutex::new(state),
            state_listeners: ListenerMap::new(),
            selection_listeners: ListenerMap::new(),
            subscription: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        let handler: MessageHandler = {
            let weak = Arc::downgrade(&inner);
            Arc::new(move |data: Value| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_message(&data);
                }
            })
        };
        let subscription = inner
            .broadcast
            .subscribe(&inner.topics.control(), handler);
        *inner.subscription.lock() = Some(subscription);

        debug!(namespace = %inner.topics.namespace(), "State owner started");

        Self { inner }
    }

    /// Opens the tool UI, echoing the change to every context.
    pub fn open(&self) {
        self.inner.set_open(true, true);
    }

    /// Closes the tool UI, echoing the change to every context.
    pub fn close(&self) {
        self.inner.set_open(false, true);
    }

    /// Flips visibility, echoing the change to every context.
    pub fn toggle(&self) {
        self.inner.toggle();
    }

    /// Current visibility.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.state.lock().is_open
    }

    /// Current panel height.
    #[inline]
    #[must_use]
    pub fn height(&self) -> u32 {
        self.inner.state.lock().height
    }

    /// Sets the panel height clamped to the viewport and returns the value
    /// stored.
    pub fn set_height(&self, height: u32, viewport_height: u32) -> u32 {
        let clamped = clamp_height(height, viewport_height);
        self.inner.state.lock().height = clamped;
        trace!(requested = height, stored = clamped, "Panel height set");
        clamped
    }

    /// Current selection.
    #[must_use]
    pub fn selection(&self) -> Option<Selection> {
        self.inner.state.lock().selection.clone()
    }

    /// Copy of the whole state, for persistence.
    #[must_use]
    pub fn snapshot(&self) -> SharedState {
        self.inner.state.lock().clone()
    }

    /// Calls `callback` whenever visibility changes, whoever changed it.
    pub fn on_state_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = self
            .inner
            .state_listeners
            .add(STATE_EVENT, Arc::new(callback));
        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.state_listeners.remove(STATE_EVENT, id);
            }
        })
    }

    /// Calls `callback` for every `switch-plugin` and `switch-tab` request.
    pub fn on_selection<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Selection) + Send + Sync + 'static,
    {
        let id = self
            .inner
            .selection_listeners
            .add(SELECTION_EVENT, Arc::new(callback));
        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.selection_listeners.remove(SELECTION_EVENT, id);
            }
        })
    }

    /// Stops owning: unsubscribes, releases the control topic and drops
    /// every listener. Idempotent.
    pub fn shutdown(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(subscription) = inner.subscription.lock().take() {
            subscription.unsubscribe();
        }
        inner.broadcast.release(&inner.topics.control());
        inner.state_listeners.clear();
        inner.selection_listeners.clear();
        debug!(namespace = %inner.topics.namespace(), "State owner shut down");
    }
}

impl fmt::Debug for StateOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateOwner")
            .field("namespace", &self.inner.topics.namespace())
            .field("state", &self.snapshot())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// OwnerInner - Inbound
// ============================================================================

impl OwnerInner {
    fn handle_message(&self, data: &Value) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }

        let Some(message) = ControlMessage::parse(data, &self.topics) else {
            warn!("Dropped malformed control message");
            return;
        };

        trace!(message = message.name(), "Control message received");

        match message {
            ControlMessage::Open => self.set_open(true, true),
            ControlMessage::Close => self.set_open(false, true),
            ControlMessage::Toggle => self.toggle(),
            ControlMessage::GetState => {
                let state = self.state.lock();
                self.post(&ControlMessage::StateResponse {
                    is_open: state.is_open,
                });
            }
            ControlMessage::SwitchPlugin { plugin_name } => self.select(Selection {
                plugin_name,
                tab_name: None,
            }),
            ControlMessage::SwitchTab {
                plugin_name,
                tab_name,
            } => self.select(Selection {
                plugin_name,
                tab_name: Some(tab_name),
            }),
            // Another owner's echo: adopt, never answer.
            ControlMessage::StateChanged { is_open } => self.set_open(is_open, false),
            ControlMessage::StateResponse { .. } => {}
        }
    }
}

// ============================================================================
// OwnerInner - Transitions
// ============================================================================

impl OwnerInner {
    // The echo is posted under the state lock so echoes leave in the same
    // order as the transitions they report.

    fn toggle(&self) {
        let is_open = {
            let mut state = self.state.lock();
            state.is_open = !state.is_open;
            self.post(&ControlMessage::StateChanged {
                is_open: state.is_open,
            });
            state.is_open
        };
        self.notify(is_open);
    }

    fn set_open(&self, is_open: bool, echo: bool) {
        {
            let mut state = self.state.lock();
            if state.is_open == is_open {
                return;
            }
            state.is_open = is_open;
            if echo {
                self.post(&ControlMessage::StateChanged { is_open });
            }
        }
        self.notify(is_open);
    }

    fn notify(&self, is_open: bool) {
        debug!(is_open, "Open state changed");
        for listener in self.state_listeners.snapshot(STATE_EVENT) {
            invoke_guarded(STATE_EVENT, || listener(is_open));
        }
    }

    fn select(&self, selection: Selection) {
        self.state.lock().selection = Some(selection.clone());
        debug!(plugin = %selection.plugin_name, tab = ?selection.tab_name, "Selection requested");
        for listener in self.selection_listeners.snapshot(SELECTION_EVENT) {
            let selection = selection.clone();
            invoke_guarded(SELECTION_EVENT, || listener(selection));
        }
    }

    fn post(&self, message: &ControlMessage) {
        if let Err(e) = self
            .broadcast
            .publish(&self.topics.control(), message.to_value(&self.topics))
        {
            warn!(error = %e, message = message.name(), "Control message not sent");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
