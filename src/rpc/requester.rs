//! RPC client side.
//!
//! Issues request envelopes over a [`ClientTransport`] and resolves each
//! call when the response carrying its id arrives.
//!
//! # Call lifecycle
//!
//! ```text
//! call()  ──► pending[id] = tx ──► send <ns>:request
//!                                        │
//!   ◄── resolve/reject ◄── pending.remove(id) ◄── <ns>:response
//!   ◄── RPC Timeout    ◄── pending.remove(id) ◄── deadline elapsed
//! ```
//!
//! Whichever of response and deadline removes the pending entry first wins;
//! the other finds nothing and is ignored.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::context::BridgeOptions;
use crate::error::{Error, Result};
use crate::identifiers::CallId;
use crate::plugin::PluginClient;
use crate::protocol::envelope::{decode, encode};
use crate::protocol::{EventEnvelope, RequestEnvelope, ResponseEnvelope, Topics};
use crate::transport::listeners::{ListenerMap, invoke_guarded};
use crate::transport::{ClientTransport, MessageHandler, Subscription};

// ============================================================================
// Types
// ============================================================================

/// A call awaiting its response.
struct PendingCall {
    method: String,
    tx: oneshot::Sender<Result<Value>>,
}

type PendingMap = FxHashMap<CallId, PendingCall>;

/// Drops the pending entry of one call when the call future ends.
struct PendingGuard<'a> {
    pending: &'a Mutex<PendingMap>,
    id: &'a CallId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.pending.lock().remove(self.id).is_some() {
            trace!(id = %self.id, "Pending call discarded");
        }
    }
}

struct RequesterInner {
    transport: Arc<dyn ClientTransport>,
    topics: Topics,
    pending: Mutex<PendingMap>,
    events: ListenerMap<MessageHandler>,
    timeout: Duration,
    max_pending: usize,
    subscriptions: Mutex<Vec<Subscription>>,
    closed: AtomicBool,
}

// ============================================================================
// Requester
// ============================================================================

/// Client side of the RPC channel.
///
/// Cheap to clone; clones share pending calls and subscriptions.
///
/// # Example
///
/// ```ignore
/// let requester = Requester::new(transport, &BridgeOptions::default());
/// let sum = requester.call("math:add", json!({ "a": 5, "b": 3 })).await?;
/// assert_eq!(sum, json!(8));
/// ```
#[derive(Clone)]
pub struct Requester {
    inner: Arc<RequesterInner>,
}

impl Requester {
    /// Attaches a requester to `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn ClientTransport>, options: &BridgeOptions) -> Self {
        let inner = Arc::new(RequesterInner {
            transport,
            topics: options.topics(),
            pending: Mutex::new(FxHashMap::default()),
            events: ListenerMap::new(),
            timeout: options.rpc_timeout,
            max_pending: options.max_pending_calls,
            subscriptions: Mutex::new(Vec::with_capacity(2)),
            closed: AtomicBool::new(false),
        });

        let on_response: MessageHandler = {
            let weak = Arc::downgrade(&inner);
            Arc::new(move |data| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_response(data);
                }
            })
        };

        let on_event: MessageHandler = {
            let weak = Arc::downgrade(&inner);
            Arc::new(move |data| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_event(data);
                }
            })
        };

        let response_sub = inner.transport.on(&inner.topics.response(), on_response);
        let event_sub = inner.transport.on(&inner.topics.event(), on_event);
        inner
            .subscriptions
            .lock()
            .extend([response_sub, event_sub]);

        debug!(namespace = %inner.topics.namespace(), "Requester attached");

        Self { inner }
    }

    /// Calls `method` with the default timeout.
    ///
    /// Pass `Value::Null` for a call without payload.
    ///
    /// # Errors
    ///
    /// - [`Error::Remote`] if the responder answered with an error
    /// - [`Error::CallTimeout`] if no response arrived in time
    /// - [`Error::TooManyPendingCalls`] if the pending call cap is reached
    /// - [`Error::ConnectionClosed`] if the requester or transport closed
    pub async fn call(&self, method: &str, payload: Value) -> Result<Value> {
        self.call_with_timeout(method, payload, self.inner.timeout)
            .await
    }

    /// Calls `method` with a custom timeout.
    ///
    /// # Errors
    ///
    /// Same as [`Requester::call`].
    pub async fn call_with_timeout(
        &self,
        method: &str,
        payload: Value,
        call_timeout: Duration,
    ) -> Result<Value> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }

        let request = RequestEnvelope::new(method, Some(payload));
        let id = request.id.clone();
        let message = encode(&request)?;

        let (tx, rx) = oneshot::channel();

        // Check pending call limit
        {
            let mut pending = inner.pending.lock();
            if pending.len() >= inner.max_pending {
                warn!(
                    pending = pending.len(),
                    max = inner.max_pending,
                    "Too many pending calls"
                );
                return Err(Error::TooManyPendingCalls {
                    pending: pending.len(),
                    max: inner.max_pending,
                });
            }
            pending.insert(
                id.clone(),
                PendingCall {
                    method: method.to_string(),
                    tx,
                },
            );
        }

        // Removes the entry however this future ends, including when the
        // caller drops it before a response or the deadline.
        let _guard = PendingGuard {
            pending: &inner.pending,
            id: &id,
        };

        inner.transport.send(&inner.topics.request(), message)?;

        trace!(method = %method, id = %id, "Request sent");

        match timeout(call_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                debug!(method = %method, id = %id, "Call timed out");
                Err(Error::call_timeout(
                    method,
                    u64::try_from(call_timeout.as_millis()).unwrap_or(u64::MAX),
                ))
            }
        }
    }

    /// Calls `method` with a typed payload and decodes the result.
    ///
    /// # Errors
    ///
    /// Same as [`Requester::call`], plus [`Error::InvalidPayload`] if the
    /// result does not decode into `T`.
    pub async fn call_typed<P, T>(&self, method: &str, payload: &P) -> Result<T>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let payload = serde_json::to_value(payload)?;
        let result = self.call(method, payload).await?;
        serde_json::from_value(result).map_err(|e| Error::invalid_payload(method, e))
    }

    /// Registers `handler` for events named `event`.
    ///
    /// Several handlers may share one name; the returned handle removes only
    /// this one.
    pub fn subscribe<F>(&self, event: &str, handler: F) -> Subscription
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let id = self.inner.events.add(event, Arc::new(handler));
        let weak: Weak<RequesterInner> = Arc::downgrade(&self.inner);
        let event = event.to_string();
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.events.remove(&event, id);
            }
        })
    }

    /// Returns the number of calls awaiting a response.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Returns `true` once [`Requester::close`] has been called.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Detaches from the transport and fails every pending call with
    /// [`Error::ConnectionClosed`]. Idempotent.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let subscriptions: Vec<_> = self.inner.subscriptions.lock().drain(..).collect();
        for subscription in subscriptions {
            subscription.unsubscribe();
        }

        self.inner.events.clear();

        let pending: Vec<_> = self.inner.pending.lock().drain().collect();
        let count = pending.len();
        for (_, call) in pending {
            let _ = call.tx.send(Err(Error::ConnectionClosed));
        }

        debug!(failed = count, "Requester closed");
    }

    /// Returns a client that prefixes method and event names with
    /// `plugin`.
    #[must_use]
    pub fn scoped(&self, plugin: impl Into<String>) -> PluginClient {
        PluginClient::new(self.clone(), plugin)
    }
}

impl fmt::Debug for Requester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Requester")
            .field("namespace", &self.inner.topics.namespace())
            .field("pending", &self.pending_count())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// RequesterInner - Inbound
// ============================================================================

impl RequesterInner {
    /// Resolves the pending call matching a response envelope.
    fn handle_response(&self, data: Value) {
        let Some(response) = decode::<ResponseEnvelope>(data) else {
            warn!("Dropped malformed response envelope");
            return;
        };

        let Some(call) = self.pending.lock().remove(&response.id) else {
            warn!(id = %response.id, "Response for unknown or expired call");
            return;
        };

        trace!(method = %call.method, id = %response.id, error = response.is_error(), "Response received");

        let result = response.into_result(&call.method);
        let _ = call.tx.send(result);
    }

    /// Fans an event envelope out to the handlers of its method.
    fn handle_event(&self, data: Value) {
        let Some(event) = decode::<EventEnvelope>(data) else {
            warn!("Dropped malformed event envelope");
            return;
        };

        let handlers = self.events.snapshot(&event.method);
        if handlers.is_empty() {
            trace!(method = %event.method, "No subscriber for event");
            return;
        }

        let payload = event.payload.unwrap_or(Value::Null);
        for handler in handlers {
            let payload = payload.clone();
            invoke_guarded(&event.method, || handler(payload));
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
