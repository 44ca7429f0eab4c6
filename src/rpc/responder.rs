//! RPC server side.
//!
//! Owns the method registry, answers every request envelope arriving on a
//! [`ServerTransport`] and pushes event envelopes to all requesters.
//!
//! Each request is dispatched on its own task. A handler that fails or
//! panics produces an error response for its own call only.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

use crate::context::BridgeOptions;
use crate::error::{Error, HandlerError, Result};
use crate::protocol::envelope::{decode, encode};
use crate::protocol::{EventEnvelope, RequestEnvelope, ResponseEnvelope, Topics};
use crate::transport::{ReplyChannel, RequestHandler, ServerTransport, Subscription};

use super::handler::{Handler, HandlerResult, SyncHandler, TypedHandler};

// ============================================================================
// Types
// ============================================================================

type MethodMap = FxHashMap<String, Arc<dyn Handler>>;

// ============================================================================
// Responder
// ============================================================================

/// Server side of the RPC channel.
///
/// # Example
///
/// ```ignore
/// let responder = Responder::new(server, &BridgeOptions::default())?;
/// responder.handle_sync("math:add", |p| {
///     Ok(json!(p["a"].as_i64().unwrap_or(0) + p["b"].as_i64().unwrap_or(0)))
/// });
/// ```
pub struct Responder {
    transport: Arc<dyn ServerTransport>,
    topics: Topics,
    methods: Arc<RwLock<MethodMap>>,
    subscription: Mutex<Option<Subscription>>,
}

impl Responder {
    /// Attaches a responder to `transport`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when called outside a Tokio runtime.
    pub fn new(transport: Arc<dyn ServerTransport>, options: &BridgeOptions) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::config(format!("Responder requires a Tokio runtime: {e}")))?;

        let topics = options.topics();
        let methods: Arc<RwLock<MethodMap>> = Arc::new(RwLock::new(FxHashMap::default()));

        let dispatcher = Dispatcher {
            runtime,
            methods: Arc::clone(&methods),
            transport: Arc::downgrade(&transport),
            response_topic: topics.response(),
        };

        let on_request: RequestHandler = Arc::new(move |data, reply| dispatcher.dispatch(data, reply));
        let subscription = transport.on(&topics.request(), on_request);

        debug!(namespace = %topics.namespace(), "Responder attached");

        Ok(Self {
            transport,
            topics,
            methods,
            subscription: Mutex::new(Some(subscription)),
        })
    }

    /// Registers `handler` for `method`.
    ///
    /// A second registration for the same name replaces the first.
    pub fn handle<H: Handler>(&self, method: impl Into<String>, handler: H) {
        let method = method.into();
        let replaced = self
            .methods
            .write()
            .insert(method.clone(), Arc::new(handler))
            .is_some();

        if replaced {
            warn!(method = %method, "Replaced existing method handler");
        } else {
            debug!(method = %method, "Method registered");
        }
    }

    /// Registers a synchronous handler.
    pub fn handle_sync<F>(&self, method: impl Into<String>, func: F)
    where
        F: Fn(Value) -> HandlerResult + Send + Sync + 'static,
    {
        self.handle(method, SyncHandler::new(func));
    }

    /// Registers a handler with typed request and response shapes.
    pub fn handle_typed<F, Fut, Req, Res>(&self, method: impl Into<String>, func: F)
    where
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Res, HandlerError>> + Send + 'static,
        Req: DeserializeOwned + Send + 'static,
        Res: Serialize + Send + 'static,
    {
        let method = method.into();
        let handler = TypedHandler::new(method.clone(), func);
        self.handle(method, handler);
    }

    /// Returns `true` if `method` has a handler.
    #[inline]
    #[must_use]
    pub fn has_method(&self, method: &str) -> bool {
        self.methods.read().contains_key(method)
    }

    /// Registered method names, sorted.
    #[must_use]
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Sends an event to every connected requester.
    ///
    /// Fire-and-forget: a requester that is not connected misses it.
    ///
    /// # Errors
    ///
    /// Returns an error only if the transport itself is unusable.
    pub fn broadcast(&self, event: &str, payload: Value) -> Result<()> {
        let envelope = EventEnvelope::new(event, Some(payload));
        self.transport.send(&self.topics.event(), encode(&envelope)?)?;
        trace!(event = %event, "Event broadcast");
        Ok(())
    }

    /// Detaches from the transport. Requests arriving afterwards go
    /// unanswered. Idempotent.
    pub fn close(&self) {
        if let Some(subscription) = self.subscription.lock().take() {
            subscription.unsubscribe();
            debug!(namespace = %self.topics.namespace(), "Responder closed");
        }
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("namespace", &self.topics.namespace())
            .field("methods", &self.methods())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// State captured by the transport callback.
///
/// Holds the transport weakly: the transport owns this callback.
struct Dispatcher {
    runtime: Handle,
    methods: Arc<RwLock<MethodMap>>,
    transport: Weak<dyn ServerTransport>,
    response_topic: String,
}

impl Dispatcher {
    /// Decodes one request and spawns its handling.
    fn dispatch(&self, data: Value, reply: Option<Arc<dyn ReplyChannel>>) {
        let Some(request) = decode::<RequestEnvelope>(data) else {
            warn!("Dropped malformed request envelope");
            return;
        };

        trace!(method = %request.method, id = %request.id, "Request received");

        let handler = self.methods.read().get(&request.method).cloned();
        let transport = self.transport.clone();
        let response_topic = self.response_topic.clone();

        self.runtime.spawn(async move {
            let RequestEnvelope { id, method, payload } = request;

            let response = match handler {
                None => ResponseEnvelope::failure(id, format!("Method {method} not found")),
                Some(handler) => {
                    let payload = payload.unwrap_or(Value::Null);
                    match AssertUnwindSafe(handler.call(payload)).catch_unwind().await {
                        Ok(Ok(result)) => ResponseEnvelope::success(id, result),
                        Ok(Err(e)) => {
                            debug!(method = %method, error = %e, "Handler failed");
                            ResponseEnvelope::failure(id, e.to_string())
                        }
                        Err(_) => {
                            warn!(method = %method, "Handler panicked");
                            ResponseEnvelope::failure(id, format!("Handler for {method} panicked"))
                        }
                    }
                }
            };

            match Self::reply(&transport, reply.as_deref(), &response_topic, &response) {
                Ok(()) => {}
                // Caller went away before its answer was ready.
                Err(e) if e.is_connection_error() => {
                    debug!(method = %method, error = %e, "Response dropped, caller gone");
                }
                Err(e) => warn!(method = %method, error = %e, "Failed to send response"),
            }
        });
    }

    /// Sends a response to its caller, or outward when the transport
    /// cannot address callers.
    fn reply(
        transport: &Weak<dyn ServerTransport>,
        reply: Option<&dyn ReplyChannel>,
        topic: &str,
        response: &ResponseEnvelope,
    ) -> Result<()> {
        let message = encode(response)?;
        match reply {
            Some(channel) => channel.send(topic, message),
            None => transport
                .upgrade()
                .ok_or(Error::ConnectionClosed)?
                .send(topic, message),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use serde_json::json;

    use crate::rpc::Requester;
    use crate::transport::{ClientTransport, MemoryServer};

    fn pair() -> (Responder, Requester) {
        let server = MemoryServer::new();
        let client: Arc<dyn ClientTransport> = Arc::new(server.connect());
        let options = BridgeOptions::new().with_rpc_timeout(Duration::from_millis(500));
        let responder = Responder::new(Arc::new(server), &options).expect("responder");
        let requester = Requester::new(client, &options);
        (responder, requester)
    }

    #[test]
    fn test_new_outside_runtime_fails() {
        let server: Arc<dyn ServerTransport> = Arc::new(NullServer);
        let err = Responder::new(server, &BridgeOptions::new()).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    struct NullServer;

    impl ServerTransport for NullServer {
        fn send(&self, _event: &str, _data: Value) -> Result<()> {
            Ok(())
        }

        fn on(&self, _event: &str, _handler: RequestHandler) -> Subscription {
            Subscription::noop()
        }
    }

    #[tokio::test]
    async fn test_handle_and_call() {
        let (responder, requester) = pair();
        responder.handle("math:add", |p: Value| async move {
            Ok::<_, HandlerError>(json!(p["a"].as_i64().unwrap_or(0) + p["b"].as_i64().unwrap_or(0)))
        });

        let sum = requester
            .call("math:add", json!({ "a": 5, "b": 3 }))
            .await
            .expect("call");
        assert_eq!(sum, json!(8));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let (_responder, requester) = pair();
        let err = requester.call("math:mul", Value::Null).await.unwrap_err();
        assert!(err.is_remote());
        assert_eq!(err.to_string(), "Method math:mul not found");
    }

    #[tokio::test]
    async fn test_handler_error_message() {
        let (responder, requester) = pair();
        responder.handle_sync("error:throw", |_| Err("boom".into()));

        let err = requester.call("error:throw", Value::Null).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test]
    async fn test_handler_panic_is_isolated() {
        let (responder, requester) = pair();
        responder.handle_sync("bad:panic", |_| panic!("handler bug"));
        responder.handle_sync("good:ok", |_| Ok(json!("ok")));

        let err = requester.call("bad:panic", Value::Null).await.unwrap_err();
        assert_eq!(err.to_string(), "Handler for bad:panic panicked");

        let ok = requester.call("good:ok", Value::Null).await.expect("call");
        assert_eq!(ok, json!("ok"));
    }

    #[tokio::test]
    async fn test_replacement_last_writer_wins() {
        let (responder, requester) = pair();
        responder.handle_sync("v", |_| Ok(json!(1)));
        responder.handle_sync("v", |_| Ok(json!(2)));

        assert_eq!(responder.methods(), vec!["v".to_string()]);
        assert_eq!(requester.call("v", Value::Null).await.expect("call"), json!(2));
    }

    #[tokio::test]
    async fn test_null_result_resolves_null() {
        let (responder, requester) = pair();
        responder.handle_sync("noop", |_| Ok(Value::Null));
        assert_eq!(requester.call("noop", Value::Null).await.expect("call"), Value::Null);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers() {
        let (responder, requester) = pair();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _sub = requester.subscribe("console:log", move |p| {
            let _ = tx.send(p);
        });

        responder.broadcast("console:log", json!({ "msg": "hi" })).expect("broadcast");

        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("event in time");
        assert_eq!(got, Some(json!({ "msg": "hi" })));
    }

    #[tokio::test]
    async fn test_close_stops_answering() {
        let (responder, requester) = pair();
        responder.handle_sync("ping", |_| Ok(json!("pong")));
        assert!(responder.has_method("ping"));

        responder.close();
        responder.close();

        let err = requester
            .call_with_timeout("ping", Value::Null, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }
}
