//! Method handler abstraction.
//!
//! A handler turns a request payload into a result or an error. Async
//! closures implement [`Handler`] directly; [`SyncHandler`] and
//! [`TypedHandler`] adapt plain functions and strongly-typed signatures so
//! the responder can await every kind uniformly.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, HandlerError};

// ============================================================================
// Types
// ============================================================================

/// Outcome of one handler invocation.
pub type HandlerResult = Result<Value, HandlerError>;

// ============================================================================
// Handler
// ============================================================================

/// A registered method implementation.
///
/// Implemented for every `Fn(Value) -> impl Future<Output = HandlerResult>`.
///
/// # Example
///
/// ```ignore
/// responder.handle("math:add", |payload: Value| async move {
///     let a = payload["a"].as_i64().ok_or("missing a")?;
///     let b = payload["b"].as_i64().ok_or("missing b")?;
///     Ok(json!(a + b))
/// });
/// ```
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Handles one request payload (`Value::Null` when absent).
    async fn call(&self, payload: Value) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn call(&self, payload: Value) -> HandlerResult {
        (self)(payload).await
    }
}

// ============================================================================
// SyncHandler
// ============================================================================

/// Adapts a synchronous function into a [`Handler`].
pub struct SyncHandler<F> {
    func: F,
}

impl<F> SyncHandler<F>
where
    F: Fn(Value) -> HandlerResult + Send + Sync + 'static,
{
    /// Wraps `func`.
    #[inline]
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> Handler for SyncHandler<F>
where
    F: Fn(Value) -> HandlerResult + Send + Sync + 'static,
{
    async fn call(&self, payload: Value) -> HandlerResult {
        (self.func)(payload)
    }
}

// ============================================================================
// TypedHandler
// ============================================================================

/// Adapts a handler with typed request and response shapes.
///
/// The payload is decoded into `Req` before the call; a decode failure is
/// answered with [`Error::InvalidPayload`] without invoking the function.
pub struct TypedHandler<F, Req, Res> {
    method: String,
    func: F,
    _marker: PhantomData<fn(Req) -> Res>,
}

impl<F, Fut, Req, Res> TypedHandler<F, Req, Res>
where
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Res, HandlerError>> + Send + 'static,
    Req: DeserializeOwned + Send + 'static,
    Res: Serialize + Send + 'static,
{
    /// Wraps `func` registered under `method`.
    #[inline]
    pub fn new(method: impl Into<String>, func: F) -> Self {
        Self {
            method: method.into(),
            func,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut, Req, Res> Handler for TypedHandler<F, Req, Res>
where
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Res, HandlerError>> + Send + 'static,
    Req: DeserializeOwned + Send + 'static,
    Res: Serialize + Send + 'static,
{
    async fn call(&self, payload: Value) -> HandlerResult {
        let request: Req = serde_json::from_value(payload)
            .map_err(|e| Error::invalid_payload(self.method.as_str(), e))?;
        let response = (self.func)(request).await?;
        Ok(serde_json::to_value(response)?)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct AddArgs {
        a: i64,
        b: i64,
    }

    #[tokio::test]
    async fn test_async_closure_is_handler() {
        let handler = |payload: Value| async move { Ok(json!({ "echo": payload })) };
        let result = handler.call(json!(1)).await.expect("ok");
        assert_eq!(result, json!({ "echo": 1 }));
    }

    #[tokio::test]
    async fn test_sync_handler_error_message() {
        let handler = SyncHandler::new(|_| Err("boom".into()));
        let err = handler.call(Value::Null).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test]
    async fn test_typed_handler_decodes_payload() {
        let handler = TypedHandler::new("math:add", |args: AddArgs| async move {
            Ok::<_, HandlerError>(args.a + args.b)
        });
        let result = handler.call(json!({ "a": 5, "b": 3 })).await.expect("ok");
        assert_eq!(result, json!(8));
    }

    #[tokio::test]
    async fn test_typed_handler_rejects_bad_payload() {
        let handler = TypedHandler::new("math:add", |args: AddArgs| async move {
            Ok::<_, HandlerError>(args.a + args.b)
        });
        let err = handler.call(json!({ "a": "five" })).await.unwrap_err();
        assert!(err.to_string().starts_with("Invalid payload for math:add"));
    }

    #[tokio::test]
    async fn test_typed_handler_unit_request() {
        let handler = TypedHandler::new("sys:ping", |(): ()| async move {
            Ok::<_, HandlerError>("pong")
        });
        let result = handler.call(Value::Null).await.expect("ok");
        assert_eq!(result, json!("pong"));
    }
}
