//! End-to-end request/response tests over the memory and WebSocket
//! transports.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use devtools_bridge::{
    BridgeOptions, ClientTransport, Error, HandlerError, MemoryServer, Requester, Responder,
    WsClient, WsServer,
};
use proptest::prelude::*;
use serde_json::{Value, json};
use tokio::time::sleep;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn memory_pair(timeout: Duration) -> Result<(Responder, Requester)> {
    let server = MemoryServer::new();
    let client: Arc<dyn ClientTransport> = Arc::new(server.connect());
    let options = BridgeOptions::new().with_rpc_timeout(timeout);
    let responder = Responder::new(Arc::new(server), &options)?;
    let requester = Requester::new(client, &options);
    Ok((responder, requester))
}

fn register_math(responder: &Responder) {
    responder.handle("math:add", |p: Value| async move {
        let a = p["a"].as_i64().ok_or("missing a")?;
        let b = p["b"].as_i64().ok_or("missing b")?;
        Ok::<_, HandlerError>(json!(a + b))
    });
    responder.handle_sync("error:throw", |_| Err("boom".into()));
}

#[tokio::test]
async fn test_add_and_error_messages() -> Result<()> {
    init_tracing();
    let (responder, requester) = memory_pair(Duration::from_secs(1))?;
    register_math(&responder);

    assert_eq!(requester.call("math:add", json!({ "a": 5, "b": 3 })).await?, json!(8));

    let err = requester.call("error:throw", Value::Null).await.unwrap_err();
    assert_eq!(err.to_string(), "boom");

    let err = requester.call("math:add", json!({ "a": 5 })).await.unwrap_err();
    assert_eq!(err.to_string(), "missing b");
    Ok(())
}

#[tokio::test]
async fn test_unknown_method_does_not_break_later_calls() -> Result<()> {
    init_tracing();
    let (responder, requester) = memory_pair(Duration::from_secs(1))?;
    register_math(&responder);

    let err = requester.call("math:mul", Value::Null).await.unwrap_err();
    assert!(matches!(err, Error::Remote { .. }));
    assert_eq!(err.to_string(), "Method math:mul not found");

    assert_eq!(requester.call("math:add", json!({ "a": 1, "b": 1 })).await?, json!(2));
    Ok(())
}

#[tokio::test]
async fn test_out_of_order_responses_are_correlated() -> Result<()> {
    init_tracing();
    let (responder, requester) = memory_pair(Duration::from_secs(2))?;
    responder.handle("echo:slow", |p: Value| async move {
        let delay = p["delay"].as_u64().unwrap_or(0);
        sleep(Duration::from_millis(delay)).await;
        Ok::<_, HandlerError>(p["n"].clone())
    });

    // Earlier calls sleep longer, so responses come back reversed.
    let calls = (0..8u64).map(|n| {
        let requester = requester.clone();
        async move {
            let got = requester
                .call("echo:slow", json!({ "n": n, "delay": (8 - n) * 15 }))
                .await?;
            Ok::<_, Error>((n, got))
        }
    });

    for result in futures_util::future::join_all(calls).await {
        let (n, got) = result?;
        assert_eq!(got, json!(n));
    }
    assert_eq!(requester.pending_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_failing_handler_is_isolated_under_concurrency() -> Result<()> {
    init_tracing();
    let (responder, requester) = memory_pair(Duration::from_secs(1))?;
    register_math(&responder);
    responder.handle_sync("bad:panic", |_| panic!("handler bug"));

    let bad = requester.call("bad:panic", Value::Null);
    let thrown = requester.call("error:throw", Value::Null);
    let good = requester.call("math:add", json!({ "a": 2, "b": 2 }));
    let (bad, thrown, good) = tokio::join!(bad, thrown, good);

    assert_eq!(bad.unwrap_err().to_string(), "Handler for bad:panic panicked");
    assert_eq!(thrown.unwrap_err().to_string(), "boom");
    assert_eq!(good?, json!(4));
    Ok(())
}

#[tokio::test]
async fn test_late_response_after_timeout_is_ignored() -> Result<()> {
    init_tracing();
    let (responder, requester) = memory_pair(Duration::from_secs(1))?;
    responder.handle("slow:answer", |_| async move {
        sleep(Duration::from_millis(150)).await;
        Ok::<_, HandlerError>(json!("late"))
    });
    responder.handle_sync("fast:answer", |_| Ok(json!("fast")));

    let err = requester
        .call_with_timeout("slow:answer", Value::Null, Duration::from_millis(30))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(err.to_string(), "RPC Timeout: slow:answer");
    assert_eq!(requester.pending_count(), 0);

    // The late reply lands after the entry is gone and must not disturb
    // the next call.
    sleep(Duration::from_millis(200)).await;
    assert_eq!(requester.call("fast:answer", Value::Null).await?, json!("fast"));
    Ok(())
}

#[tokio::test]
async fn test_request_reaches_only_one_of_many_clients() -> Result<()> {
    init_tracing();
    let server = MemoryServer::new();
    let options = BridgeOptions::new().with_rpc_timeout(Duration::from_secs(1));
    let responder = Responder::new(Arc::new(server.clone()), &options)?;
    responder.handle_sync("sys:ping", |p| Ok(json!({ "pong": p })));

    let first = Requester::new(Arc::new(server.connect()), &options);
    let second = Requester::new(Arc::new(server.connect()), &options);

    let (a, b) = tokio::join!(
        first.call("sys:ping", json!(1)),
        second.call("sys:ping", json!(2)),
    );
    assert_eq!(a?, json!({ "pong": 1 }));
    assert_eq!(b?, json!({ "pong": 2 }));
    Ok(())
}

#[tokio::test]
async fn test_websocket_round_trip_and_broadcast() -> Result<()> {
    init_tracing();
    let server = WsServer::bind_localhost(0).await?;
    let options = BridgeOptions::new().with_rpc_timeout(Duration::from_secs(2));
    let responder = Responder::new(server.clone(), &options)?;
    register_math(&responder);

    let client = Arc::new(WsClient::connect(&server.ws_url()).await?);
    let requester = Requester::new(client.clone(), &options);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let _sub = requester.subscribe("terminal:output", move |data| {
        let _ = tx.send(data);
    });

    assert_eq!(requester.call("math:add", json!({ "a": 5, "b": 3 })).await?, json!(8));
    let err = requester.call("error:throw", Value::Null).await.unwrap_err();
    assert_eq!(err.to_string(), "boom");

    responder.broadcast("terminal:output", json!("ready"))?;
    let got = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await?;
    assert_eq!(got, Some(json!("ready")));

    client.close();
    server.shutdown();
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn test_every_call_gets_its_own_result(values in prop::collection::vec(any::<i32>(), 1..24)) {
        let runtime = tokio::runtime::Runtime::new().expect("runtime");
        runtime.block_on(async {
            let (responder, requester) = memory_pair(Duration::from_secs(2)).expect("pair");
            responder.handle("echo:jitter", |p: Value| async move {
                let n = p.as_i64().unwrap_or(0);
                sleep(Duration::from_millis(n.unsigned_abs() % 7)).await;
                Ok::<_, HandlerError>(json!(n))
            });

            let calls = values.iter().map(|&v| {
                let requester = requester.clone();
                async move { (v, requester.call("echo:jitter", json!(v)).await) }
            });

            for (sent, got) in futures_util::future::join_all(calls).await {
                assert_eq!(got.expect("call"), json!(sent));
            }
            assert_eq!(requester.pending_count(), 0);
        });
    }
}
