//! End-to-end RPC scenarios over the in-process bus.

use bytes::Bytes;
use microbus_core::prelude::*;
use microbus_core::trace::BAGGAGE_HEADER;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

async fn echo(_ctx: RequestContext, request: Value) -> anyhow::Result<Value> {
    Ok(request)
}

async fn crash(_ctx: RequestContext, _request: Value) -> anyhow::Result<Value> {
    Err(anyhow::anyhow!("boom"))
}

/// Spawn the service and wait until it is subscribed and serving.
async fn spawn_service(service: Service) -> (ServiceHandle, JoinHandle<Result<()>>) {
    let mut handle = service.handle();
    let task = tokio::spawn(service.run());
    handle.running().await;
    assert!(handle.is_running());
    (handle, task)
}

async fn client_for(bus: &MemoryBus, service: &str) -> Client {
    let connection = BusConfig::in_process(bus).connect().await.unwrap();
    Client::new(service, connection).with_timeout(Duration::from_secs(1))
}

#[tokio::test]
async fn test_echo_round_trip() {
    let bus = MemoryBus::new();
    let service = Service::builder("svc", BusConfig::in_process(&bus))
        .endpoint("echo", echo)
        .unwrap()
        .build()
        .unwrap();
    let (handle, task) = spawn_service(service).await;

    let client = client_for(&bus, "svc").await;
    let reply = client
        .request("echo", Some(json!({"foo": "bar"})))
        .await
        .unwrap();
    assert_eq!(reply, json!({"foo": "bar"}));

    handle.stop();
    assert!(task.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_handler_error_surfaces_verbatim_and_service_survives() {
    let bus = MemoryBus::new();
    let service = Service::builder("svc", BusConfig::in_process(&bus))
        .endpoint("crash", crash)
        .unwrap()
        .endpoint("echo", echo)
        .unwrap()
        .build()
        .unwrap();
    let (handle, _task) = spawn_service(service).await;

    let client = client_for(&bus, "svc").await;
    let err = client.request("crash", Some(json!({}))).await.unwrap_err();
    assert!(err.is_remote());
    assert_eq!(err.to_string(), "boom");

    // The failure was contained: other endpoints keep serving.
    let reply = client.request("echo", Some(json!({"n": 1}))).await.unwrap();
    assert_eq!(reply, json!({"n": 1}));

    handle.stop();
}

#[tokio::test]
async fn test_malformed_payload_yields_invalid_request_without_invoking_handler() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&invocations);
    let counted = move |_ctx: RequestContext, request: Value| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            anyhow::Ok(request)
        }
    };

    let bus = MemoryBus::new();
    let service = Service::builder("svc", BusConfig::in_process(&bus))
        .endpoint("counted", counted)
        .unwrap()
        .build()
        .unwrap();
    let (handle, _task) = spawn_service(service).await;

    // Send raw non-JSON bytes straight through the transport.
    let connection = BusConfig::in_process(&bus).connect().await.unwrap();
    let reply = connection
        .request(
            "svc.counted",
            Headers::new(),
            Bytes::from_static(b"\x00 definitely not json"),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

    let envelope = ResponseEnvelope::from_slice(&reply).unwrap();
    assert_eq!(envelope.status, Status::InvalidRequest);
    assert!(envelope.error.is_some());
    assert!(envelope.result.is_none());
    assert_eq!(invocations.load(Ordering::SeqCst), 0);

    handle.stop();
}

#[tokio::test]
async fn test_request_with_no_responder_times_out() {
    let bus = MemoryBus::new();
    let client = client_for(&bus, "ghost")
        .await
        .with_timeout(Duration::from_millis(500));

    let started = Instant::now();
    let err = client
        .request("missing_subject_nobody_subscribed", None)
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.is_timeout());
    assert!(elapsed >= Duration::from_millis(400), "returned too early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "did not respect timeout: {elapsed:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_nested_call_on_same_service_does_not_deadlock() {
    let bus = MemoryBus::new();

    let nested_client = client_for(&bus, "svc").await;
    let outer = move |ctx: RequestContext, request: Value| {
        let client = nested_client.clone();
        async move {
            let inner = client
                .request_with(
                    "inner",
                    Some(request),
                    CallOptions::default().trace(ctx.trace.clone()),
                )
                .await?;
            anyhow::Ok(json!({ "outer": inner }))
        }
    };

    async fn inner(_ctx: RequestContext, request: Value) -> anyhow::Result<Value> {
        Ok(json!({ "inner": request }))
    }

    let service = Service::builder("svc", BusConfig::in_process(&bus))
        .endpoint("outer", outer)
        .unwrap()
        .endpoint("inner", inner)
        .unwrap()
        .build()
        .unwrap();
    let (handle, _task) = spawn_service(service).await;

    let client = client_for(&bus, "svc").await;
    let reply = client.request("outer", Some(json!({"x": 1}))).await.unwrap();
    assert_eq!(reply, json!({"outer": {"inner": {"x": 1}}}));

    handle.stop();
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let bus = MemoryBus::new();
    let service = Service::builder("svc", BusConfig::in_process(&bus))
        .endpoint("echo", echo)
        .unwrap()
        .shutdown_grace(Duration::from_millis(10))
        .build()
        .unwrap();
    let (handle, task) = spawn_service(service).await;

    handle.stop();
    handle.stop();
    let mut waiter = handle.clone();
    waiter.stopped().await;
    assert_eq!(handle.lifecycle(), Lifecycle::Stopped);

    // A second stop after the fact changes nothing.
    handle.stop();
    assert_eq!(handle.lifecycle(), Lifecycle::Stopped);
    assert!(task.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_stopped_service_no_longer_answers() {
    let bus = MemoryBus::new();
    let service = Service::builder("svc", BusConfig::in_process(&bus))
        .endpoint("echo", echo)
        .unwrap()
        .shutdown_grace(Duration::from_millis(10))
        .build()
        .unwrap();
    let (handle, task) = spawn_service(service).await;

    let client = client_for(&bus, "svc").await.with_timeout(Duration::from_millis(100));
    client.request("echo", None).await.unwrap();

    handle.stop();
    let mut waiter = handle.clone();
    waiter.stopped().await;
    assert!(task.await.unwrap().is_ok());

    let err = client.request("echo", None).await.unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test]
async fn test_trace_context_propagates_to_handler() {
    async fn baggage(ctx: RequestContext, _request: Value) -> anyhow::Result<Value> {
        Ok(serde_json::to_value(&ctx.trace)?)
    }

    let bus = MemoryBus::new();
    let service = Service::builder("svc", BusConfig::in_process(&bus))
        .endpoint("baggage", baggage)
        .unwrap()
        .build()
        .unwrap();
    let (handle, _task) = spawn_service(service).await;

    let client = client_for(&bus, "svc").await;
    let trace = TraceContext::new()
        .with("trace-id", "abc123")
        .with("tenant", "acme");
    let reply = client
        .request_with("baggage", None, CallOptions::default().trace(trace))
        .await
        .unwrap();
    assert_eq!(reply, json!({"trace-id": "abc123", "tenant": "acme"}));

    // Without options no baggage header is sent; the handler sees the
    // empty context.
    let reply = client.request("baggage", None).await.unwrap();
    assert_eq!(reply, json!({}));

    handle.stop();
}

#[tokio::test]
async fn test_malformed_baggage_degrades_to_empty_context() {
    async fn baggage(ctx: RequestContext, _request: Value) -> anyhow::Result<Value> {
        Ok(serde_json::to_value(&ctx.trace)?)
    }

    let bus = MemoryBus::new();
    let service = Service::builder("svc", BusConfig::in_process(&bus))
        .endpoint("baggage", baggage)
        .unwrap()
        .build()
        .unwrap();
    let (handle, _task) = spawn_service(service).await;

    let connection = BusConfig::in_process(&bus).connect().await.unwrap();
    let mut headers = Headers::new();
    headers.insert(BAGGAGE_HEADER.to_string(), "%%% not json".to_string());
    let reply = connection
        .request(
            "svc.baggage",
            headers,
            Bytes::from_static(b"{}"),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

    let envelope = ResponseEnvelope::from_slice(&reply).unwrap();
    assert_eq!(envelope.status, Status::Ok);
    assert_eq!(envelope.result, Some(json!({})));

    handle.stop();
}

#[tokio::test]
async fn test_probe_target_health_endpoint_answers() {
    let bus = MemoryBus::new();
    let service = Service::builder("svc", BusConfig::in_process(&bus))
        .instance_id("node-1")
        .build()
        .unwrap();
    let (handle, _task) = spawn_service(service).await;

    let client = client_for(&bus, "svc").await;
    let reply = client
        .request(&microbus_core::health::endpoint_name("node-1"), None)
        .await
        .unwrap();
    assert_eq!(reply["status"], json!("ok"));

    handle.stop();
}

#[tokio::test]
async fn test_two_services_on_one_bus_do_not_cross_talk() {
    async fn name_a(_ctx: RequestContext, _request: Value) -> anyhow::Result<Value> {
        Ok(json!("a"))
    }
    async fn name_b(_ctx: RequestContext, _request: Value) -> anyhow::Result<Value> {
        Ok(json!("b"))
    }

    let bus = MemoryBus::new();
    let service_a = Service::builder("alpha", BusConfig::in_process(&bus))
        .endpoint("who", name_a)
        .unwrap()
        .build()
        .unwrap();
    let service_b = Service::builder("beta", BusConfig::in_process(&bus))
        .endpoint("who", name_b)
        .unwrap()
        .build()
        .unwrap();
    let (handle_a, _) = spawn_service(service_a).await;
    let (handle_b, _) = spawn_service(service_b).await;

    let client_a = client_for(&bus, "alpha").await;
    let client_b = client_for(&bus, "beta").await;
    assert_eq!(client_a.request("who", None).await.unwrap(), json!("a"));
    assert_eq!(client_b.request("who", None).await.unwrap(), json!("b"));

    handle_a.stop();
    handle_b.stop();
}
