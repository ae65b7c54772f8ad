use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use bytes::Bytes;
use fnrt_observability::{StatsRecorder, TracerAdapter};
use fnrt_runtime::executor::Executor;
use fnrt_runtime::{
    Completer, Event, EventData, EventPublisher, FnError, FnValue,
    FunctionHandle, FunctionRegistry, InvocationContext, RuntimeState,
    UserFunction, build_router,
};
use http_body_util::Full;
use serde_json::json;
use tower::util::ServiceExt;

const BODY_LIMIT: usize = 1024 * 1024;

fn test_state(
    registry: FunctionRegistry,
    entry: &str,
    timeout: Duration,
) -> (Router, Arc<RuntimeState>) {
    let handle = FunctionHandle::resolve(registry, entry);
    let context = InvocationContext {
        function_name: handle.name().to_string(),
        timeout,
        runtime: "fnrt".to_string(),
        memory_limit: String::new(),
        namespace: "default".to_string(),
    };
    let state = Arc::new(RuntimeState {
        handle,
        context,
        stats: StatsRecorder::new(),
        tracer: TracerAdapter::noop(),
        executor: Executor::new(false),
        publisher: EventPublisher::new(None),
    });
    (build_router(state.clone(), BODY_LIMIT, false), state)
}

fn echo(event: Event, _ctx: InvocationContext) -> Result<FnValue, FnError> {
    Ok(match event.data {
        EventData::Empty => FnValue::Empty,
        EventData::Json(value) => FnValue::Json(value),
        EventData::Text(text) => FnValue::Text(text),
        EventData::Binary(bytes) => FnValue::Binary(bytes),
    })
}

fn echo_router() -> (Router, Arc<RuntimeState>) {
    let registry =
        FunctionRegistry::new().register("echo", UserFunction::Sync(echo));
    test_state(registry, "echo", Duration::from_secs(5))
}

async fn body_bytes(res: axum::response::Response) -> Bytes {
    axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn healthz_works_without_loaded_function() {
    let (app, _) = test_state(
        FunctionRegistry::new(),
        "missing",
        Duration::from_secs(5),
    );

    let res = app
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(body_bytes(res).await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn readyz_reflects_load_state() {
    let (app, _) = echo_router();
    let res = app
        .oneshot(
            Request::builder()
                .uri("/readyz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let (app, _) = test_state(
        FunctionRegistry::new(),
        "missing",
        Duration::from_secs(5),
    );
    let res = app
        .oneshot(
            Request::builder()
                .uri("/readyz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test(flavor = "multi_thread")]
async fn json_echo_roundtrip() {
    let (app, _) = echo_router();
    let res = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"a":1}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        res.headers().get("content-type").unwrap(),
        "application/json"
    );
    assert_eq!(
        res.headers().get("access-control-allow-origin").unwrap(),
        "*"
    );
    assert!(res.headers().contains_key("x-request-id"));
    let body = body_bytes(res).await;
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value, json!({"a": 1}));
}

#[tokio::test(flavor = "multi_thread")]
async fn metrics_expose_call_counters() {
    let (app, _) = echo_router();
    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/")
                .header("content-type", "text/plain")
                .body(Body::from("hi"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let content_type = res
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/plain"));
    let body = String::from_utf8(body_bytes(res).await.to_vec()).unwrap();
    assert!(body.contains(
        "function_calls_total{function=\"echo\",method=\"POST\"} 1"
    ));
    assert!(body.contains(
        "function_duration_seconds_count{function=\"echo\",method=\"POST\"} 1"
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn binary_mode_cloudevents_headers() {
    fn introspect(
        event: Event,
        _ctx: InvocationContext,
    ) -> Result<FnValue, FnError> {
        let data = match &event.data {
            EventData::Text(text) => json!(text),
            EventData::Json(value) => value.clone(),
            _ => json!(null),
        };
        Ok(FnValue::Json(json!({
            "type": event.attributes.event_type,
            "source": event.attributes.source,
            "specversion": event.attributes.specversion,
            "data": data,
        })))
    }

    let registry = FunctionRegistry::new()
        .register("introspect", UserFunction::Sync(introspect));
    let (app, _) = test_state(registry, "introspect", Duration::from_secs(5));

    let res = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/")
                .header("content-type", "text/plain")
                .header("ce-type", "foo")
                .header("ce-source", "bar")
                .body(Body::from("hello"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let value: serde_json::Value =
        serde_json::from_slice(&body_bytes(res).await).unwrap();
    assert_eq!(value["type"], "foo");
    assert_eq!(value["source"], "bar");
    assert_eq!(value["data"], "hello");
}

#[tokio::test(flavor = "multi_thread")]
async fn structured_mode_envelope() {
    fn introspect(
        event: Event,
        _ctx: InvocationContext,
    ) -> Result<FnValue, FnError> {
        let data = match &event.data {
            EventData::Json(value) => value.clone(),
            _ => json!(null),
        };
        Ok(FnValue::Json(json!({
            "type": event.attributes.event_type,
            "id": event.attributes.id,
            "data": data,
        })))
    }

    let registry = FunctionRegistry::new()
        .register("introspect", UserFunction::Sync(introspect));
    let (app, _) = test_state(registry, "introspect", Duration::from_secs(5));

    let envelope = json!({
        "specversion": "1.0",
        "type": "com.example.created",
        "source": "/orders",
        "id": "evt-7",
        "data": {"n": 2}
    });
    let res = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/")
                .header("content-type", "application/cloudevents+json")
                .body(Body::new(Full::from(Bytes::from(envelope.to_string()))))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let value: serde_json::Value =
        serde_json::from_slice(&body_bytes(res).await).unwrap();
    assert_eq!(value["type"], "com.example.created");
    assert_eq!(value["id"], "evt-7");
    assert_eq!(value["data"], json!({"n": 2}));
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_json_returns_500_and_healthz_stays_up() {
    let (app, state) = echo_router();
    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/")
                .header("content-type", "application/json")
                .body(Body::from("{oops"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = String::from_utf8(body_bytes(res).await.to_vec()).unwrap();
    assert!(body.contains("INVALID_PAYLOAD"));
    // detail stays server-side
    assert!(!body.contains("oops"));
    assert_eq!(state.stats.failures("echo", "POST"), 1);

    let res = app
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread")]
async fn options_never_reaches_function() {
    fn must_not_run(
        _: Event,
        _: InvocationContext,
    ) -> Result<FnValue, FnError> {
        panic!("executor reached on OPTIONS");
    }

    let registry = FunctionRegistry::new()
        .register("guard", UserFunction::Sync(must_not_run));
    let (app, state) = test_state(registry, "guard", Duration::from_secs(5));

    let res = app
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/")
                .header("origin", "https://example.com")
                .header("access-control-request-method", "POST")
                .header("access-control-request-headers", "content-type")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(res.status().is_success());
    assert!(
        res.headers().contains_key("access-control-allow-origin"),
        "preflight must carry CORS headers"
    );
    assert!(res.headers().contains_key("access-control-allow-methods"));
    assert!(body_bytes(res).await.is_empty());
    assert_eq!(state.stats.calls("guard", "OPTIONS"), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_error_returns_500_and_increments_failures() {
    fn fails(_: Event, _: InvocationContext) -> Result<FnValue, FnError> {
        Err(FnError::msg("boom"))
    }

    let registry =
        FunctionRegistry::new().register("boom", UserFunction::Sync(fails));
    let (app, state) = test_state(registry, "boom", Duration::from_secs(5));

    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/")
                .body(Body::from("x"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(state.stats.calls("boom", "POST"), 1);
    assert_eq!(state.stats.failures("boom", "POST"), 1);

    let res = app
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread")]
async fn panic_returns_500_and_process_survives() {
    fn explodes(_: Event, _: InvocationContext) -> Result<FnValue, FnError> {
        panic!("boom");
    }

    let registry = FunctionRegistry::new()
        .register("explodes", UserFunction::Sync(explodes));
    let (app, _) = test_state(registry, "explodes", Duration::from_secs(5));

    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let res = app
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread")]
async fn timeout_returns_408_within_bound() {
    let registry = FunctionRegistry::new().register(
        "slow",
        UserFunction::from_async(|_, _| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(FnValue::Empty)
        }),
    );
    let (app, state) =
        test_state(registry, "slow", Duration::from_millis(200));

    let started = Instant::now();
    let res = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::REQUEST_TIMEOUT);
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(state.stats.failures("slow", "POST"), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn oversized_body_is_a_client_error() {
    let (app, _) = echo_router();
    let oversized = vec![b'x'; BODY_LIMIT + 1];
    let res = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/")
                .header("content-type", "text/plain")
                .body(Body::from(oversized))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test(flavor = "multi_thread")]
async fn double_completion_sends_first_response() {
    fn responds_twice(
        _: Event,
        _: InvocationContext,
        completer: Completer,
    ) {
        completer.succeed(FnValue::Text("first".into()));
        completer.succeed(FnValue::Text("second".into()));
        completer.fail(FnError::msg("late"));
    }

    let registry = FunctionRegistry::new()
        .register("twice", UserFunction::Callback(responds_twice));
    let (app, state) = test_state(registry, "twice", Duration::from_secs(5));

    let res = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_bytes(res).await, Bytes::from_static(b"first"));
    // the late failure signal was dropped, not double-counted
    assert_eq!(state.stats.failures("twice", "POST"), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn function_not_loaded_returns_500() {
    let (app, state) = test_state(
        FunctionRegistry::new(),
        "missing",
        Duration::from_secs(5),
    );

    let res = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = String::from_utf8(body_bytes(res).await.to_vec()).unwrap();
    assert!(body.contains("FUNCTION_NOT_LOADED"));
    assert_eq!(state.stats.failures("missing", "POST"), 1);
}
