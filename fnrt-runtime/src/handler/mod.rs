use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use fnrt_observability::{StatsRecorder, TracerAdapter};
use http::StatusCode;
use tower_http::cors::{AllowHeaders, AllowMethods, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::event::InvocationContext;
use crate::executor::Executor;
use crate::function::FunctionHandle;
use crate::publish::EventPublisher;

mod dispatch;

/// Everything the dispatcher needs, constructed once at startup and shared
/// across requests.
pub struct RuntimeState {
    pub handle: FunctionHandle,
    pub context: InvocationContext,
    pub stats: StatsRecorder,
    pub tracer: TracerAdapter,
    pub executor: Executor,
    pub publisher: EventPublisher,
}

pub fn build_router(
    state: Arc<RuntimeState>,
    body_limit: usize,
    request_logging: bool,
) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request());

    let mut router = Router::new()
        .route("/health", get(healthz))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .fallback(dispatch::dispatch)
        .with_state(state)
        .layer(cors)
        .layer(DefaultBodyLimit::max(body_limit));
    if request_logging {
        router = router.layer(TraceLayer::new_for_http());
    }
    router
}

/// Liveness: 200 with an empty body for as long as the process runs,
/// regardless of function-load state.
async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Readiness reflects function-load state without touching liveness.
async fn readyz(
    State(state): State<Arc<RuntimeState>>,
) -> axum::response::Response {
    match state.handle.load_error() {
        None => (StatusCode::OK, "ready").into_response(),
        Some(error) => {
            (StatusCode::SERVICE_UNAVAILABLE, error.to_string())
                .into_response()
        }
    }
}

async fn metrics(
    State(state): State<Arc<RuntimeState>>,
) -> axum::response::Response {
    (
        [(http::header::CONTENT_TYPE, fnrt_observability::metrics::TEXT_FORMAT)],
        state.stats.render(),
    )
        .into_response()
}
