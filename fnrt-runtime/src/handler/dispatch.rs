use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Uri};
use tracing::{debug, warn};

use super::RuntimeState;
use crate::error::RuntimeError;
use crate::event::{Event, ResponseShaper};
use crate::function::FnValue;

/// The fallback route: every request that is not a built-in endpoint goes
/// through event building and the executor.
pub(super) async fn dispatch(
    State(state): State<Arc<RuntimeState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // Preflights are answered by the CORS layer; a bare OPTIONS still gets
    // an empty reply without entering the pipeline.
    if method == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }

    let request_id = uuid::Uuid::new_v4();
    let name = state.handle.name().to_string();
    let label_method = method.as_str().to_string();

    state.stats.inc_calls(&name, &label_method);
    let timer = state.stats.start_timer(&name, &label_method);
    let mut span = state.tracer.start_span("function-invocation");
    span.set_attribute("http.method", label_method.clone());
    span.set_attribute("http.path", uri.path().to_string());

    let function = match state.handle.function() {
        Ok(function) => function.clone(),
        Err(error) => {
            warn!(
                request_id = %request_id,
                function = %name,
                error = %error,
                "rejecting request, function not loaded"
            );
            state.stats.inc_failures(&name, &label_method);
            span.record_error("function not loaded");
            drop(timer);
            return finish(
                RuntimeError::FunctionNotLoaded(error.clone())
                    .into_response(),
                request_id,
            );
        }
    };

    let event =
        match Event::build(method, uri.path().to_string(), headers, body) {
            Ok(event) => event,
            Err(error) => {
                state.stats.inc_failures(&name, &label_method);
                span.record_error(&error.to_string());
                drop(timer);
                return finish(error.into_response(), request_id);
            }
        };
    debug!(request_id = %request_id, function = %name, "event built");

    let shaper = event.response.clone();
    let result = state
        .executor
        .invoke(function, event, state.context.clone())
        .await;
    drop(timer);

    let response = match result {
        Ok(value) => {
            debug!(request_id = %request_id, "invocation succeeded");
            span.end();
            value_into_response(value, &shaper)
        }
        Err(error) => {
            warn!(
                request_id = %request_id,
                function = %name,
                error = %error,
                "invocation failed"
            );
            state.stats.inc_failures(&name, &label_method);
            span.record_error(&error.to_string());
            error.into_response()
        }
    };
    finish(response, request_id)
}

fn value_into_response(value: FnValue, shaper: &ResponseShaper) -> Response {
    let (body, content_type) = value.into_body();
    let mut resp = Response::new(Body::from(body));
    if let Some(content_type) = content_type {
        resp.headers_mut().insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static(content_type),
        );
    }
    shaper.apply(&mut resp);
    resp
}

fn finish(mut resp: Response, request_id: uuid::Uuid) -> Response {
    if let Ok(value) = request_id.to_string().parse() {
        resp.headers_mut().insert("x-request-id", value);
    }
    resp
}
