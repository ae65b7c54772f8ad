use std::time::Duration;

use axum::response::IntoResponse;
use http::StatusCode;

use crate::function::{FnError, LoadError};

#[derive(thiserror::Error, Debug)]
pub enum RuntimeError {
    #[error("function not loaded: {0}")]
    FunctionNotLoaded(#[from] LoadError),
    #[error("malformed JSON payload")]
    InvalidPayload(#[source] serde_json::Error),
    #[error("function error: {0}")]
    Function(#[from] FnError),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

impl RuntimeError {
    fn code(&self) -> &'static str {
        match self {
            RuntimeError::FunctionNotLoaded(_) => "FUNCTION_NOT_LOADED",
            RuntimeError::InvalidPayload(_) => "INVALID_PAYLOAD",
            RuntimeError::Function(_) => "FUNCTION_ERROR",
            RuntimeError::Timeout(_) => "TIMEOUT",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            RuntimeError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RuntimeError {
    fn into_response(self) -> axum::response::Response {
        // Parse failures keep their detail server-side; the client only sees
        // the generic message from the Display impl.
        if let RuntimeError::InvalidPayload(source) = &self {
            tracing::warn!(error = %source, "rejecting malformed payload");
        }
        let body = serde_json::json!({
            "error": { "code": self.code(), "message": self.to_string() }
        });
        let mut resp = (self.status(), body.to_string()).into_response();
        resp.headers_mut().insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/json"),
        );
        resp
    }
}
