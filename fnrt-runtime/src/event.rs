use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde_json::Value;

use crate::conf::Config;
use crate::error::RuntimeError;

const CE_TYPE: &str = "ce-type";
const CE_SOURCE: &str = "ce-source";
const CE_EVENT_TYPE_VERSION: &str = "ce-eventtypeversion";
const CE_SPEC_VERSION: &str = "ce-specversion";
const CE_ID: &str = "ce-id";
const CE_TIME: &str = "ce-time";

const CONTENT_TYPE_JSON: &str = "application/json";
const CONTENT_TYPE_CLOUDEVENTS: &str = "application/cloudevents+json";

/// CloudEvents envelope attributes for one invocation. Binary mode reads
/// them from `ce-*` headers; structured mode overrides them from the
/// `application/cloudevents+json` body.
#[derive(Clone, Debug)]
pub struct CloudEventAttributes {
    pub event_type: Option<String>,
    pub source: Option<String>,
    pub specversion: String,
    pub id: String,
    pub time: String,
    pub eventtypeversion: Option<String>,
    pub datacontenttype: Option<String>,
}

impl CloudEventAttributes {
    fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Self {
            event_type: header(CE_TYPE),
            source: header(CE_SOURCE),
            eventtypeversion: header(CE_EVENT_TYPE_VERSION),
            specversion: header(CE_SPEC_VERSION)
                .unwrap_or_else(|| "1.0".to_string()),
            id: header(CE_ID)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            time: header(CE_TIME)
                .unwrap_or_else(|| chrono::Utc::now().to_rfc3339()),
            datacontenttype: header(CONTENT_TYPE.as_str()),
        }
    }

    /// Structured-mode attributes win over binary-mode defaults.
    fn merge_structured(&mut self, envelope: &Value) {
        let field = |name: &str| {
            envelope.get(name).and_then(Value::as_str).map(str::to_string)
        };
        if let Some(v) = field("type") {
            self.event_type = Some(v);
        }
        if let Some(v) = field("source") {
            self.source = Some(v);
        }
        if let Some(v) = field("specversion") {
            self.specversion = v;
        }
        if let Some(v) = field("id") {
            self.id = v;
        }
        if let Some(v) = field("time") {
            self.time = v;
        }
        if let Some(v) = field("eventtypeversion") {
            self.eventtypeversion = Some(v);
        }
        if let Some(v) = field("datacontenttype") {
            self.datacontenttype = Some(v);
        }
    }
}

/// Decoded request payload; the variant mirrors the wire content type.
#[derive(Clone, Debug, PartialEq)]
pub enum EventData {
    Empty,
    Json(Value),
    Text(String),
    Binary(Bytes),
}

/// One inbound invocation: CloudEvents attributes, the decoded payload, and
/// the request line the function may inspect. Created per request, dropped
/// with the response.
#[derive(Clone)]
pub struct Event {
    pub attributes: CloudEventAttributes,
    pub data: EventData,
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub response: ResponseShaper,
}

impl Event {
    pub fn build(
        method: Method,
        path: String,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<Self, RuntimeError> {
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        let mut attributes = CloudEventAttributes::from_headers(&headers);

        let data = if content_type.starts_with("multipart/") {
            // multipart payloads pass through untouched
            EventData::Binary(body)
        } else if content_type.starts_with(CONTENT_TYPE_CLOUDEVENTS) {
            let envelope: Value = serde_json::from_slice(&body)
                .map_err(RuntimeError::InvalidPayload)?;
            attributes.merge_structured(&envelope);
            match envelope.get("data") {
                Some(data) => EventData::Json(data.clone()),
                None => EventData::Empty,
            }
        } else if content_type.starts_with(CONTENT_TYPE_JSON) {
            if body.is_empty() {
                EventData::Empty
            } else {
                EventData::Json(
                    serde_json::from_slice(&body)
                        .map_err(RuntimeError::InvalidPayload)?,
                )
            }
        } else if body.is_empty() {
            EventData::Empty
        } else {
            match std::str::from_utf8(&body) {
                Ok(text) => EventData::Text(text.to_string()),
                Err(_) => EventData::Binary(body),
            }
        };

        Ok(Self {
            attributes,
            data,
            method,
            path,
            headers,
            response: ResponseShaper::default(),
        })
    }
}

/// Response helpers exposed to user code: status, content type, and header
/// overrides collected here are applied by the dispatcher once the function
/// completes.
#[derive(Clone, Default)]
pub struct ResponseShaper {
    inner: Arc<Mutex<ResponseOverrides>>,
}

#[derive(Default)]
struct ResponseOverrides {
    status: Option<StatusCode>,
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl ResponseShaper {
    pub fn set_status(&self, status: StatusCode) {
        if let Ok(mut overrides) = self.inner.lock() {
            overrides.status = Some(status);
        }
    }

    pub fn set_content_type(&self, value: &str) {
        self.set_header(CONTENT_TYPE.as_str(), value);
    }

    pub fn set_header(&self, name: &str, value: &str) {
        let (Ok(name), Ok(value)) = (
            name.parse::<HeaderName>(),
            HeaderValue::from_str(value),
        ) else {
            tracing::debug!(name, "ignoring invalid response header");
            return;
        };
        if let Ok(mut overrides) = self.inner.lock() {
            overrides.headers.push((name, value));
        }
    }

    pub(crate) fn apply(&self, resp: &mut axum::response::Response) {
        let Ok(overrides) = self.inner.lock() else {
            return;
        };
        if let Some(status) = overrides.status {
            *resp.status_mut() = status;
        }
        for (name, value) in &overrides.headers {
            resp.headers_mut().insert(name.clone(), value.clone());
        }
    }
}

/// Execution metadata handed to the function next to the event. Built once
/// from process configuration; immutable during a call.
#[derive(Clone, Debug)]
pub struct InvocationContext {
    pub function_name: String,
    pub timeout: Duration,
    pub runtime: String,
    pub memory_limit: String,
    pub namespace: String,
}

impl InvocationContext {
    pub fn from_config(config: &Config, function_name: &str) -> Self {
        Self {
            function_name: function_name.to_string(),
            timeout: config.timeout(),
            runtime: config.func_runtime.clone(),
            memory_limit: config.func_memory_limit.clone(),
            namespace: config.func_namespace.clone(),
        }
    }
}
