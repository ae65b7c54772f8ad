use std::borrow::Cow;
use std::time::Duration;

use opentelemetry::global::{self, BoxedSpan, BoxedTracer};
use opentelemetry::trace::{Span, Status, Tracer};
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Span factory for the request pipeline. When no collector endpoint is
/// configured, or the collector is unreachable at startup, every span
/// operation is a no-op.
pub struct TracerAdapter {
    tracer: Option<BoxedTracer>,
}

impl TracerAdapter {
    pub fn noop() -> Self {
        Self { tracer: None }
    }

    /// Probe the collector and install the OTLP pipeline when it answers.
    /// An unreachable collector downgrades to the noop adapter instead of
    /// failing startup.
    pub async fn setup(service_name: &str, endpoint: Option<&str>) -> Self {
        let Some(endpoint) = endpoint else {
            return Self::noop();
        };
        if !probe_collector(endpoint).await {
            tracing::warn!(
                endpoint,
                "trace collector unreachable, tracing disabled"
            );
            return Self::noop();
        }
        match install_pipeline(service_name, endpoint) {
            Ok(tracer) => Self {
                tracer: Some(tracer),
            },
            Err(e) => {
                tracing::warn!(error = %e, "failed to install trace exporter, tracing disabled");
                Self::noop()
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.tracer.is_some()
    }

    /// Start a span under the currently active one, if any.
    pub fn start_span(&self, name: impl Into<Cow<'static, str>>) -> SpanGuard {
        SpanGuard {
            span: self.tracer.as_ref().map(|t| t.start(name)),
        }
    }
}

/// One HTTP answer of any status proves a listener: collectors commonly
/// reject a bare GET with 405. Only a transport error means unreachable.
async fn probe_collector(endpoint: &str) -> bool {
    let client = match reqwest::Client::builder().timeout(PROBE_TIMEOUT).build()
    {
        Ok(client) => client,
        Err(_) => return false,
    };
    client.get(endpoint).send().await.is_ok()
}

fn install_pipeline(
    service_name: &str,
    endpoint: &str,
) -> Result<BoxedTracer, Box<dyn std::error::Error + Send + Sync>> {
    let resource = Resource::builder()
        .with_attribute(KeyValue::new(
            "service.name",
            service_name.to_string(),
        ))
        .build();

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build();

    global::set_tracer_provider(provider);
    global::set_text_map_propagator(TraceContextPropagator::new());

    Ok(global::tracer(service_name.to_string()))
}

/// Ends its span exactly once: `end` is idempotent and `Drop` covers every
/// exit path that never reached an explicit `end` call.
pub struct SpanGuard {
    span: Option<BoxedSpan>,
}

impl SpanGuard {
    pub fn record_error(&mut self, message: &str) {
        if let Some(span) = self.span.as_mut() {
            span.set_status(Status::error(message.to_string()));
        }
    }

    pub fn set_attribute(&mut self, key: &'static str, value: String) {
        if let Some(span) = self.span.as_mut() {
            span.set_attribute(KeyValue::new(key, value));
        }
    }

    pub fn end(&mut self) {
        if let Some(mut span) = self.span.take() {
            span.end();
        }
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        self.end();
    }
}
