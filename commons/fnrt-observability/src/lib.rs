pub mod metrics;
pub mod tracer;
pub mod tracing;

pub use metrics::StatsRecorder;
pub use tracer::{SpanGuard, TracerAdapter};
pub use tracing::{TracingConfig, setup_tracing};
