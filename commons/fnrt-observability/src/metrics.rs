use prometheus::{
    CounterVec, HistogramOpts, HistogramTimer, HistogramVec, Opts, Registry,
    TextEncoder,
};

/// Content type of the text exposition format.
pub const TEXT_FORMAT: &str = prometheus::TEXT_FORMAT;

/// Per-function call statistics backed by a private prometheus registry.
///
/// Constructed once at startup and handed to the dispatcher; there is no
/// global registry. Counters are labeled by function name and HTTP method.
#[derive(Clone)]
pub struct StatsRecorder {
    registry: Registry,
    calls: CounterVec,
    failures: CounterVec,
    duration: HistogramVec,
}

impl StatsRecorder {
    pub fn new() -> Self {
        let registry = Registry::new();
        let calls = CounterVec::new(
            Opts::new(
                "function_calls_total",
                "Number of calls to user function",
            ),
            &["function", "method"],
        )
        .unwrap();
        let failures = CounterVec::new(
            Opts::new("function_failures_total", "Number of failed calls"),
            &["function", "method"],
        )
        .unwrap();
        let duration = HistogramVec::new(
            HistogramOpts::new(
                "function_duration_seconds",
                "Duration of user function in seconds",
            ),
            &["function", "method"],
        )
        .unwrap();
        registry.register(Box::new(calls.clone())).unwrap();
        registry.register(Box::new(failures.clone())).unwrap();
        registry.register(Box::new(duration.clone())).unwrap();
        Self {
            registry,
            calls,
            failures,
            duration,
        }
    }

    pub fn inc_calls(&self, function: &str, method: &str) {
        self.calls.with_label_values(&[function, method]).inc();
    }

    pub fn inc_failures(&self, function: &str, method: &str) {
        self.failures.with_label_values(&[function, method]).inc();
    }

    /// Returns a timer that records one duration observation when dropped
    /// (or when `observe_duration` is called explicitly).
    pub fn start_timer(&self, function: &str, method: &str) -> HistogramTimer {
        self.duration
            .with_label_values(&[function, method])
            .start_timer()
    }

    pub fn calls(&self, function: &str, method: &str) -> u64 {
        self.calls.with_label_values(&[function, method]).get() as u64
    }

    pub fn failures(&self, function: &str, method: &str) -> u64 {
        self.failures.with_label_values(&[function, method]).get() as u64
    }

    /// Render the registry in the text exposition format.
    pub fn render(&self) -> String {
        let mut buf = String::new();
        let encoder = TextEncoder::new();
        if let Err(e) =
            encoder.encode_utf8(&self.registry.gather(), &mut buf)
        {
            tracing::warn!(error = %e, "failed to encode metrics");
        }
        buf
    }
}

impl Default for StatsRecorder {
    fn default() -> Self {
        Self::new()
    }
}
