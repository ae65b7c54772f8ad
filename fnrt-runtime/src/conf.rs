use std::time::Duration;

use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    /// Name of the registered function entry to serve. May stay empty when
    /// exactly one function is registered.
    #[envconfig(from = "FUNC_HANDLER", default = "")]
    pub func_handler: String,
    /// Per-request execution deadline in seconds.
    #[envconfig(from = "FUNC_TIMEOUT", default = "180")]
    pub func_timeout: u64,
    #[envconfig(from = "FUNC_PORT", default = "8080")]
    pub func_port: u16,
    /// Maximum request body size in MB.
    #[envconfig(from = "REQ_MB_LIMIT", default = "1")]
    pub req_mb_limit: usize,
    #[envconfig(from = "FUNC_RUNTIME", default = "")]
    pub func_runtime: String,
    #[envconfig(from = "FUNC_MEMORY_LIMIT", default = "")]
    pub func_memory_limit: String,
    #[envconfig(from = "FUNC_NAMESPACE", default = "default")]
    pub func_namespace: String,
    /// Address the deprecated publish helpers POST CloudEvents to.
    #[envconfig(from = "EVENT_BROKER_ADDR")]
    pub event_broker_addr: Option<String>,
    /// Absent endpoint disables tracing entirely instead of failing startup.
    #[envconfig(from = "TRACE_COLLECTOR_ENDPOINT")]
    pub trace_collector_endpoint: Option<String>,
    #[envconfig(from = "REQUEST_LOGGING", default = "false")]
    pub request_logging: bool,
    /// Terminate the process when a timed-out function cannot be interrupted
    /// (it blocks a thread without a suspension point). The supervisor is
    /// expected to restart the process.
    #[envconfig(from = "FATAL_TIMEOUT", default = "true")]
    pub fatal_timeout: bool,
    // Optional: either "json" or "plain"/"text"; defaults handled in tracing setup
    #[envconfig(from = "LOG_FORMAT")]
    pub log_format: Option<String>,
}

impl Config {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.func_timeout)
    }

    pub fn body_limit_bytes(&self) -> usize {
        self.req_mb_limit * 1024 * 1024
    }
}
