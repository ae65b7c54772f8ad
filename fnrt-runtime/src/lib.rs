mod conf;
mod error;
pub mod event;
pub mod executor;
pub mod function;
mod handler;
pub mod publish;
pub mod server;
pub mod shutdown;

use std::sync::Arc;

use fnrt_observability::{StatsRecorder, TracerAdapter, TracingConfig, setup_tracing};
use tokio::net::TcpListener;
use tracing::info;

pub use conf::Config;
pub use error::RuntimeError;
pub use event::{
    CloudEventAttributes, Event, EventData, InvocationContext, ResponseShaper,
};
pub use function::{
    Completer, FnError, FnValue, FunctionHandle, FunctionRegistry,
    UserFunction,
};
pub use handler::{RuntimeState, build_router};
pub use publish::EventPublisher;
pub use shutdown::ShutdownController;

const SERVICE_NAME: &str = "fnrt-runtime";

/// Resolve the function, build the pipeline, and serve until a termination
/// signal drains the listener.
pub async fn start_server(
    config: Config,
    registry: FunctionRegistry,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let json_format =
        match config.log_format.as_deref().map(|s| s.to_ascii_lowercase()) {
            Some(ref v) if v == "json" || v == "structured" => true,
            _ => false,
        };
    let log_level =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    setup_tracing(TracingConfig::from_env(
        SERVICE_NAME,
        &log_level,
        json_format,
    ))
    .expect("failed to setup tracing");
    install_panic_logger();

    let handle = FunctionHandle::resolve(registry, &config.func_handler);
    let context = InvocationContext::from_config(&config, handle.name());
    let tracer = TracerAdapter::setup(
        SERVICE_NAME,
        config.trace_collector_endpoint.as_deref(),
    )
    .await;
    let state = Arc::new(RuntimeState {
        handle,
        context,
        stats: StatsRecorder::new(),
        tracer,
        executor: executor::Executor::new(config.fatal_timeout),
        publisher: EventPublisher::new(config.event_broker_addr.clone()),
    });
    let router =
        build_router(state, config.body_limit_bytes(), config.request_logging);

    let controller = Arc::new(ShutdownController::new());
    {
        let controller = controller.clone();
        tokio::spawn(async move {
            shutdown::wait_for_termination_signal().await;
            controller.terminate();
        });
    }

    let listener =
        TcpListener::bind(format!("0.0.0.0:{}", config.func_port)).await?;
    info!("start server on port {}", config.func_port);
    server::serve(listener, router, controller).await?;
    Ok(())
}

/// Last-resort handler for panics raised outside any request's call chain,
/// e.g. from tasks user code spawned and forgot. They cannot be attributed
/// to an in-flight request, so they are logged and the process keeps
/// serving.
fn install_panic_logger() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        tracing::error!(panic = %panic_info, "unhandled panic");
        previous(panic_info);
    }));
}
