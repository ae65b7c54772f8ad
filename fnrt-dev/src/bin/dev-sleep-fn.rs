use std::error::Error;
use std::time::Duration;

use envconfig::Envconfig;
use fnrt_runtime::{
    Config, Event, EventData, FnError, FnValue, FunctionRegistry,
    InvocationContext, UserFunction, start_server,
};
use tracing::info;

/// Sleeps for the number of milliseconds in the payload (default 1000),
/// then reports how long it slept. Useful for exercising the request
/// deadline.
async fn sleep(
    event: Event,
    ctx: InvocationContext,
) -> Result<FnValue, FnError> {
    let millis = match &event.data {
        EventData::Json(value) => value.as_u64().unwrap_or(1000),
        EventData::Text(text) => text.trim().parse().unwrap_or(1000),
        _ => 1000,
    };
    info!(millis, timeout = ?ctx.timeout, "sleep invoked");
    tokio::time::sleep(Duration::from_millis(millis)).await;
    Ok(FnValue::Json(serde_json::json!({ "slept_ms": millis })))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let config = Config::init_from_env()?;
    let registry = FunctionRegistry::new()
        .register("sleep", UserFunction::from_async(sleep));
    start_server(config, registry).await?;
    Ok(())
}
