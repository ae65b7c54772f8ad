use std::error::Error;

use envconfig::Envconfig;
use fnrt_runtime::{
    Config, Event, EventData, FnError, FnValue, FunctionRegistry,
    InvocationContext, UserFunction, start_server,
};
use tracing::info;

/// Sends the decoded payload straight back.
fn echo(event: Event, _ctx: InvocationContext) -> Result<FnValue, FnError> {
    info!(path = %event.path, "echo invoked");
    Ok(match event.data {
        EventData::Empty => FnValue::Empty,
        EventData::Json(value) => FnValue::Json(value),
        EventData::Text(text) => FnValue::Text(text),
        EventData::Binary(bytes) => FnValue::Binary(bytes),
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let config = Config::init_from_env()?;
    let registry =
        FunctionRegistry::new().register("echo", UserFunction::Sync(echo));
    start_server(config, registry).await?;
    Ok(())
}
