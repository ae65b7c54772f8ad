use std::error::Error;

use envconfig::Envconfig;
use fnrt_runtime::{
    Config, Event, EventData, FnError, FnValue, FunctionRegistry,
    InvocationContext, UserFunction, start_server,
};

/// Always fails; a text payload of "panic" makes it panic instead of
/// returning an error. Exercises the failure counters and the panic
/// capture path.
fn boom(event: Event, _ctx: InvocationContext) -> Result<FnValue, FnError> {
    if let EventData::Text(text) = &event.data {
        if text.trim() == "panic" {
            panic!("boom");
        }
    }
    Err(FnError::msg("boom"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let config = Config::init_from_env()?;
    let registry =
        FunctionRegistry::new().register("boom", UserFunction::Sync(boom));
    start_server(config, registry).await?;
    Ok(())
}
