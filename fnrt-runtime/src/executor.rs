use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinError;

use crate::error::RuntimeError;
use crate::event::{Event, InvocationContext};
use crate::function::{Completer, FnError, FnValue, UserFunction};

const ABORT_GRACE: Duration = Duration::from_millis(100);

/// Runs the loaded function on its own task under the per-request deadline
/// and folds every completion shape into a single outcome.
#[derive(Clone, Debug)]
pub struct Executor {
    abort_grace: Duration,
    fatal_timeout: bool,
}

impl Executor {
    pub fn new(fatal_timeout: bool) -> Self {
        Self {
            abort_grace: ABORT_GRACE,
            fatal_timeout,
        }
    }

    #[cfg(test)]
    fn with_grace(fatal_timeout: bool, abort_grace: Duration) -> Self {
        Self {
            abort_grace,
            fatal_timeout,
        }
    }

    pub async fn invoke(
        &self,
        function: UserFunction,
        event: Event,
        ctx: InvocationContext,
    ) -> Result<FnValue, RuntimeError> {
        let deadline = ctx.timeout;
        let function_name = ctx.function_name.clone();
        // Stays false while a blocking-shape function is on its thread; a
        // deadline cannot interrupt that thread, only observe it.
        let blocking_done = Arc::new(AtomicBool::new(!function.is_blocking()));

        let (completer, rx) = Completer::channel();
        let handle = tokio::spawn(run_function(
            function,
            event,
            ctx,
            completer,
            blocking_done.clone(),
        ));

        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(outcome)) => outcome.map_err(RuntimeError::Function),
            Ok(Err(_closed)) => {
                // Every completer clone is gone without a signal: either the
                // function task panicked, or it finished without responding.
                match handle.await {
                    Err(join) if join.is_panic() => Err(RuntimeError::Function(
                        FnError::Panic(panic_message(join)),
                    )),
                    _ => Err(RuntimeError::Function(FnError::NoResponse)),
                }
            }
            Err(_elapsed) => {
                handle.abort();
                let _ = handle.await;
                if !blocking_done.load(Ordering::SeqCst) {
                    tokio::time::sleep(self.abort_grace).await;
                    if !blocking_done.load(Ordering::SeqCst) {
                        if self.fatal_timeout {
                            tracing::error!(
                                function = %function_name,
                                "timed out function cannot be interrupted; terminating for supervisor restart"
                            );
                            std::process::exit(1);
                        }
                        tracing::warn!(
                            function = %function_name,
                            "timed out function still occupies a blocking thread"
                        );
                    }
                }
                Err(RuntimeError::Timeout(deadline))
            }
        }
    }
}

async fn run_function(
    function: UserFunction,
    event: Event,
    ctx: InvocationContext,
    completer: Completer,
    blocking_done: Arc<AtomicBool>,
) {
    match function {
        UserFunction::Sync(f) => {
            let done = DoneFlag(blocking_done);
            let result =
                tokio::task::spawn_blocking(move || {
                    let _done = done;
                    f(event, ctx)
                })
                .await;
            match result {
                Ok(outcome) => complete_with(&completer, outcome),
                Err(join) => {
                    completer.fail(FnError::Panic(panic_message(join)));
                }
            }
        }
        UserFunction::Future(f) => {
            let outcome = f(event, ctx).await;
            complete_with(&completer, outcome);
        }
        UserFunction::Callback(f) => {
            // The function responds through the completer, possibly from a
            // task it spawned itself; nothing more to do here.
            f(event, ctx, completer.clone());
        }
    }
}

fn complete_with(completer: &Completer, outcome: Result<FnValue, FnError>) {
    let accepted = match outcome {
        Ok(value) => completer.succeed(value),
        Err(error) => completer.fail(error),
    };
    if !accepted {
        tracing::debug!("completion ignored, response already produced");
    }
}

/// Flips the flag on every exit path of the blocking closure, panics
/// included.
struct DoneFlag(Arc<AtomicBool>);

impl Drop for DoneFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

fn panic_message(join: JoinError) -> String {
    if !join.is_panic() {
        return "task cancelled".to_string();
    }
    let payload = join.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
