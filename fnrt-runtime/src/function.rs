use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::event::{Event, InvocationContext};

/// Value a function completes with. The dispatcher turns it into a response
/// body: text verbatim, JSON objects and arrays serialized, empty values as
/// an empty body, other JSON scalars stringified.
#[derive(Clone, Debug)]
pub enum FnValue {
    Empty,
    Text(String),
    Json(Value),
    Binary(Bytes),
}

impl FnValue {
    /// Body bytes plus the default content type (overridable through the
    /// event's response helpers).
    pub fn into_body(self) -> (Bytes, Option<&'static str>) {
        match self {
            FnValue::Empty => (Bytes::new(), None),
            FnValue::Text(text) => (Bytes::from(text), Some("text/plain")),
            FnValue::Binary(bytes) => {
                (bytes, Some("application/octet-stream"))
            }
            FnValue::Json(Value::Null) => (Bytes::new(), None),
            FnValue::Json(Value::String(text)) => {
                (Bytes::from(text), Some("text/plain"))
            }
            FnValue::Json(value @ (Value::Object(_) | Value::Array(_))) => {
                (Bytes::from(value.to_string()), Some("application/json"))
            }
            FnValue::Json(scalar) => {
                (Bytes::from(scalar.to_string()), Some("text/plain"))
            }
        }
    }
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum FnError {
    #[error("{0}")]
    Message(String),
    #[error("function panicked: {0}")]
    Panic(String),
    #[error("function returned no response")]
    NoResponse,
}

impl FnError {
    pub fn msg(message: impl Into<String>) -> Self {
        FnError::Message(message.into())
    }
}

pub type SyncFn = fn(Event, InvocationContext) -> Result<FnValue, FnError>;
pub type CallbackFn = fn(Event, InvocationContext, Completer);
type FutureFn = Arc<
    dyn Fn(
            Event,
            InvocationContext,
        ) -> BoxFuture<'static, Result<FnValue, FnError>>
        + Send
        + Sync,
>;

/// The supported function shapes: a direct return, a completer-style
/// callback, or an awaitable. Every shape funnels into the same
/// complete-once gate in the executor.
#[derive(Clone)]
pub enum UserFunction {
    Sync(SyncFn),
    Callback(CallbackFn),
    Future(FutureFn),
}

impl UserFunction {
    pub fn from_async<F, Fut>(function: F) -> Self
    where
        F: Fn(Event, InvocationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<FnValue, FnError>> + Send + 'static,
    {
        UserFunction::Future(Arc::new(move |event, ctx| {
            Box::pin(function(event, ctx))
        }))
    }

    /// Whether the shape runs on a blocking thread that a deadline cannot
    /// interrupt.
    pub(crate) fn is_blocking(&self) -> bool {
        matches!(self, UserFunction::Sync(_))
    }
}

/// Completion side of the complete-once gate. Clones may travel into tasks
/// the user function spawns; the first signal wins and every later one is
/// dropped, so a response is never written twice.
#[derive(Clone)]
pub struct Completer {
    gate: Arc<CompletionGate>,
}

struct CompletionGate {
    done: AtomicBool,
    tx: Mutex<Option<oneshot::Sender<Result<FnValue, FnError>>>>,
}

impl Completer {
    pub(crate) fn channel()
    -> (Self, oneshot::Receiver<Result<FnValue, FnError>>) {
        let (tx, rx) = oneshot::channel();
        let completer = Self {
            gate: Arc::new(CompletionGate {
                done: AtomicBool::new(false),
                tx: Mutex::new(Some(tx)),
            }),
        };
        (completer, rx)
    }

    /// Returns whether this signal was the one accepted.
    pub fn succeed(&self, value: FnValue) -> bool {
        self.complete(Ok(value))
    }

    pub fn fail(&self, error: FnError) -> bool {
        self.complete(Err(error))
    }

    fn complete(&self, outcome: Result<FnValue, FnError>) -> bool {
        if self.gate.done.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Ok(mut slot) = self.gate.tx.lock() {
            if let Some(tx) = slot.take() {
                return tx.send(outcome).is_ok();
            }
        }
        false
    }
}

/// Functions the embedding binary linked in, keyed by entry name.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, UserFunction>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        mut self,
        name: impl Into<String>,
        function: UserFunction,
    ) -> Self {
        self.functions.insert(name.into(), function);
        self
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum LoadError {
    #[error("function registry is empty")]
    EmptyRegistry,
    #[error(
        "no function named {entry} available, available functions are: {available}"
    )]
    MissingEntry { entry: String, available: String },
    #[error(
        "FUNC_HANDLER not set and more than one function is registered: {available}"
    )]
    NoEntrySelected { available: String },
}

/// The resolved user function, or the reason resolution failed. Resolution
/// happens exactly once at startup; a poisoned handle keeps health traffic
/// alive while every functional request fails fast.
#[derive(Clone)]
pub struct FunctionHandle {
    inner: Arc<HandleInner>,
}

enum HandleInner {
    Loaded {
        name: String,
        function: UserFunction,
    },
    Failed {
        name: String,
        error: LoadError,
    },
}

impl FunctionHandle {
    pub fn resolve(registry: FunctionRegistry, entry: &str) -> Self {
        let available = || {
            let mut names: Vec<&str> =
                registry.functions.keys().map(String::as_str).collect();
            names.sort_unstable();
            names.join(", ")
        };

        let resolved = if registry.functions.is_empty() {
            Err(LoadError::EmptyRegistry)
        } else if entry.is_empty() {
            if registry.functions.len() == 1 {
                Ok(registry
                    .functions
                    .iter()
                    .next()
                    .map(|(name, f)| (name.clone(), f.clone()))
                    .unwrap())
            } else {
                Err(LoadError::NoEntrySelected {
                    available: available(),
                })
            }
        } else {
            match registry.functions.get(entry) {
                Some(function) => Ok((entry.to_string(), function.clone())),
                None => Err(LoadError::MissingEntry {
                    entry: entry.to_string(),
                    available: available(),
                }),
            }
        };

        match resolved {
            Ok((name, function)) => {
                tracing::info!(function = %name, "function loaded");
                Self {
                    inner: Arc::new(HandleInner::Loaded { name, function }),
                }
            }
            Err(error) => {
                tracing::error!(error = %error, "function failed to load");
                Self {
                    inner: Arc::new(HandleInner::Failed {
                        name: if entry.is_empty() {
                            "unresolved".to_string()
                        } else {
                            entry.to_string()
                        },
                        error,
                    }),
                }
            }
        }
    }

    pub fn name(&self) -> &str {
        match self.inner.as_ref() {
            HandleInner::Loaded { name, .. } => name,
            HandleInner::Failed { name, .. } => name,
        }
    }

    pub fn function(&self) -> Result<&UserFunction, &LoadError> {
        match self.inner.as_ref() {
            HandleInner::Loaded { function, .. } => Ok(function),
            HandleInner::Failed { error, .. } => Err(error),
        }
    }

    pub fn load_error(&self) -> Option<&LoadError> {
        match self.inner.as_ref() {
            HandleInner::Loaded { .. } => None,
            HandleInner::Failed { error, .. } => Some(error),
        }
    }
}
