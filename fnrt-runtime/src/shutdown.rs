use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Process lifecycle for the drain sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Running,
    Terminating,
    Stopped,
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecyclePhase::Running => write!(f, "running"),
            LifecyclePhase::Terminating => write!(f, "terminating"),
            LifecyclePhase::Stopped => write!(f, "stopped"),
        }
    }
}

/// Coordinates exactly one shutdown sequence. Repeated termination requests
/// after the first are no-ops.
pub struct ShutdownController {
    phase_tx: watch::Sender<LifecyclePhase>,
    token: CancellationToken,
    initiated: AtomicBool,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (phase_tx, _) = watch::channel(LifecyclePhase::Running);
        Self {
            phase_tx,
            token: CancellationToken::new(),
            initiated: AtomicBool::new(false),
        }
    }

    pub fn phase(&self) -> LifecyclePhase {
        *self.phase_tx.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<LifecyclePhase> {
        self.phase_tx.subscribe()
    }

    /// Token cancelled the moment termination begins; connection tasks
    /// select on it.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_terminating(&self) -> bool {
        self.initiated.load(Ordering::SeqCst)
    }

    pub fn terminate(&self) {
        if self.initiated.swap(true, Ordering::SeqCst) {
            debug!("shutdown already in progress");
            return;
        }
        info!("initiating graceful shutdown");
        let _ = self.phase_tx.send(LifecyclePhase::Terminating);
        self.token.cancel();
    }

    pub(crate) fn mark_stopped(&self) {
        let _ = self.phase_tx.send(LifecyclePhase::Stopped);
        info!("shutdown complete");
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for SIGTERM/SIGINT on Unix, Ctrl+C elsewhere.
pub async fn wait_for_termination_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::terminate(),
        )
        .expect("failed to install signal handler")
        .recv()
        .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
