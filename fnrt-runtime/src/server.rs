use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Router;
use dashmap::DashMap;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as HttpConnectionBuilder;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::util::ServiceExt;
use tracing::{debug, info};

use crate::shutdown::ShutdownController;

/// Side table of live connections: id to the number of requests currently
/// being served on it. A connection is idle iff that number is zero.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<u64, u32>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.connections.insert(id, 0);
        id
    }

    pub fn deregister(&self, id: u64) {
        self.connections.remove(&id);
    }

    pub fn mark_busy(&self, id: u64) {
        if let Some(mut active) = self.connections.get_mut(&id) {
            *active += 1;
        }
    }

    pub fn mark_idle(&self, id: u64) {
        if let Some(mut active) = self.connections.get_mut(&id) {
            *active = active.saturating_sub(1);
        }
    }

    pub fn is_idle(&self, id: u64) -> bool {
        self.connections.get(&id).is_none_or(|active| *active == 0)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn idle_count(&self) -> usize {
        self.connections.iter().filter(|entry| *entry.value() == 0).count()
    }
}

/// Accept loop with per-connection drain control. On termination the
/// listener closes, idle connections are shut down immediately, and busy
/// ones close the instant their in-flight response finishes.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: Arc<ShutdownController>,
) -> std::io::Result<()> {
    let registry = Arc::new(ConnectionRegistry::new());
    let token = shutdown.token();
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, remote_addr) = accepted?;
                let router = router.clone();
                let registry = registry.clone();
                let token = token.clone();
                tasks.spawn(async move {
                    serve_connection(stream, remote_addr, router, registry, token)
                        .await;
                });
            }
            _ = token.cancelled() => break,
        }
    }

    drop(listener);
    info!(connections = registry.len(), "draining connections");
    while tasks.join_next().await.is_some() {}
    shutdown.mark_stopped();
    Ok(())
}

async fn serve_connection(
    stream: tokio::net::TcpStream,
    remote_addr: SocketAddr,
    router: Router,
    registry: Arc<ConnectionRegistry>,
    token: CancellationToken,
) {
    let id = registry.register();
    debug!(conn = id, %remote_addr, "connection opened");

    let service_registry = registry.clone();
    let service = service_fn(move |req: hyper::Request<Incoming>| {
        let router = router.clone();
        let registry = service_registry.clone();
        async move {
            registry.mark_busy(id);
            let resp =
                router.oneshot(req.map(axum::body::Body::new)).await;
            registry.mark_idle(id);
            resp
        }
    });

    let builder = HttpConnectionBuilder::new(TokioExecutor::new());
    let conn = builder.serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    let mut draining = false;
    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    debug!(conn = id, error = %e, "connection error");
                }
                break;
            }
            _ = token.cancelled(), if !draining => {
                // closes now when idle, after the in-flight response
                // otherwise
                debug!(
                    conn = id,
                    idle = registry.is_idle(id),
                    "shutting down connection"
                );
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }

    registry.deregister(id);
    debug!(conn = id, "connection closed");
}
