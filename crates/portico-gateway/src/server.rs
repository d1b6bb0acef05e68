//! Server loops for the three listeners.
//!
//! Each server runs on its own task and is controlled through a [`ServerHandle`]:
//! `stop` signals shutdown, waits up to a grace period for in-flight work, then
//! aborts whatever is left. Errors after a successful bind are logged, never
//! returned to the caller of `start`.

use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use hyper_util::server::graceful::GracefulShutdown;
use hyper_util::service::TowerToHyperService;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tracing::{debug, error, info};

use crate::domain::error::ShutdownError;
use crate::rpc::ClientCommandsServer;

/// Pause after a failed `accept` so a persistent error (fd exhaustion) does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Running server task plus its shutdown trigger.
#[derive(Debug)]
pub struct ServerHandle {
    name: &'static str,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signal shutdown and wait up to `grace` for the server to finish.
    ///
    /// On timeout the task is aborted, which drops every remaining connection.
    pub async fn stop(mut self, grace: Duration) -> Result<(), ShutdownError> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        match tokio::time::timeout(grace, &mut self.task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ShutdownError::TaskFailed {
                server: self.name,
                reason: e.to_string(),
            }),
            Err(_) => {
                self.task.abort();
                Err(ShutdownError::TimedOut {
                    server: self.name,
                    after: grace,
                })
            }
        }
    }
}

/// Shutdown signal for connections that have left the HTTP server through an
/// upgrade. Graceful drain only tracks HTTP connections, so upgraded sessions
/// subscribe here and close themselves once the server stops.
#[derive(Debug, Clone)]
pub struct UpgradeShutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl UpgradeShutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> UpgradeSignal {
        UpgradeSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Tell every subscribed session to close.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl Default for UpgradeShutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of [`UpgradeShutdown`], one per session.
#[derive(Debug)]
pub struct UpgradeSignal {
    rx: watch::Receiver<bool>,
}

impl UpgradeSignal {
    /// Resolves once shutdown was triggered or the trigger is gone.
    pub async fn closed(&mut self) {
        let _ = self.rx.wait_for(|closing| *closing).await;
    }
}

/// Serve gRPC on `listener` until stopped.
pub fn spawn_rpc_server(listener: TcpListener, service: ClientCommandsServer) -> ServerHandle {
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let name = "gRPC server";

    let task = tokio::spawn(async move {
        let incoming = TcpListenerStream::new(listener);
        let result = Server::builder()
            .add_service(service)
            .serve_with_incoming_shutdown(incoming, async {
                let _ = shutdown_rx.await;
            })
            .await;
        match result {
            Ok(()) => debug!(server = name, "Server stopped"),
            Err(e) => error!(server = name, error = %e, "Server error"),
        }
    });

    ServerHandle {
        name,
        shutdown_tx: Some(shutdown_tx),
        task,
    }
}

/// Serve an axum router on `listener` until stopped.
///
/// HTTP/1 and HTTP/2 are both accepted; HTTP/1 connections must send their headers
/// within `read_header_timeout`. Upgrades (WebSocket) are supported; `upgrades`
/// is triggered when the server stops so upgraded sessions close with it.
pub fn spawn_http_server(
    name: &'static str,
    listener: TcpListener,
    router: Router,
    read_header_timeout: Duration,
    upgrades: Option<UpgradeShutdown>,
) -> ServerHandle {
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(serve_http(
        name,
        listener,
        router,
        read_header_timeout,
        upgrades,
        shutdown_rx,
    ));

    ServerHandle {
        name,
        shutdown_tx: Some(shutdown_tx),
        task,
    }
}

async fn serve_http(
    name: &'static str,
    listener: TcpListener,
    router: Router,
    read_header_timeout: Duration,
    upgrades: Option<UpgradeShutdown>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut builder = auto::Builder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(read_header_timeout);
    let graceful = GracefulShutdown::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(server = name, error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                };

                let service = TowerToHyperService::new(router.clone());
                let conn = builder
                    .serve_connection_with_upgrades(TokioIo::new(stream), service)
                    .into_owned();
                let conn = graceful.watch(conn);
                tokio::spawn(async move {
                    if let Err(e) = conn.await {
                        debug!(server = name, peer = %peer, error = %e, "Connection closed with error");
                    }
                });
            }
            _ = &mut shutdown_rx => {
                info!(server = name, "Shutting down");
                break;
            }
        }
    }

    // Stop accepting before draining
    drop(listener);
    if let Some(upgrades) = upgrades {
        upgrades.trigger();
    }
    graceful.shutdown().await;
    debug!(server = name, "Server stopped");
}
