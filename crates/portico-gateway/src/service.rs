//! Gateway lifecycle: bind, serve, ordered shutdown.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::bridge;
use crate::domain::config::GatewayConfig;
use crate::domain::context::RequestContext;
use crate::domain::credential::CredentialSource;
use crate::domain::error::{GatewayError, ShutdownError};
use crate::domain::methods::APP_SHUTDOWN;
use crate::interceptors::{InterceptorChain, RpcMetrics};
use crate::listeners::{BoundListeners, GatewayAddrs};
use crate::proxy::{self, ProxyState, ReverseProxy, UploadBridge};
use crate::rpc::pb::AppShutdownRequest;
use crate::rpc::{ClientCommands, ClientCommandsServer};
use crate::server::{spawn_http_server, spawn_rpc_server, ServerHandle, UpgradeShutdown};

enum Lifecycle {
    Idle,
    Running(RunningServers),
    Stopped,
}

struct RunningServers {
    addrs: GatewayAddrs,
    rpc: ServerHandle,
    bridge: ServerHandle,
    proxy: ServerHandle,
}

/// The gateway: one RPC listener, one browser bridge, one reverse proxy.
///
/// `start` may be called once. `stop` may be called any number of times; only the
/// first call does anything.
pub struct Gateway {
    config: GatewayConfig,
    service: Arc<dyn ClientCommands>,
    credentials: Arc<dyn CredentialSource>,
    metrics: Arc<RpcMetrics>,
    state: Mutex<Lifecycle>,
}

impl Gateway {
    /// Create a gateway around the application's service.
    pub fn new(
        config: GatewayConfig,
        service: Arc<dyn ClientCommands>,
        credentials: Arc<dyn CredentialSource>,
    ) -> Result<Self, GatewayError> {
        // Validate configuration
        config.validate()?;

        Ok(Self {
            config,
            service,
            credentials,
            metrics: Arc::new(RpcMetrics::new()),
            state: Mutex::new(Lifecycle::Idle),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Call metrics, populated when the metrics stage is enabled.
    pub fn metrics(&self) -> Arc<RpcMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Prometheus text exposition of every gateway collector.
    ///
    /// RPC series are only recorded while the metrics stage is enabled; upload and
    /// WebSocket counters always are.
    pub fn prometheus_metrics(&self) -> Result<String, GatewayError> {
        Ok(portico_telemetry::encode_metrics()?)
    }

    /// Bound addresses while running.
    pub async fn addrs(&self) -> Option<GatewayAddrs> {
        match &*self.state.lock().await {
            Lifecycle::Running(servers) => Some(servers.addrs),
            _ => None,
        }
    }

    pub async fn is_running(&self) -> bool {
        matches!(&*self.state.lock().await, Lifecycle::Running(_))
    }

    /// Bind all three listeners and start serving.
    ///
    /// Either every listener is bound and serving when this returns `Ok`, or none
    /// is. Errors after that point are only logged.
    pub async fn start(&self) -> Result<GatewayAddrs, GatewayError> {
        let mut state = self.state.lock().await;
        match &*state {
            Lifecycle::Idle => {}
            Lifecycle::Running(_) => return Err(GatewayError::AlreadyRunning),
            Lifecycle::Stopped => return Err(GatewayError::Stopped),
        }

        info!("Starting gateway...");
        portico_telemetry::register_metrics()?;
        let origin = ReverseProxy::new(&self.config.origin.internal_api_addr)?;

        let listeners = BoundListeners::bind(&self.config.listen).await?;
        let addrs = listeners
            .local_addrs()
            .map_err(|e| GatewayError::Internal(format!("listener address: {e}")))?;

        // RPC service shared by the binary listener and the bridge
        let chain = InterceptorChain::from_config(
            &self.config.interceptors,
            Arc::clone(&self.service),
            Arc::clone(&self.metrics),
        );
        debug!(stages = ?chain.stage_names(), "Interceptor chain built");
        let rpc_service = ClientCommandsServer::new(Arc::clone(&self.service), chain)
            .max_decoding_message_size(self.config.limits.max_recv_message_size)
            .max_encoding_message_size(self.config.limits.max_send_message_size);

        let read_header = self.config.timeouts.read_header;
        let sessions = UpgradeShutdown::new();
        let bridge_router = bridge::router(
            rpc_service.clone(),
            &self.config.cors,
            read_header,
            &sessions,
        );

        let upload = Arc::new(UploadBridge::new(
            addrs.rpc,
            Arc::clone(&self.credentials),
            &self.config.upload,
            self.config.timeouts.upload_rpc,
        ));
        let proxy_router = proxy::router(
            ProxyState {
                proxy: origin,
                upload,
            },
            &self.config.upload.path,
            self.config.limits.max_upload_size,
        );

        info!(addr = %addrs.rpc, "Starting gRPC server");
        let rpc = spawn_rpc_server(listeners.rpc, rpc_service);
        info!(addr = %addrs.bridge, "Starting gRPC-web server");
        let bridge = spawn_http_server(
            "gRPC-web server",
            listeners.bridge,
            bridge_router,
            read_header,
            Some(sessions),
        );
        info!(addr = %addrs.proxy, origin = %self.config.origin.internal_api_addr, "Starting API proxy");
        let proxy = spawn_http_server(
            "API proxy",
            listeners.proxy,
            proxy_router,
            read_header,
            None,
        );

        println!("gRPC Web proxy started at: {}", addrs.bridge);
        info!("Gateway started successfully");

        *state = Lifecycle::Running(RunningServers {
            addrs,
            rpc,
            bridge,
            proxy,
        });
        Ok(addrs)
    }

    /// Stop everything, in order: RPC drain, bridge, proxy, then the application's
    /// own shutdown. Every phase runs even if an earlier one failed; the failures
    /// are logged and returned.
    pub async fn stop(&self) -> Vec<ShutdownError> {
        let mut state = self.state.lock().await;
        let previous = std::mem::replace(&mut *state, Lifecycle::Stopped);
        let mut errors = Vec::new();

        match previous {
            Lifecycle::Stopped => {
                debug!("Gateway already stopped");
                return errors;
            }
            Lifecycle::Idle => {
                debug!("Gateway was never started; running application shutdown only");
            }
            Lifecycle::Running(servers) => {
                info!("Stopping gateway...");
                let shutdown = &self.config.shutdown;
                let phases = [
                    (servers.rpc, shutdown.rpc_drain),
                    (servers.bridge, shutdown.http_grace),
                    (servers.proxy, shutdown.http_grace),
                ];
                for (handle, grace) in phases {
                    let name = handle.name();
                    match handle.stop(grace).await {
                        Ok(()) => debug!(server = name, "Stopped"),
                        Err(e) => {
                            error!(server = name, error = %e, "Server did not stop cleanly");
                            errors.push(e);
                        }
                    }
                }
            }
        }

        if let Err(e) = self.shutdown_application().await {
            error!(error = %e, "Application shutdown failed");
            errors.push(e);
        }

        info!("Gateway stopped");
        errors
    }

    /// Start, wait for `signal`, then stop.
    pub async fn run_until<F>(&self, signal: F) -> Result<(), GatewayError>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        signal.await;
        info!("Received shutdown signal");
        self.stop().await;
        Ok(())
    }

    /// Direct call to the application's `AppShutdown`, outside the interceptor chain.
    async fn shutdown_application(&self) -> Result<(), ShutdownError> {
        let limit = self.config.shutdown.app_shutdown;
        let call = self.service.app_shutdown(
            RequestContext::internal(&APP_SHUTDOWN),
            AppShutdownRequest::default(),
        );

        match tokio::time::timeout(limit, call).await {
            Ok(Ok(response)) => match response.error.filter(|e| e.is_failure()) {
                Some(err) => Err(ShutdownError::Application(err.description)),
                None => Ok(()),
            },
            Ok(Err(status)) => Err(ShutdownError::Application(status.message().to_string())),
            Err(_) => Err(ShutdownError::TimedOut {
                server: "application",
                after: limit,
            }),
        }
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("listen", &self.config.listen)
            .finish_non_exhaustive()
    }
}
