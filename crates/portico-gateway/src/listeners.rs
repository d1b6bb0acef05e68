//! All-or-nothing binding of the three gateway listeners.

use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{debug, warn};

use crate::domain::config::ListenConfig;
use crate::domain::error::{BindError, ListenerRole};

/// Bound sockets for the RPC, bridge and proxy listeners.
#[derive(Debug)]
pub struct BoundListeners {
    pub rpc: TcpListener,
    pub bridge: TcpListener,
    pub proxy: TcpListener,
}

/// Addresses the gateway actually listens on (ephemeral ports resolved).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayAddrs {
    pub rpc: SocketAddr,
    pub bridge: SocketAddr,
    pub proxy: SocketAddr,
}

impl BoundListeners {
    /// Bind all three addresses in order.
    ///
    /// On the first failure every listener bound so far is closed before the error
    /// is returned, so a failed start leaves no port open.
    pub async fn bind(config: &ListenConfig) -> Result<Self, BindError> {
        let rpc = bind_one(ListenerRole::Rpc, config.rpc).await?;
        let bridge = match bind_one(ListenerRole::Bridge, config.bridge).await {
            Ok(listener) => listener,
            Err(e) => {
                release(rpc, ListenerRole::Rpc);
                return Err(e);
            }
        };
        let proxy = match bind_one(ListenerRole::Proxy, config.proxy).await {
            Ok(listener) => listener,
            Err(e) => {
                release(rpc, ListenerRole::Rpc);
                release(bridge, ListenerRole::Bridge);
                return Err(e);
            }
        };

        Ok(Self { rpc, bridge, proxy })
    }

    /// Local addresses of the bound sockets.
    pub fn local_addrs(&self) -> std::io::Result<GatewayAddrs> {
        Ok(GatewayAddrs {
            rpc: self.rpc.local_addr()?,
            bridge: self.bridge.local_addr()?,
            proxy: self.proxy.local_addr()?,
        })
    }
}

async fn bind_one(role: ListenerRole, addr: SocketAddr) -> Result<TcpListener, BindError> {
    match TcpListener::bind(addr).await {
        Ok(listener) => {
            debug!(listener = %role, addr = %addr, "Listener bound");
            Ok(listener)
        }
        Err(e) => {
            let err = BindError::new(role, addr, e);
            warn!(listener = %role, addr = %addr, error = %err, "Bind failed");
            Err(err)
        }
    }
}

fn release(listener: TcpListener, role: ListenerRole) {
    if let Ok(addr) = listener.local_addr() {
        debug!(listener = %role, addr = %addr, "Releasing listener after failed start");
    }
    drop(listener);
}
