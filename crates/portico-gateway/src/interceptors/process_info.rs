//! Caller process enrichment.
//!
//! For the configured methods, finds the local process that owns the client end of
//! the connection and attaches it to the call context. Lookup failures never fail
//! the call; the handler just sees no peer process.

use async_trait::async_trait;
use netstat2::{get_sockets_info, AddressFamilyFlags, ProtocolFlags, ProtocolSocketInfo};
use std::collections::HashSet;
use std::net::SocketAddr;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tonic::Status;
use tracing::debug;

use super::{Interceptor, Next};
use crate::domain::context::{PeerProcess, RequestContext};

/// Process info stage
pub struct ProcessInfoInterceptor {
    methods: HashSet<String>,
}

impl ProcessInfoInterceptor {
    pub fn new(methods: impl IntoIterator<Item = String>) -> Self {
        Self {
            methods: methods.into_iter().collect(),
        }
    }

    fn applies_to(&self, method: &str) -> bool {
        self.methods.contains(method)
    }
}

#[async_trait]
impl Interceptor for ProcessInfoInterceptor {
    fn name(&self) -> &'static str {
        "process_info"
    }

    async fn intercept(&self, mut ctx: RequestContext, next: Next) -> Result<(), Status> {
        if !self.applies_to(ctx.method.name) {
            return next.run(ctx).await;
        }

        if let (Some(remote), Some(local)) = (ctx.remote_addr, ctx.local_addr) {
            if remote.ip().is_loopback() {
                let lookup =
                    tokio::task::spawn_blocking(move || find_peer_process(remote, local)).await;
                match lookup {
                    Ok(Ok(Some(process))) => {
                        debug!(
                            method = ctx.method.name,
                            pid = process.pid,
                            name = %process.name,
                            "Resolved caller process"
                        );
                        ctx.set_tag("peer.pid", process.pid.to_string());
                        ctx.set_tag("peer.name", process.name.clone());
                        ctx.peer_process = Some(process);
                    }
                    Ok(Ok(None)) => {
                        debug!(method = ctx.method.name, remote = %remote, "No process owns the caller socket");
                    }
                    Ok(Err(e)) => {
                        debug!(method = ctx.method.name, error = %e, "Caller process lookup failed");
                    }
                    Err(e) => {
                        debug!(method = ctx.method.name, error = %e, "Caller process lookup panicked");
                    }
                }
            }
        }

        next.run(ctx).await
    }
}

/// Find the process whose TCP socket is `remote -> local`, i.e. the client end of
/// a connection the server sees from `remote` on `local`.
pub fn find_peer_process(
    remote: SocketAddr,
    local: SocketAddr,
) -> Result<Option<PeerProcess>, String> {
    let sockets = get_sockets_info(
        AddressFamilyFlags::IPV4 | AddressFamilyFlags::IPV6,
        ProtocolFlags::TCP,
    )
    .map_err(|e| format!("Failed to query network sockets: {e}"))?;

    let pid = sockets.into_iter().find_map(|socket| match socket.protocol_socket_info {
        ProtocolSocketInfo::Tcp(tcp)
            if tcp.local_port == remote.port()
                && tcp.remote_port == local.port()
                && same_host(tcp.local_addr, remote) =>
        {
            socket.associated_pids.first().copied()
        }
        _ => None,
    });

    Ok(pid.and_then(describe_process))
}

fn same_host(addr: std::net::IpAddr, peer: SocketAddr) -> bool {
    addr == peer.ip() || (addr.is_unspecified() && peer.ip().is_loopback())
}

fn describe_process(pid: u32) -> Option<PeerProcess> {
    let mut sys = System::new_all();
    sys.refresh_processes(ProcessesToUpdate::All, true);

    sys.process(Pid::from_u32(pid)).map(|p| PeerProcess {
        pid,
        name: p.name().to_string_lossy().to_string(),
        exe: p.exe().map(|path| path.to_path_buf()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::methods::{ACCOUNT_LOCAL_LINK_NEW_CHALLENGE, APP_GET_VERSION};
    use crate::interceptors::InterceptorChain;
    use std::sync::Arc;

    fn stage() -> ProcessInfoInterceptor {
        ProcessInfoInterceptor::new([ACCOUNT_LOCAL_LINK_NEW_CHALLENGE.name.to_string()])
    }

    #[test]
    fn test_applies_only_to_configured_methods() {
        let stage = stage();
        assert!(stage.applies_to("AccountLocalLinkNewChallenge"));
        assert!(!stage.applies_to("AppGetVersion"));
    }

    #[tokio::test]
    async fn test_missing_peer_does_not_fail_call() {
        let chain = InterceptorChain::new(vec![Arc::new(stage())]);
        let peer = chain
            .invoke(
                RequestContext::internal(&ACCOUNT_LOCAL_LINK_NEW_CHALLENGE),
                |ctx| async move { Ok::<_, Status>(ctx.peer_process) },
            )
            .await
            .unwrap();
        assert!(peer.is_none());
    }

    #[tokio::test]
    async fn test_other_methods_untouched() {
        let chain = InterceptorChain::new(vec![Arc::new(stage())]);
        let tags = chain
            .invoke(RequestContext::internal(&APP_GET_VERSION), |ctx| async move {
                Ok::<_, Status>(ctx.tags().len())
            })
            .await
            .unwrap();
        assert_eq!(tags, 0);
    }
}
