//! Per-call context handed through the interceptor chain to the service.

use serde::Serialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use tonic::metadata::MetadataMap;
use uuid::Uuid;

use super::credential::{SessionToken, TOKEN_METADATA_KEY};
use super::methods::MethodInfo;

/// Deadline header set by gRPC clients.
pub const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// Operating-system process on the other end of a loopback connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerProcess {
    pub pid: u32,
    pub name: String,
    pub exe: Option<PathBuf>,
}

/// Context for one RPC call.
///
/// Built from the inbound request before the chain runs. Stages may enrich it
/// (tags, peer process) before it reaches the handler.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Time-ordered id for log correlation
    pub request_id: Uuid,
    /// Method being called
    pub method: &'static MethodInfo,
    /// Request metadata as received
    pub metadata: MetadataMap,
    /// Session token from `token` metadata, if present and non-empty
    pub token: Option<SessionToken>,
    /// Client deadline from `grpc-timeout`
    pub deadline: Option<Instant>,
    /// Caller address
    pub remote_addr: Option<SocketAddr>,
    /// Address the call arrived on
    pub local_addr: Option<SocketAddr>,
    /// Caller process, filled by the process-info stage
    pub peer_process: Option<PeerProcess>,
    tags: BTreeMap<&'static str, String>,
}

impl RequestContext {
    /// Context for an inbound request.
    pub fn from_request<T>(method: &'static MethodInfo, request: &tonic::Request<T>) -> Self {
        let metadata = request.metadata().clone();
        let token = metadata
            .get(TOKEN_METADATA_KEY)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(SessionToken::new);
        let deadline = metadata
            .get(GRPC_TIMEOUT_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_grpc_timeout)
            .map(|timeout| Instant::now() + timeout);

        Self {
            request_id: Uuid::now_v7(),
            method,
            metadata,
            token,
            deadline,
            remote_addr: request.remote_addr(),
            local_addr: request.local_addr(),
            peer_process: None,
            tags: BTreeMap::new(),
        }
    }

    /// Context for a call the gateway makes itself (lifecycle shutdown).
    pub fn internal(method: &'static MethodInfo) -> Self {
        Self {
            request_id: Uuid::now_v7(),
            method,
            metadata: MetadataMap::new(),
            token: None,
            deadline: None,
            remote_addr: None,
            local_addr: None,
            peer_process: None,
            tags: BTreeMap::new(),
        }
    }

    /// Time left before the client deadline. `None` when the client set none.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn set_tag(&mut self, key: &'static str, value: impl Into<String>) {
        self.tags.insert(key, value.into());
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn tags(&self) -> &BTreeMap<&'static str, String> {
        &self.tags
    }
}

/// Parse a `grpc-timeout` value: up to 8 digits followed by one unit
/// (`H`, `M`, `S`, `m`, `u`, `n`).
pub fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.len() < 2 {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    if digits.len() > 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;
    let timeout = match unit {
        "H" => Duration::from_secs(amount * 60 * 60),
        "M" => Duration::from_secs(amount * 60),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };
    Some(timeout)
}
