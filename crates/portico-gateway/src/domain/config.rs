//! Gateway configuration with validation.
//!
//! Every section has serde defaults so a partial document (or none at all) yields a
//! working gateway on loopback. `from_env` layers the `PORTICO_*` overrides on top.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use super::methods::{method_by_name, process_info_method_names};

/// 20 MiB, the inbound RPC message cap.
pub const DEFAULT_MAX_RECV_MESSAGE_SIZE: usize = 20 * 1024 * 1024;

/// 100 MiB, the multipart upload cap.
pub const DEFAULT_MAX_UPLOAD_SIZE: usize = 100 * 1024 * 1024;

/// Main gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener addresses
    pub listen: ListenConfig,
    /// Internal REST origin behind the reverse proxy
    pub origin: OriginConfig,
    /// Message and body size limits
    pub limits: LimitsConfig,
    /// Request timeouts
    pub timeouts: TimeoutConfig,
    /// Shutdown phase bounds
    pub shutdown: ShutdownConfig,
    /// Interceptor chain switches
    pub interceptors: InterceptorConfig,
    /// File upload bridge
    pub upload: UploadConfig,
    /// Browser bridge CORS
    pub cors: CorsConfig,
}

impl GatewayConfig {
    /// Defaults with the `PORTICO_*` environment overrides applied.
    ///
    /// Unparseable address values are kept as defaults and reported by `validate`
    /// only when they produce an inconsistent configuration, so a typo in one
    /// variable never prevents the others from applying.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Apply environment overrides to an existing configuration.
    pub fn apply_env(&mut self) {
        if let Some(addr) = env_addr("PORTICO_GRPC_ADDR") {
            self.listen.rpc = addr;
        }
        if let Some(addr) = env_addr("PORTICO_GRPC_WEB_ADDR") {
            self.listen.bridge = addr;
        }
        if let Some(addr) = env_addr("PORTICO_API_PROXY_ADDR") {
            self.listen.proxy = addr;
        }
        if let Ok(addr) = env::var("PORTICO_INTERNAL_API_ADDR") {
            if !addr.trim().is_empty() {
                self.origin.internal_api_addr = addr.trim().to_string();
            }
        }
        if let Ok(flag) = env::var("PORTICO_GRPC_METRICS") {
            self.interceptors.metrics_enabled = flag == "1";
        }
        if env::var("PORTICO_GRPC_NO_DEBUG_TIMEOUT").as_deref() == Ok("1") {
            self.interceptors.timeout_guard.enabled = false;
        }
        if let Ok(dir) = env::var("PORTICO_UPLOAD_DIR") {
            if !dir.trim().is_empty() {
                self.upload.staging_dir = PathBuf::from(dir);
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Listen addresses must differ; port 0 asks the OS for a fresh port each time
        let fixed: Vec<SocketAddr> = self
            .listen
            .all()
            .into_iter()
            .filter(|addr| addr.port() != 0)
            .collect();
        let unique: HashSet<_> = fixed.iter().collect();
        if unique.len() != fixed.len() {
            return Err(ConfigError::DuplicateAddresses);
        }

        if http::uri::Authority::from_str(&self.origin.internal_api_addr).is_err()
            || self.origin.internal_api_addr.is_empty()
        {
            return Err(ConfigError::InvalidAddress(
                self.origin.internal_api_addr.clone(),
            ));
        }

        if self.limits.max_recv_message_size == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_recv_message_size cannot be 0".into(),
            ));
        }
        if self.limits.max_upload_size == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_upload_size cannot be 0".into(),
            ));
        }

        let timeouts = [
            ("read_header", self.timeouts.read_header),
            ("upload_rpc", self.timeouts.upload_rpc),
            ("rpc_drain", self.shutdown.rpc_drain),
            ("http_grace", self.shutdown.http_grace),
            ("app_shutdown", self.shutdown.app_shutdown),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, d)| d.is_zero()) {
            return Err(ConfigError::InvalidTimeout(format!("{name} cannot be 0")));
        }
        if self.interceptors.timeout_guard.enabled && self.interceptors.timeout_guard.limit.is_zero()
        {
            return Err(ConfigError::InvalidTimeout(
                "timeout_guard.limit cannot be 0".into(),
            ));
        }

        if let Some(unknown) = self
            .interceptors
            .process_info_methods
            .iter()
            .find(|name| method_by_name(name).is_none())
        {
            return Err(ConfigError::Invalid(format!(
                "process_info_methods: unknown method {unknown}"
            )));
        }

        if !self.upload.path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "upload path must start with '/': {}",
                self.upload.path
            )));
        }

        Ok(())
    }
}

fn env_addr(key: &str) -> Option<SocketAddr> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(addr) => Some(addr),
        Err(_) => {
            tracing::warn!(variable = key, value = %raw, "Ignoring unparseable listen address");
            None
        }
    }
}

const fn loopback(port: u16) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port))
}

/// The three listener addresses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    /// Binary RPC (gRPC) listener
    pub rpc: SocketAddr,
    /// Browser bridge (gRPC-web + WebSocket) listener
    pub bridge: SocketAddr,
    /// Reverse proxy listener
    pub proxy: SocketAddr,
}

impl ListenConfig {
    /// Addresses in bind order.
    pub fn all(&self) -> [SocketAddr; 3] {
        [self.rpc, self.bridge, self.proxy]
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            rpc: loopback(31007),
            bridge: loopback(31008),
            proxy: loopback(31009),
        }
    }
}

/// Internal REST origin
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OriginConfig {
    /// `host:port` of the internal API
    pub internal_api_addr: String,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            internal_api_addr: "127.0.0.1:31010".to_string(),
        }
    }
}

/// Request limits configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Max inbound RPC message size in bytes (default: 20 MiB)
    pub max_recv_message_size: usize,
    /// Max outbound RPC message size in bytes (default: unbounded)
    pub max_send_message_size: usize,
    /// Max multipart upload body in bytes (default: 100 MiB)
    pub max_upload_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_recv_message_size: DEFAULT_MAX_RECV_MESSAGE_SIZE,
            max_send_message_size: usize::MAX,
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
        }
    }
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Read-header timeout for the bridge and proxy listeners
    #[serde(with = "humantime_serde")]
    pub read_header: Duration,
    /// Deadline for the upload bridge's loopback RPC (connect + call)
    #[serde(with = "humantime_serde")]
    pub upload_rpc: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            read_header: Duration::from_secs(30),
            upload_rpc: Duration::from_secs(30),
        }
    }
}

/// Shutdown phase bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Graceful drain of the RPC server before it is aborted
    #[serde(with = "humantime_serde")]
    pub rpc_drain: Duration,
    /// Grace period for each HTTP server (bridge, proxy)
    #[serde(with = "humantime_serde")]
    pub http_grace: Duration,
    /// Bound on the application's own shutdown call
    #[serde(with = "humantime_serde")]
    pub app_shutdown: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            rpc_drain: Duration::from_secs(10),
            http_grace: Duration::from_secs(5),
            app_shutdown: Duration::from_secs(5),
        }
    }
}

/// Interceptor chain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterceptorConfig {
    /// Record Prometheus/JSON call metrics (outermost stage)
    pub metrics_enabled: bool,
    /// Timeout guard for long calls
    pub timeout_guard: TimeoutGuardConfig,
    /// Method names that get the caller's process info attached; defaults to the
    /// registry's `attach_process_info` methods
    pub process_info_methods: Vec<String>,
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: false,
            timeout_guard: TimeoutGuardConfig::default(),
            process_info_methods: process_info_method_names()
                .into_iter()
                .map(str::to_owned)
                .collect(),
        }
    }
}

/// Which calls the timeout guard applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardScope {
    /// Only methods flagged long-running in the registry
    LongRunning,
    /// Every call
    All,
}

/// Timeout guard configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutGuardConfig {
    /// Disabled by `PORTICO_GRPC_NO_DEBUG_TIMEOUT=1`
    pub enabled: bool,
    /// Calls in scope
    pub scope: GuardScope,
    /// Upper bound on call duration
    #[serde(with = "humantime_serde")]
    pub limit: Duration,
}

impl Default for TimeoutGuardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scope: GuardScope::LongRunning,
            limit: Duration::from_secs(60),
        }
    }
}

/// File upload bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Intercepted path on the proxy listener
    pub path: String,
    /// Directory for staged files
    pub staging_dir: PathBuf,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            path: "/v1/file".to_string(),
            staging_dir: env::temp_dir(),
        }
    }
}

/// CORS configuration for the browser bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Allowed origins ("*" for all)
    pub allowed_origins: Vec<String>,
    /// Allowed methods
    pub allowed_methods: Vec<String>,
    /// Allowed headers ("*" for all)
    pub allowed_headers: Vec<String>,
    /// Expose headers
    pub expose_headers: Vec<String>,
    /// Max age for preflight cache
    pub max_age: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            allowed_methods: vec!["GET".to_string(), "POST".to_string(), "OPTIONS".to_string()],
            allowed_headers: vec!["*".to_string()],
            expose_headers: vec![
                "grpc-status".to_string(),
                "grpc-message".to_string(),
                "grpc-status-details-bin".to_string(),
            ],
            max_age: 86400, // 24 hours
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Two listeners share one fixed address
    #[error("duplicate listen addresses configured")]
    DuplicateAddresses,
    /// Address that does not parse as host:port
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    /// Invalid size limit
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
    /// Invalid timeout value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    /// General configuration error
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Humantime serde module for Duration serialization
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            let mins = mins.trim().parse::<u64>().map_err(|_| "invalid minutes")?;
            mins.checked_mul(60)
                .map(Duration::from_secs)
                .ok_or("duration too large")
        } else if let Some(hours) = s.strip_suffix('h') {
            let hours = hours.trim().parse::<u64>().map_err(|_| "invalid hours")?;
            hours
                .checked_mul(3600)
                .map(Duration::from_secs)
                .ok_or("duration too large")
        } else {
            // Try parsing as plain seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }
}
