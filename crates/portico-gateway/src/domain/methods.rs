//! Registry of the `ClientCommands` RPC surface.
//!
//! Each entry carries the gRPC path the router matches on and the behavior flags the
//! interceptor chain consults.

use std::collections::HashMap;
use std::sync::LazyLock;

/// Fully qualified gRPC service name.
pub const SERVICE_NAME: &str = "portico.ClientCommands";

/// gRPC paths, one per method.
pub mod paths {
    pub const APP_GET_VERSION: &str = "/portico.ClientCommands/AppGetVersion";
    pub const APP_SHUTDOWN: &str = "/portico.ClientCommands/AppShutdown";
    pub const WALLET_CREATE_SESSION: &str = "/portico.ClientCommands/WalletCreateSession";
    pub const ACCOUNT_LOCAL_LINK_NEW_CHALLENGE: &str =
        "/portico.ClientCommands/AccountLocalLinkNewChallenge";
    pub const ACCOUNT_LOCAL_LINK_SOLVE_CHALLENGE: &str =
        "/portico.ClientCommands/AccountLocalLinkSolveChallenge";
    pub const FILE_UPLOAD: &str = "/portico.ClientCommands/FileUpload";
}

/// Method behavior configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodBehavior {
    /// Subject to the timeout guard when it is scoped to long-running calls
    pub long_running: bool,
    /// Caller's process is resolved and attached to the context by default
    pub attach_process_info: bool,
}

/// Method metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    /// Short method name (e.g., "FileUpload")
    pub name: &'static str,
    /// Full gRPC path (e.g., "/portico.ClientCommands/FileUpload")
    pub path: &'static str,
    /// Method behavior configuration
    pub behavior: MethodBehavior,
    /// Brief description
    pub description: &'static str,
}

impl MethodInfo {
    /// Create a method that completes quickly.
    const fn quick(name: &'static str, path: &'static str, description: &'static str) -> Self {
        Self {
            name,
            path,
            behavior: MethodBehavior {
                long_running: false,
                attach_process_info: false,
            },
            description,
        }
    }

    /// Create a method that may legitimately run for a long time.
    const fn long(name: &'static str, path: &'static str, description: &'static str) -> Self {
        Self {
            name,
            path,
            behavior: MethodBehavior {
                long_running: true,
                attach_process_info: false,
            },
            description,
        }
    }

    /// Same method, with the caller's process attached.
    const fn with_process_info(mut self) -> Self {
        self.behavior.attach_process_info = true;
        self
    }

    /// Check if this method is flagged long-running.
    pub const fn is_long_running(&self) -> bool {
        self.behavior.long_running
    }

    /// Check if the caller's process is attached by default.
    pub const fn attaches_process_info(&self) -> bool {
        self.behavior.attach_process_info
    }
}

pub static APP_GET_VERSION: MethodInfo = MethodInfo::quick(
    "AppGetVersion",
    paths::APP_GET_VERSION,
    "Returns the application version",
);

pub static APP_SHUTDOWN: MethodInfo = MethodInfo::quick(
    "AppShutdown",
    paths::APP_SHUTDOWN,
    "Stops the application",
);

pub static WALLET_CREATE_SESSION: MethodInfo = MethodInfo::quick(
    "WalletCreateSession",
    paths::WALLET_CREATE_SESSION,
    "Exchanges an app key for a session token",
);

pub static ACCOUNT_LOCAL_LINK_NEW_CHALLENGE: MethodInfo = MethodInfo::quick(
    "AccountLocalLinkNewChallenge",
    paths::ACCOUNT_LOCAL_LINK_NEW_CHALLENGE,
    "Starts pairing a local app; the caller's process is recorded",
)
.with_process_info();

pub static ACCOUNT_LOCAL_LINK_SOLVE_CHALLENGE: MethodInfo = MethodInfo::quick(
    "AccountLocalLinkSolveChallenge",
    paths::ACCOUNT_LOCAL_LINK_SOLVE_CHALLENGE,
    "Completes pairing and returns an app key",
);

pub static FILE_UPLOAD: MethodInfo = MethodInfo::long(
    "FileUpload",
    paths::FILE_UPLOAD,
    "Imports a local file into a space",
);

/// Method registry keyed by gRPC path
pub static METHOD_REGISTRY: LazyLock<HashMap<&'static str, &'static MethodInfo>> =
    LazyLock::new(|| {
        [
            &APP_GET_VERSION,
            &APP_SHUTDOWN,
            &WALLET_CREATE_SESSION,
            &ACCOUNT_LOCAL_LINK_NEW_CHALLENGE,
            &ACCOUNT_LOCAL_LINK_SOLVE_CHALLENGE,
            &FILE_UPLOAD,
        ]
        .into_iter()
        .map(|method| (method.path, method))
        .collect()
    });

/// Get method info by gRPC path
pub fn get_method_info(path: &str) -> Option<&'static MethodInfo> {
    METHOD_REGISTRY.get(path).copied()
}

/// Get method info by short name
pub fn method_by_name(name: &str) -> Option<&'static MethodInfo> {
    METHOD_REGISTRY.values().copied().find(|m| m.name == name)
}

/// Check if a gRPC path is served
pub fn is_method_supported(path: &str) -> bool {
    METHOD_REGISTRY.contains_key(path)
}

/// Names of the methods flagged `attach_process_info`, sorted.
pub fn process_info_method_names() -> Vec<&'static str> {
    let mut names: Vec<_> = METHOD_REGISTRY
        .values()
        .filter(|m| m.attaches_process_info())
        .map(|m| m.name)
        .collect();
    names.sort_unstable();
    names
}
