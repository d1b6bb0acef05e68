//! Stored session credential.
//!
//! The token is an opaque string handed out by the application. The gateway only
//! carries it: it is attached to loopback calls as `token` metadata and otherwise
//! never printed in full.

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::error::CredentialError;

/// Number of leading characters a preview may reveal.
pub const TOKEN_PREVIEW_CHARS: usize = 5;

/// Metadata key the application reads the session token from.
pub const TOKEN_METADATA_KEY: &str = "token";

/// Session token that zeroizes on drop and never appears in logs.
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionToken {
    inner: String,
}

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            inner: token.into(),
        }
    }

    /// Raw value, only for putting on the wire.
    #[inline]
    pub fn expose_secret(&self) -> &str {
        &self.inner
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Diagnostic preview.
    ///
    /// `empty` for an empty token, the first five characters plus `...` for longer
    /// tokens, and `[redacted]` when five characters would already be the whole secret.
    pub fn preview(&self) -> String {
        let mut chars = self.inner.chars();
        let head: String = chars.by_ref().take(TOKEN_PREVIEW_CHARS).collect();
        if head.is_empty() {
            "empty".to_string()
        } else if chars.next().is_none() {
            "[redacted]".to_string()
        } else {
            format!("{head}...")
        }
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(***)")
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.preview())
    }
}

/// Read access to the stored session token.
///
/// Implementations must be safe for concurrent reads; the upload bridge calls this
/// once per request.
pub trait CredentialSource: Send + Sync {
    /// Current token. An empty token is valid and means "call without metadata".
    fn stored_token(&self) -> Result<SessionToken, CredentialError>;
}

/// Fixed token, for embedding and tests.
#[derive(Clone, Default)]
pub struct StaticCredential {
    token: SessionToken,
}

impl StaticCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: SessionToken::new(token),
        }
    }
}

impl CredentialSource for StaticCredential {
    fn stored_token(&self) -> Result<SessionToken, CredentialError> {
        Ok(self.token.clone())
    }
}

/// Token read from an environment variable on every lookup.
#[derive(Debug, Clone)]
pub struct EnvCredential {
    var: String,
}

impl EnvCredential {
    pub const DEFAULT_VAR: &'static str = "PORTICO_SESSION_TOKEN";

    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvCredential {
    fn default() -> Self {
        Self::new(Self::DEFAULT_VAR)
    }
}

impl CredentialSource for EnvCredential {
    fn stored_token(&self) -> Result<SessionToken, CredentialError> {
        match std::env::var(&self.var) {
            Ok(value) => Ok(SessionToken::new(value)),
            Err(std::env::VarError::NotPresent) => Err(CredentialError::Missing),
            Err(std::env::VarError::NotUnicode(_)) => Err(CredentialError::Malformed(format!(
                "{} is not valid unicode",
                self.var
            ))),
        }
    }
}

/// Token read from the `session_token` field of a JSON configuration file.
///
/// The file is re-read on every lookup so a token saved by another process (for
/// example after a fresh login) is picked up without restarting the gateway.
#[derive(Debug, Clone)]
pub struct FileCredential {
    path: PathBuf,
}

#[derive(Deserialize)]
struct StoredConfig {
    #[serde(default)]
    session_token: String,
}

impl FileCredential {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialSource for FileCredential {
    fn stored_token(&self) -> Result<SessionToken, CredentialError> {
        let mut raw = std::fs::read(&self.path).map_err(CredentialError::Unreadable)?;
        let parsed = serde_json::from_slice::<StoredConfig>(&raw);
        raw.zeroize();
        let mut stored = parsed.map_err(|e| CredentialError::Malformed(e.to_string()))?;
        if stored.session_token.is_empty() {
            return Err(CredentialError::Missing);
        }
        let token = SessionToken::new(std::mem::take(&mut stored.session_token));
        Ok(token)
    }
}
