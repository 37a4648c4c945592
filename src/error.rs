//! Error taxonomy for audit operations.
//!
//! Every failure surfaced to callers or recorded in artifacts carries an
//! [`ErrorKind`] so programmatic consumers can branch without parsing
//! messages.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed vocabulary of failure kinds, stored in `error.kind` of reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Config,
    Network,
    Session,
    Navigation,
    Timeout,
    Plugin,
    Cache,
    Filesystem,
    Cancelled,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Network => "network",
            Self::Session => "session",
            Self::Navigation => "navigation",
            Self::Timeout => "timeout",
            Self::Plugin => "plugin",
            Self::Cache => "cache",
            Self::Filesystem => "filesystem",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Error type for all audit operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuditError {
    /// Invalid or inconsistent configuration
    #[error("configuration error: {0}")]
    Config(String),
    /// Network-level failure (DNS, connect, reset, HTTP transport)
    #[error("network error: {0}")]
    Network(String),
    /// Browser session failure (launch, CDP disconnect, target closed)
    #[error("session error: {0}")]
    Session(String),
    /// Navigation failed or produced a malformed result
    #[error("navigation error: {0}")]
    Navigation(String),
    /// A budgeted operation overran its wall-clock allowance
    #[error("timed out: {0}")]
    Timeout(String),
    /// A plugin raised or asserted
    #[error("plugin error: {0}")]
    Plugin(String),
    /// Cache read/write or schema problem
    #[error("cache error: {0}")]
    Cache(String),
    /// Artifact or cache I/O failure
    #[error("filesystem error: {0}")]
    Filesystem(String),
    /// Operation cancelled via token
    #[error("audit cancelled")]
    Cancelled,
    /// Everything else
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuditError {
    /// The taxonomy bucket this error belongs to
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::Network(_) => ErrorKind::Network,
            Self::Session(_) => ErrorKind::Session,
            Self::Navigation(_) => ErrorKind::Navigation,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Plugin(_) => ErrorKind::Plugin,
            Self::Cache(_) => ErrorKind::Cache,
            Self::Filesystem(_) => ErrorKind::Filesystem,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<anyhow::Error> for AuditError {
    fn from(err: anyhow::Error) -> Self {
        // Use {:#} to preserve full error chain with context
        Self::Internal(format!("{err:#}"))
    }
}

impl From<std::io::Error> for AuditError {
    fn from(err: std::io::Error) -> Self {
        Self::Filesystem(err.to_string())
    }
}

/// Convenience alias for Result with [`AuditError`]
pub type AuditResult<T> = Result<T, AuditError>;

/// Serializable `{kind, message}` record embedded in plugin and target
/// results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorInfo {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&AuditError> for ErrorInfo {
    fn from(err: &AuditError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
