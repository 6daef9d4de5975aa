//! Job error taxonomy.
//!
//! Every failure a job can observe maps onto one of these variants. The
//! retry executor uses `is_retryable` and `relaxes_policy` to decide what
//! happens next; the batch layer only ever records them.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification stored inside a failed `JobResult`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Navigation timeout or network flake reported by the auditor
    TransientAudit,

    /// Browser/auditor instance failed to start or attach
    ResourceExhaustion,

    /// Malformed options
    Configuration,

    /// Backing store unavailable
    CacheIo,

    /// Target can never be audited (DNS failure, invalid URL, ...)
    PermanentTarget,

    /// Attempt exceeded its deadline
    Timeout,

    /// Job task panicked or was aborted
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::TransientAudit => "transient_audit",
            Self::ResourceExhaustion => "resource_exhaustion",
            Self::Configuration => "configuration",
            Self::CacheIo => "cache_io",
            Self::PermanentTarget => "permanent_target",
            Self::Timeout => "timeout",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Errors produced while running a single job
#[derive(Debug, Clone, PartialEq, Error)]
pub enum JobError {
    #[error("navigation timed out: {0}")]
    NavigationTimeout(String),

    #[error("transient audit failure: {0}")]
    TransientAudit(String),

    #[error("external resource unavailable: {0}")]
    ResourceExhaustion(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("cache I/O failure: {0}")]
    CacheIo(String),

    #[error("target cannot be audited: {0}")]
    PermanentTarget(String),

    #[error("attempt exceeded its deadline of {0:?}")]
    AttemptTimeout(Duration),

    #[error("internal error: {0}")]
    Internal(String),
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NavigationTimeout(_) | Self::TransientAudit(_) => ErrorKind::TransientAudit,
            Self::ResourceExhaustion(_) => ErrorKind::ResourceExhaustion,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::CacheIo(_) => ErrorKind::CacheIo,
            Self::PermanentTarget(_) => ErrorKind::PermanentTarget,
            Self::AttemptTimeout(_) => ErrorKind::Timeout,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NavigationTimeout(_)
                | Self::TransientAudit(_)
                | Self::ResourceExhaustion(_)
                | Self::AttemptTimeout(_)
        )
    }

    /// Whether the next attempt should run with relaxed wait conditions
    pub fn relaxes_policy(&self) -> bool {
        matches!(self, Self::NavigationTimeout(_) | Self::AttemptTimeout(_))
    }
}

/// Classify a navigation error message coming from a browser driver.
pub fn classify_navigation_error(message: &str) -> JobError {
    const PERMANENT: &[&str] = &[
        "ERR_NAME_NOT_RESOLVED",
        "ERR_INVALID_URL",
        "ERR_ADDRESS_UNREACHABLE",
        "ERR_CERT_",
    ];

    if PERMANENT.iter().any(|marker| message.contains(marker)) {
        return JobError::PermanentTarget(message.to_string());
    }

    // Chromium reports net::ERR_TIMED_OUT and ERR_CONNECTION_TIMED_OUT
    let lower = message.to_ascii_lowercase();
    if ["timeout", "timed out", "timed_out"]
        .iter()
        .any(|marker| lower.contains(marker))
    {
        return JobError::NavigationTimeout(message.to_string());
    }

    JobError::TransientAudit(message.to_string())
}
