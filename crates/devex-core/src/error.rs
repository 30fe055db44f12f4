//! Closed error taxonomy for the installation core (§7).

use thiserror::Error;

/// The single error type threaded through every subsystem in this crate.
///
/// Each variant corresponds to one row of §7's recovery-policy table; the
/// pipeline runner's retry/continue-on-error decision is driven entirely by
/// [`CoreError::kind`], never by matching on a specific variant.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Caller-supplied input failed validation; never retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An expected item (key, app, backup, undo entry) was absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// A transient I/O condition (network timeout, temporary exec failure)
    /// eligible for retry with backoff.
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    /// The OS refused the operation (elevation required, file permissions).
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The top-level cancellation context fired before or during the operation.
    #[error("cancelled")]
    Cancelled,

    /// Content or structure failed a security-validator rule.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// The state store's schema could not be brought up to date.
    #[error("schema error: {0}")]
    SchemaError(String),

    /// Anything else: wrapped lower-level error with no better classification.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// The taxonomy kind, as a static tag, used by the pipeline runner's
    /// retry and batch-continuation decisions (§4.I, §7).
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::TransientIo(_) => ErrorKind::TransientIo,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::ValidationFailed(_) => ErrorKind::ValidationFailed,
            Self::SchemaError(_) => ErrorKind::SchemaError,
            Self::Internal(_) => ErrorKind::InternalError,
        }
    }

    /// Whether a batch runner may continue past this error for a single app
    /// without `--continue-on-error` being set (§7 propagation policy).
    pub fn continues_batch_by_default(&self) -> bool {
        matches!(self.kind(), ErrorKind::InvalidInput | ErrorKind::NotFound)
    }

    /// Whether the pipeline runner's retry-with-backoff should re-attempt
    /// the operation that produced this error (§4.I step 4).
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::TransientIo)
    }

    /// Wraps this error with a contextual prefix, matching the teacher's
    /// `"failed to install <app>: ..."` annotation convention (§7).
    pub fn context(self, msg: impl Into<String>) -> Self {
        let prefix = msg.into();
        match self {
            Self::InvalidInput(e) => Self::InvalidInput(format!("{prefix}: {e}")),
            Self::NotFound(e) => Self::NotFound(format!("{prefix}: {e}")),
            Self::TransientIo(e) => Self::TransientIo(format!("{prefix}: {e}")),
            Self::PermissionDenied(e) => Self::PermissionDenied(format!("{prefix}: {e}")),
            Self::Cancelled => Self::Cancelled,
            Self::ValidationFailed(e) => Self::ValidationFailed(format!("{prefix}: {e}")),
            Self::SchemaError(e) => Self::SchemaError(format!("{prefix}: {e}")),
            Self::Internal(e) => Self::Internal(format!("{prefix}: {e}")),
        }
    }
}

/// The closed taxonomy kind, independent of the wrapped message (§7 table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Reported to caller; never retried. Fatal to the affected op.
    InvalidInput,
    /// Recovered locally where an absent item is acceptable.
    NotFound,
    /// Retried per §4.I with exponential backoff.
    TransientIo,
    /// Fatal to the op; surfaced unmodified; may prompt for sudo.
    PermissionDenied,
    /// Propagated; no retry; records `cancelled` in the undo log.
    Cancelled,
    /// Fatal to the op; never retried; logged at error.
    ValidationFailed,
    /// Fatal to the process at startup.
    SchemaError,
    /// Fatal to the op; reported with causal chain.
    InternalError,
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => Self::NotFound(e.to_string()),
            other => Self::Internal(format!("sqlite: {other}")),
        }
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            Self::TransientIo(e.to_string())
        } else {
            Self::Internal(format!("http: {e}"))
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind as IoKind;
        match e.kind() {
            IoKind::NotFound => Self::NotFound(e.to_string()),
            IoKind::PermissionDenied => Self::PermissionDenied(e.to_string()),
            IoKind::TimedOut | IoKind::Interrupted | IoKind::WouldBlock => {
                Self::TransientIo(e.to_string())
            }
            _ => Self::Internal(format!("io: {e}")),
        }
    }
}

/// Convenience alias used throughout this crate's public functions.
pub type CoreResult<T> = Result<T, CoreError>;
