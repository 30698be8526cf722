//! Core error type for the orchestration pipeline.
//!
//! One enum covers every failure class the core can surface. Tool exit codes
//! are deliberately *not* represented here: a tool exiting non-zero is a
//! successful invocation whose result carries the exit code, so clients and
//! language models can reason about it. Only infrastructure faults become
//! errors.

use rhea_common::StoreError;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, RheaError>;

#[derive(Debug, thiserror::Error)]
pub enum RheaError {
    /// Parameter coercion failure, surfaced with the parameter name.
    #[error("invalid value for parameter '{param}': {reason}")]
    BadValue { param: String, reason: String },

    /// Malformed `#if` construct or unrecoverable substitution.
    #[error("template error: {0}")]
    Template(String),

    /// Object store or semantic index unreachable.
    #[error("resources unavailable: {0}")]
    ResourcesUnavailable(String),

    /// Two-phase package install exhausted both the pinned and floored pass.
    #[error("environment install failed for tool '{tool_id}': {detail}")]
    EnvInstallFailed { tool_id: String, detail: String },

    /// No free worker slot within the acquire timeout.
    #[error("no worker slot available within {0:?}")]
    ResourceExhausted(Duration),

    /// Infrastructure fault during a run; the worker is dead. The call fails
    /// fast with no retry on another worker, since the tool may have had
    /// side effects already.
    #[error("worker crashed: {0}")]
    WorkerCrashed(String),

    /// A busy worker refuses a new invocation.
    #[error("worker for tool '{0}' is busy")]
    WorkerBusy(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

impl RheaError {
    pub fn bad_value(param: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BadValue {
            param: param.into(),
            reason: reason.into(),
        }
    }

    /// Whether retrying the same call can succeed without operator action.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RheaError::ResourcesUnavailable(_)
                | RheaError::ResourceExhausted(_)
                | RheaError::WorkerBusy(_)
                | RheaError::Timeout(_)
        )
    }

    /// Stable category label for logs and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            RheaError::BadValue { .. } => "BAD_VALUE",
            RheaError::Template(_) => "TEMPLATE",
            RheaError::ResourcesUnavailable(_) => "RESOURCES",
            RheaError::EnvInstallFailed { .. } => "ENV_INSTALL",
            RheaError::ResourceExhausted(_) => "EXHAUSTED",
            RheaError::WorkerCrashed(_) => "WORKER",
            RheaError::WorkerBusy(_) => "WORKER_BUSY",
            RheaError::NotFound(_) => "NOT_FOUND",
            RheaError::Cancelled => "CANCELLED",
            RheaError::Timeout(_) => "TIMEOUT",
        }
    }
}

impl From<StoreError> for RheaError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => RheaError::NotFound(key),
            StoreError::Unavailable(msg) => RheaError::ResourcesUnavailable(msg),
            StoreError::Serialization(e) => {
                RheaError::ResourcesUnavailable(format!("store payload corrupt: {e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_not_found_maps_to_not_found() {
        let err: RheaError = StoreError::NotFound("abc".to_string()).into();
        assert!(matches!(err, RheaError::NotFound(_)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn unavailable_is_recoverable() {
        let err: RheaError = StoreError::Unavailable("conn refused".to_string()).into();
        assert!(err.is_recoverable());
        assert_eq!(err.category(), "RESOURCES");
    }
}
