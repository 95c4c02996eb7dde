//! Error taxonomy for dispatch and reconciliation operations.
//!
//! [`Error`] is the single internal error type. Variants map onto the
//! boundary taxonomy via [`Error::kind`]: unknown ids become
//! [`ErrorKind::NotFound`], unrecognized providers become
//! [`ErrorKind::UnsupportedOperation`], and everything else collapses to
//! [`ErrorKind::Internal`] so implementation detail never leaks across the
//! network boundary.
//!
//! Retryability is a property of the variant, not the call site:
//! [`Error::is_retryable`] drives the bounded retry loop in the
//! reconciliation consumer's creation path.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::task::TaskStatus;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during dispatch, perpetual-task, and
/// reconciliation operations.
///
/// # Examples
///
/// ```
/// use taskmesh::error::{Error, ErrorKind};
///
/// let err = Error::not_found("task", "missing-id");
/// assert_eq!(err.kind(), ErrorKind::NotFound);
/// assert!(err.to_string().contains("missing-id"));
/// ```
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed request. Fail fast, never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown id or id/account pairing.
    #[error("{resource} not found: {id}")]
    NotFound {
        /// The resource category ("task", "perpetual task", ...).
        resource: &'static str,
        /// The id that was not found.
        id: String,
    },

    /// Attempted an invalid status transition.
    #[error("invalid transition from {from} to {to} for task {task_id}")]
    InvalidTransition {
        /// The task being transitioned.
        task_id: String,
        /// Current status.
        from: TaskStatus,
        /// Rejected target status.
        to: TaskStatus,
    },

    /// Unrecognized provider or kind. Non-retryable.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Transient infrastructure fault (lock timeout, worker unavailable).
    /// Bounded retry, then escalate.
    #[error("transient infrastructure failure: {0}")]
    Transient(String),

    /// The distributed-lock retry budget for a resource is spent. Terminal
    /// signal that the resource should fall back to the legacy poller.
    #[error("lock acquisition exhausted for {key} after {attempts} attempts")]
    LockExhausted {
        /// The contested lock key.
        key: String,
        /// Total acquire attempts made.
        attempts: u32,
    },

    /// A worker reported a terminal failure.
    #[error("worker reported failure: {0}")]
    TerminalWorker(String),

    /// A bounded wait elapsed without a result.
    #[error("timed out after {waited_ms}ms")]
    Timeout {
        /// How long the caller waited, in milliseconds.
        waited_ms: u64,
    },

    /// Unexpected fault. Logged with full context at the raise site;
    /// crosses the boundary as a generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for [`Error::Validation`].
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Shorthand for [`Error::NotFound`].
    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            id: id.into(),
        }
    }

    /// Shorthand for [`Error::UnsupportedOperation`].
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedOperation(msg.into())
    }

    /// Shorthand for [`Error::Transient`].
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Shorthand for [`Error::Internal`].
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Maps this error to the machine-readable boundary kind.
    ///
    /// Only three kinds cross the wire: `not_found`,
    /// `unsupported_operation`, and `internal`. Everything that is neither
    /// a lookup miss nor an unsupported provider collapses to `internal`.
    ///
    /// # Examples
    ///
    /// ```
    /// use taskmesh::error::{Error, ErrorKind};
    ///
    /// assert_eq!(Error::validation("bad").kind(), ErrorKind::Internal);
    /// assert_eq!(Error::not_found("task", "t1").kind(), ErrorKind::NotFound);
    /// assert_eq!(
    ///     Error::unsupported("kind: mainframe").kind(),
    ///     ErrorKind::UnsupportedOperation
    /// );
    /// ```
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::UnsupportedOperation(_) => ErrorKind::UnsupportedOperation,
            _ => ErrorKind::Internal,
        }
    }

    /// Returns `true` if a bounded retry is worth attempting.
    ///
    /// The creation-path retry loop treats everything except validation
    /// failures, unsupported operations, and an already-spent lock budget
    /// as retryable.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Validation(_) | Self::UnsupportedOperation(_) | Self::LockExhausted { .. }
        )
    }
}

/// Machine-readable error kind carried by every structured error response.
///
/// Serializes as `snake_case` on the wire.
///
/// # Examples
///
/// ```
/// use taskmesh::error::ErrorKind;
///
/// let json = serde_json::to_value(ErrorKind::UnsupportedOperation).unwrap();
/// assert_eq!(json, "unsupported_operation");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unexpected internal fault; details withheld from the caller.
    Internal,
    /// Unknown id or id/account pairing.
    NotFound,
    /// Unrecognized provider kind or operation. Non-retryable.
    UnsupportedOperation,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_mapping_collapses_to_internal() {
        assert_eq!(Error::validation("x").kind(), ErrorKind::Internal);
        assert_eq!(Error::transient("x").kind(), ErrorKind::Internal);
        assert_eq!(Error::internal("x").kind(), ErrorKind::Internal);
        assert_eq!(Error::Timeout { waited_ms: 5 }.kind(), ErrorKind::Internal);
        assert_eq!(
            Error::TerminalWorker("boom".to_string()).kind(),
            ErrorKind::Internal
        );
        assert_eq!(
            Error::LockExhausted {
                key: "k".to_string(),
                attempts: 3
            }
            .kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn kind_mapping_preserves_lookup_and_unsupported() {
        assert_eq!(Error::not_found("task", "t1").kind(), ErrorKind::NotFound);
        assert_eq!(
            Error::unsupported("provider").kind(),
            ErrorKind::UnsupportedOperation
        );
    }

    #[test]
    fn retryability() {
        assert!(Error::transient("lock timeout").is_retryable());
        assert!(Error::internal("odd").is_retryable());
        assert!(Error::not_found("task", "t").is_retryable());
        assert!(!Error::validation("bad").is_retryable());
        assert!(!Error::unsupported("kind").is_retryable());
        assert!(!Error::LockExhausted {
            key: "k".to_string(),
            attempts: 3
        }
        .is_retryable());
    }

    #[test]
    fn display_carries_context() {
        let err = Error::not_found("perpetual task", "pt-9");
        assert_eq!(err.to_string(), "perpetual task not found: pt-9");

        let err = Error::LockExhausted {
            key: "resource-1".to_string(),
            attempts: 3,
        };
        assert!(err.to_string().contains("resource-1"));
        assert!(err.to_string().contains("3 attempts"));
    }

    #[test]
    fn error_kind_snake_case_round_trip() {
        for kind in [
            ErrorKind::Internal,
            ErrorKind::NotFound,
            ErrorKind::UnsupportedOperation,
        ] {
            let json = serde_json::to_value(kind).unwrap();
            let back: ErrorKind = serde_json::from_value(json).unwrap();
            assert_eq!(kind, back);
        }
    }
}
