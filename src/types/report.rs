//! Periodic report types delivered by perpetual-task workers, and the
//! typed outcome of applying reported instances to the system-of-record.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A periodic report posted by the worker currently assigned a perpetual
/// task.
///
/// `success = false` means the worker could not observe the target at all
/// this cycle (connectivity, credentials); per-instance problems are
/// reported inside a successful report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerpetualTaskReport {
    /// Account the perpetual task belongs to.
    pub account_id: String,

    /// Whether the polling cycle itself succeeded.
    pub success: bool,

    /// Worker-supplied detail for failed cycles.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Instance observations gathered this cycle.
    #[serde(default)]
    pub instances: Vec<ReportedInstance>,
}

impl PerpetualTaskReport {
    /// A successful report carrying `instances`.
    pub fn success(account_id: impl Into<String>, instances: Vec<ReportedInstance>) -> Self {
        Self {
            account_id: account_id.into(),
            success: true,
            message: None,
            instances,
        }
    }

    /// A failed cycle with a reason.
    pub fn failure(account_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            success: false,
            message: Some(message.into()),
            instances: Vec::new(),
        }
    }
}

/// One observed instance, attributed to the tracked record that is
/// reconciling it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportedInstance {
    /// The tracked record (resource association) this observation belongs to.
    pub tracked_record_id: String,

    /// The release identifier the instance is running.
    pub release_id: String,

    /// Provider-specific instance detail, opaque to the consumer.
    pub payload: Value,
}

/// Outcome of applying reported instances to the system-of-record.
///
/// "No instances found" is a routine condition for a scaled-to-zero or
/// freshly-created target, so it is an explicit variant rather than an
/// error the caller has to catch.
///
/// # Examples
///
/// ```
/// use taskmesh::types::report::SyncOutcome;
///
/// assert!(SyncOutcome::Empty.is_benign());
/// assert!(SyncOutcome::Applied(4).is_benign());
/// assert!(!SyncOutcome::Failure("store offline".to_string()).is_benign());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The target reported no instances. Benign; nothing written.
    Empty,
    /// The given number of instance records were written.
    Applied(usize),
    /// The write failed; recorded as a sync failure, siblings unaffected.
    Failure(String),
}

impl SyncOutcome {
    /// Returns `true` unless the outcome is a failure.
    pub fn is_benign(&self) -> bool {
        !matches!(self, Self::Failure(_))
    }
}
