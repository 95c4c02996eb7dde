//! Perpetual task record: a declarative, recurring polling assignment.
//!
//! The record is pure desired state. Assignment to workers and the poll
//! cadence itself belong to an external scheduler; the service only
//! manages these records.

use std::collections::BTreeMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Client context carried by a perpetual task: exactly one of a structured
/// parameter map or an opaque execution bundle. The enum makes the
/// exactly-one invariant unrepresentable to violate.
///
/// `Params` uses a `BTreeMap` so canonical serialization (and therefore
/// the dedupe fingerprint) is independent of insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskContext {
    /// Structured parameters interpreted by the worker-side executor.
    Params(BTreeMap<String, String>),
    /// Opaque execution bundle (serialized connector config, credentials
    /// reference, etc.) handed to the worker verbatim.
    Bundle(Vec<u8>),
}

impl TaskContext {
    /// Canonical bytes of this context, for fingerprinting.
    fn canonical_bytes(&self) -> Vec<u8> {
        match self {
            // BTreeMap iterates in key order, so JSON here is canonical.
            Self::Params(map) => {
                let mut bytes = b"params:".to_vec();
                bytes.extend(serde_json::to_vec(map).unwrap_or_default());
                bytes
            },
            Self::Bundle(bundle) => {
                let mut bytes = b"bundle:".to_vec();
                bytes.extend_from_slice(bundle);
                bytes
            },
        }
    }
}

/// Recurrence schedule for a perpetual task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSchedule {
    /// Interval between assignments, in milliseconds.
    pub interval_ms: u64,

    /// Per-run execution bound, in milliseconds.
    pub timeout_ms: u64,
}

/// Stored representation of a perpetual task.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeMap;
/// use taskmesh::domain::perpetual::{PerpetualTaskRecord, TaskContext, TaskSchedule};
///
/// let record = PerpetualTaskRecord::new(
///     "instance-sync",
///     "acct-1",
///     TaskContext::Params(BTreeMap::new()),
///     TaskSchedule { interval_ms: 600_000, timeout_ms: 120_000 },
///     false,
///     None,
/// );
/// assert_eq!(record.task_type, "instance-sync");
/// assert!(!record.allow_duplicate);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerpetualTaskRecord {
    /// Unique identifier (UUIDv4).
    pub task_id: String,

    /// Worker-side executor discriminator.
    pub task_type: String,

    /// Owning account.
    pub account_id: String,

    /// Client context (exactly one variant, see [`TaskContext`]).
    pub context: TaskContext,

    /// Recurrence schedule.
    pub schedule: TaskSchedule,

    /// When `false`, creation collapses equal (type, account, context)
    /// tuples onto the existing task.
    pub allow_duplicate: bool,

    /// Optional human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// RFC 3339 creation timestamp.
    pub created_at: String,

    /// RFC 3339 last-update timestamp.
    pub last_updated_at: String,
}

impl PerpetualTaskRecord {
    /// Creates a record with a generated UUID id.
    pub fn new(
        task_type: impl Into<String>,
        account_id: impl Into<String>,
        context: TaskContext,
        schedule: TaskSchedule,
        allow_duplicate: bool,
        description: Option<String>,
    ) -> Self {
        let now = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        Self {
            task_id: Uuid::new_v4().to_string(),
            task_type: task_type.into(),
            account_id: account_id.into(),
            context,
            schedule,
            allow_duplicate,
            description,
            created_at: now.clone(),
            last_updated_at: now,
        }
    }

    /// Content fingerprint of the (type, account, context) identity tuple.
    ///
    /// SHA-256 over a canonical serialization, URL-safe base64 without
    /// padding. Two records with equal tuples always produce the same
    /// fingerprint regardless of construction order.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::collections::BTreeMap;
    /// use taskmesh::domain::perpetual::{PerpetualTaskRecord, TaskContext, TaskSchedule};
    ///
    /// let schedule = TaskSchedule { interval_ms: 1, timeout_ms: 1 };
    /// let a = PerpetualTaskRecord::new(
    ///     "t", "acct", TaskContext::Bundle(vec![1, 2]), schedule, false, None,
    /// );
    /// let b = PerpetualTaskRecord::new(
    ///     "t", "acct", TaskContext::Bundle(vec![1, 2]), schedule, false, None,
    /// );
    /// assert_eq!(a.fingerprint(), b.fingerprint());
    /// assert_ne!(a.task_id, b.task_id);
    /// ```
    pub fn fingerprint(&self) -> String {
        context_fingerprint(&self.task_type, &self.account_id, &self.context)
    }

    /// Replaces the context in place, preserving id, schedule, and
    /// assignment. Used by reset.
    pub fn replace_context(&mut self, bundle: Vec<u8>) {
        self.context = TaskContext::Bundle(bundle);
        self.last_updated_at = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
    }
}

/// Fingerprint of a (type, account, context) tuple without building a
/// record first. Creation uses this to find an existing task before
/// allocating an id.
pub fn context_fingerprint(task_type: &str, account_id: &str, context: &TaskContext) -> String {
    let mut hasher = Sha256::new();
    hasher.update(task_type.as_bytes());
    hasher.update([0u8]);
    hasher.update(account_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(context.canonical_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}
