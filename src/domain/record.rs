//! Task record -- the registry's internal representation of a dispatched
//! task.
//!
//! [`TaskRecord`] carries everything the dispatch path needs beyond the
//! wire payload: owning scope for tenant isolation, capability predicates
//! and routing selectors (opaque to the core, consumed by the external
//! worker matcher), timeouts, computed expiry, and the optional callback
//! token binding the task to its async completion path.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::task::{TaskMode, TaskResult, TaskStatus};

/// Owning scope of a task. Tenant isolation hangs off `account_id`;
/// org/project narrow it further when present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskScope {
    /// The owning account. Every registry lookup is scoped by this.
    pub account_id: String,

    /// Optional organization within the account.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,

    /// Optional project within the organization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

impl TaskScope {
    /// Account-only scope.
    pub fn account(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            org_id: None,
            project_id: None,
        }
    }
}

/// Opaque typed payload handed to the claiming worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPayload {
    /// Worker-side dispatch discriminator (e.g. `"shell-script"`).
    pub kind: String,

    /// Payload body, opaque to the control plane.
    pub data: Value,
}

/// Internal storage representation of a dispatched task.
///
/// All fields are public so registry backends have full access. Use
/// [`TaskRecord::new`] to construct one with a generated UUID id and
/// computed expiry.
///
/// # Examples
///
/// ```
/// use taskmesh::domain::record::{TaskRecord, TaskScope, TaskPayload};
/// use taskmesh::types::task::{TaskMode, TaskStatus};
/// use serde_json::json;
///
/// let record = TaskRecord::new(
///     TaskScope::account("acct-1"),
///     TaskMode::Async,
///     TaskPayload { kind: "http-probe".to_string(), data: json!({}) },
///     600_000,
///     60_000,
/// );
/// assert_eq!(record.status, TaskStatus::Queued);
/// assert!(!record.task_id.is_empty());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    /// Unique identifier (UUIDv4).
    pub task_id: String,

    /// Routing mode the task was submitted with.
    pub mode: TaskMode,

    /// Current lifecycle status.
    pub status: TaskStatus,

    /// Owning scope.
    pub scope: TaskScope,

    /// Capability predicates a worker must satisfy. Opaque to the core;
    /// evaluated by the external worker matcher.
    pub capabilities: Vec<String>,

    /// Routing selectors narrowing the eligible worker set.
    pub selectors: Vec<String>,

    /// Opaque typed payload.
    pub payload: TaskPayload,

    /// Execution bound in milliseconds.
    pub timeout_ms: u64,

    /// Queue-residency bound in milliseconds.
    pub queue_timeout_ms: u64,

    /// When the task was accepted into the registry.
    pub enqueued_at: DateTime<Utc>,

    /// Advisory total expiry: enqueue time plus queue and execution
    /// bounds. Abort timing is enforced elsewhere.
    pub expires_at: DateTime<Utc>,

    /// Token binding this task to a registered callback sink. A task has
    /// at most one active completion path; the gateway rejects a sync
    /// submission that also carries a token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_token: Option<String>,

    /// Latest progress stage reported by the worker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,

    /// Terminal result, set exactly once.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,

    /// RFC 3339 creation timestamp.
    pub created_at: String,

    /// RFC 3339 last-update timestamp.
    pub last_updated_at: String,
}

impl TaskRecord {
    /// Creates a record in the mode's initial status: `Parked` submissions
    /// start `Parked`, everything else starts `Queued`.
    pub fn new(
        scope: TaskScope,
        mode: TaskMode,
        payload: TaskPayload,
        timeout_ms: u64,
        queue_timeout_ms: u64,
    ) -> Self {
        let now = Utc::now();
        let now_str = now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true);

        let status = match mode {
            TaskMode::Parked => TaskStatus::Parked,
            TaskMode::Sync | TaskMode::Async => TaskStatus::Queued,
        };

        // Saturate rather than panic on absurd caller-supplied bounds.
        let total_ms = timeout_ms.saturating_add(queue_timeout_ms);
        let expires_at = i64::try_from(total_ms)
            .ok()
            .and_then(Duration::try_milliseconds)
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            task_id: Uuid::new_v4().to_string(),
            mode,
            status,
            scope,
            capabilities: Vec::new(),
            selectors: Vec::new(),
            payload,
            timeout_ms,
            queue_timeout_ms,
            enqueued_at: now,
            expires_at,
            callback_token: None,
            stage: None,
            result: None,
            created_at: now_str.clone(),
            last_updated_at: now_str,
        }
    }

    /// Sets capability predicates.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Sets routing selectors.
    #[must_use]
    pub fn with_selectors(mut self, selectors: Vec<String>) -> Self {
        self.selectors = selectors;
        self
    }

    /// Binds the task to a registered callback token.
    #[must_use]
    pub fn with_callback_token(mut self, token: impl Into<String>) -> Self {
        self.callback_token = Some(token.into());
        self
    }

    /// Returns `true` once the advisory expiry has passed.
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Stamps `last_updated_at` with the current time.
    pub fn touch(&mut self) {
        self.last_updated_at = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
    }
}
