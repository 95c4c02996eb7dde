//! Wire types for the network operations.
//!
//! One request/response pair per operation, `camelCase` on the wire.
//! Every response is either the typed result or an [`ErrorResponse`]
//! carrying a machine-readable [`ErrorKind`]; [`Envelope`] is the
//! boundary-level sum of the two. Conversion happens exactly once, at the
//! boundary -- no internal error type crosses it, and internal faults are
//! logged there and genericized.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::callback::SinkDescriptor;
use crate::domain::perpetual::{TaskContext, TaskSchedule};
use crate::domain::record::{TaskPayload, TaskScope};
use crate::error::{Error, ErrorKind, Result};
use crate::types::task::{TaskMode, TaskResult, TaskStatus};

/// Structured error carried by every failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Machine-readable kind.
    pub kind: ErrorKind,

    /// Human-readable detail. Internal faults are genericized.
    pub message: String,
}

impl From<&Error> for ErrorResponse {
    fn from(err: &Error) -> Self {
        let kind = err.kind();
        let message = match err {
            Error::Internal(detail) => {
                // Full context stays in the log; the caller gets a
                // generic boundary error.
                tracing::error!(%detail, "internal error at network boundary");
                "internal error".to_string()
            },
            other => other.to_string(),
        };
        Self { kind, message }
    }
}

/// Boundary-level response: a typed result or a structured error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum Envelope<T> {
    /// The operation succeeded.
    Ok {
        /// The typed result.
        result: T,
    },
    /// The operation failed.
    Error {
        /// The structured error.
        error: ErrorResponse,
    },
}

impl<T> Envelope<T> {
    /// Converts an internal result at the network boundary.
    pub fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(value) => Self::Ok { result: value },
            Err(err) => Self::Error {
                error: ErrorResponse::from(&err),
            },
        }
    }

    /// The success payload, if this is `Ok`.
    pub fn ok(self) -> Option<T> {
        match self {
            Self::Ok { result } => Some(result),
            Self::Error { .. } => None,
        }
    }

    /// The error payload, if this is `Error`.
    pub fn err(self) -> Option<ErrorResponse> {
        match self {
            Self::Ok { .. } => None,
            Self::Error { error } => Some(error),
        }
    }
}

// ---- Dispatch operations ----

/// `SubmitTask` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitTaskRequest {
    /// Owning scope of the task.
    pub scope: TaskScope,

    /// Routing mode.
    pub mode: TaskMode,

    /// Capability predicates for the worker matcher.
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Routing selectors.
    #[serde(default)]
    pub selectors: Vec<String>,

    /// Opaque typed payload.
    pub payload: TaskPayload,

    /// Execution bound; the gateway default applies when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Queue-residency bound; the gateway default applies when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_timeout_ms: Option<u64>,

    /// Callback token for async completion. Rejected on sync submissions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_token: Option<String>,
}

/// `SubmitTask` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitTaskResponse {
    /// Id of the accepted task.
    pub task_id: String,

    /// Advisory total expiry (enqueue time plus queue and execution
    /// bounds). Informational only.
    pub total_expiry: DateTime<Utc>,

    /// The terminal result, present only for sync submissions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
}

/// `ExecuteParkedTask` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteParkedTaskRequest {
    /// Owning account.
    pub account_id: String,
    /// The parked task to release.
    pub task_id: String,
}

/// `ExecuteParkedTask` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteParkedTaskResponse {
    /// The released task.
    pub task_id: String,
    /// Status after release (always `queued`).
    pub status: TaskStatus,
}

/// `FetchParkedTaskStatus` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchParkedTaskStatusRequest {
    /// Owning account.
    pub account_id: String,
    /// The task to inspect.
    pub task_id: String,
    /// Token proving the caller registered the task's driver.
    pub callback_token: String,
}

/// `FetchParkedTaskStatus` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum ParkedTaskStatus {
    /// The task reached a terminal status; here is its result.
    Ready {
        /// The stored terminal result.
        result: TaskResult,
    },
    /// Still in flight; poll again later.
    NotReady,
}

/// `SendTaskStatus` request (terminal result delivery from a worker).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTaskStatusRequest {
    /// Owning account.
    pub account_id: String,
    /// The finished task.
    pub task_id: String,
    /// Terminal result.
    pub result: TaskResult,
}

/// `SendTaskProgress` request (non-terminal stage update from a worker).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTaskProgressRequest {
    /// Owning account.
    pub account_id: String,
    /// The running task.
    pub task_id: String,
    /// Current execution stage.
    pub stage: String,
}

/// Generic acknowledgement for fire-and-forget operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    /// Always `true`; failures surface as [`ErrorResponse`] instead.
    pub acknowledged: bool,
}

impl Ack {
    pub(crate) fn new() -> Self {
        Self { acknowledged: true }
    }
}

/// `CancelTask` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelTaskRequest {
    /// Owning account.
    pub account_id: String,
    /// The task to cancel.
    pub task_id: String,
}

/// `CancelTask` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelTaskResponse {
    /// Status after the advisory abort.
    pub status: TaskStatus,
    /// The stage the task was at when cancelled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
}

/// `TaskProgress` request (read-only stage query).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgressRequest {
    /// Owning account.
    pub account_id: String,
    /// The task to inspect.
    pub task_id: String,
}

/// `TaskProgress` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgressResponse {
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Latest reported stage, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
}

/// `RegisterCallback` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterCallbackRequest {
    /// The sink to register.
    pub descriptor: SinkDescriptor,
}

/// `RegisterCallback` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterCallbackResponse {
    /// Content-addressed token to attach to submissions.
    pub token: String,
}

// ---- Perpetual task operations ----

/// `CreatePerpetualTask` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePerpetualTaskRequest {
    /// Owning account.
    pub account_id: String,
    /// Worker-side executor discriminator.
    pub task_type: String,
    /// Client context (exactly one variant).
    pub context: TaskContext,
    /// Recurrence schedule.
    pub schedule: TaskSchedule,
    /// Whether equal (type, account, context) tuples may coexist.
    #[serde(default)]
    pub allow_duplicate: bool,
    /// Optional description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// `CreatePerpetualTask` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePerpetualTaskResponse {
    /// Id of the created -- or deduplicated existing -- task.
    pub task_id: String,
}

/// `DeletePerpetualTask` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletePerpetualTaskRequest {
    /// Owning account.
    pub account_id: String,
    /// The task to delete; absent ids are acknowledged anyway.
    pub task_id: String,
}

/// `ResetPerpetualTask` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPerpetualTaskRequest {
    /// Owning account.
    pub account_id: String,
    /// The task whose context is replaced.
    pub task_id: String,
    /// The replacement execution bundle.
    pub bundle: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_ok_shape() {
        let envelope = Envelope::from_result(Ok(Ack::new()));
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["result"]["acknowledged"], true);
    }

    #[test]
    fn envelope_error_shape() {
        let envelope: Envelope<Ack> =
            Envelope::from_result(Err(Error::not_found("task", "t-1")));
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"]["kind"], "not_found");
        assert!(json["error"]["message"]
            .as_str()
            .unwrap()
            .contains("t-1"));
    }

    #[test]
    fn internal_detail_is_withheld() {
        let response = ErrorResponse::from(&Error::internal("stack trace and secrets"));
        assert_eq!(response.kind, ErrorKind::Internal);
        assert_eq!(response.message, "internal error");
    }

    #[test]
    fn non_internal_messages_pass_through() {
        let response = ErrorResponse::from(&Error::validation("mode must be set"));
        assert_eq!(response.kind, ErrorKind::Internal);
        assert!(response.message.contains("mode must be set"));

        let response = ErrorResponse::from(&Error::unsupported("provider kind: mainframe"));
        assert_eq!(response.kind, ErrorKind::UnsupportedOperation);
        assert!(response.message.contains("mainframe"));
    }

    #[test]
    fn parked_status_tagged_serialization() {
        let ready = ParkedTaskStatus::Ready {
            result: TaskResult::success(json!({"exit": 0})),
        };
        let json = serde_json::to_value(&ready).unwrap();
        assert_eq!(json["state"], "ready");
        assert_eq!(json["result"]["outcome"], "success");

        let not_ready = serde_json::to_value(ParkedTaskStatus::NotReady).unwrap();
        assert_eq!(not_ready["state"], "not_ready");
    }

    #[test]
    fn submit_request_defaults() {
        let request: SubmitTaskRequest = serde_json::from_value(json!({
            "scope": {"accountId": "acct-1"},
            "mode": "async",
            "payload": {"kind": "http-probe", "data": {}}
        }))
        .unwrap();
        assert!(request.capabilities.is_empty());
        assert!(request.selectors.is_empty());
        assert!(request.timeout_ms.is_none());
        assert!(request.callback_token.is_none());
    }
}
