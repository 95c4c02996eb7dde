//! Core task types: routing mode, lifecycle status, and terminal results.
//!
//! # State Machine
//!
//! A task's status only ever moves forward:
//!
//! ```text
//! Parked  -> Queued, Aborted
//! Queued  -> Started, Completed, Failed, Aborted
//! Started -> Completed, Failed, Aborted
//! Completed / Failed / Aborted -> (terminal, no transitions)
//! ```
//!
//! `Queued -> Completed/Failed` covers workers that deliver a terminal
//! result without an intervening start notification. `Parked -> Aborted`
//! covers cancellation of a task that was never released. Terminal states
//! reject every transition; self-transitions are rejected.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::Error;

/// How a submission is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskMode {
    /// The submitter blocks until a result arrives or its bound elapses.
    Sync,
    /// The submission returns immediately; completion is delivered through
    /// a registered callback sink or polled.
    Async,
    /// Stored but not enqueued until explicitly released.
    Parked,
}

impl fmt::Display for TaskMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync => write!(f, "sync"),
            Self::Async => write!(f, "async"),
            Self::Parked => write!(f, "parked"),
        }
    }
}

/// Task lifecycle status.
///
/// # Examples
///
/// ```
/// use taskmesh::types::task::TaskStatus;
///
/// assert!(TaskStatus::Parked.can_transition_to(TaskStatus::Queued));
/// assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Queued));
/// assert!(!TaskStatus::Queued.can_transition_to(TaskStatus::Queued));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Stored, awaiting explicit release. No worker assignment.
    Parked,
    /// Eligible for worker claim.
    Queued,
    /// A worker has claimed the task and begun execution.
    Started,
    /// Worker reported success (terminal).
    Completed,
    /// Worker reported failure (terminal).
    Failed,
    /// Cancelled before completion (terminal, advisory).
    Aborted,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parked => write!(f, "parked"),
            Self::Queued => write!(f, "queued"),
            Self::Started => write!(f, "started"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

impl TaskStatus {
    /// Returns `true` for `Completed`, `Failed`, and `Aborted`.
    ///
    /// # Examples
    ///
    /// ```
    /// use taskmesh::types::task::TaskStatus;
    ///
    /// assert!(!TaskStatus::Started.is_terminal());
    /// assert!(TaskStatus::Aborted.is_terminal());
    /// ```
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Aborted)
    }

    /// Returns `true` if moving from this status to `next` is a valid
    /// forward transition.
    pub fn can_transition_to(&self, next: Self) -> bool {
        if *self == next {
            return false;
        }

        match self {
            Self::Parked => matches!(next, Self::Queued | Self::Aborted),
            Self::Queued => matches!(
                next,
                Self::Started | Self::Completed | Self::Failed | Self::Aborted
            ),
            Self::Started => matches!(next, Self::Completed | Self::Failed | Self::Aborted),
            Self::Completed | Self::Failed | Self::Aborted => false,
        }
    }

    /// Validates a transition, returning [`Error::InvalidTransition`] with
    /// context on rejection.
    pub fn validate_transition(&self, task_id: &str, next: Self) -> Result<(), Error> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                task_id: task_id.to_string(),
                from: *self,
                to: next,
            })
        }
    }
}

/// Terminal outcome reported by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    /// The work finished successfully.
    Success,
    /// The worker reported an execution failure.
    Failure,
    /// The worker observed the advisory cancellation and stopped.
    Aborted,
}

/// Terminal result delivered by a worker via `SendTaskStatus`.
///
/// # Examples
///
/// ```
/// use taskmesh::types::task::{TaskResult, TaskStatus};
/// use serde_json::json;
///
/// let result = TaskResult::success(json!({"artifacts": 3}));
/// assert_eq!(result.terminal_status(), TaskStatus::Completed);
///
/// let result = TaskResult::failure("image pull failed");
/// assert_eq!(result.terminal_status(), TaskStatus::Failed);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    /// The terminal outcome.
    pub outcome: TaskOutcome,

    /// Worker-supplied payload for successful runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Worker-supplied failure detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl TaskResult {
    /// A successful result carrying `data`.
    pub fn success(data: Value) -> Self {
        Self {
            outcome: TaskOutcome::Success,
            data: Some(data),
            error_message: None,
        }
    }

    /// A failure result carrying `message`.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            outcome: TaskOutcome::Failure,
            data: None,
            error_message: Some(message.into()),
        }
    }

    /// An aborted result with no payload.
    pub fn aborted() -> Self {
        Self {
            outcome: TaskOutcome::Aborted,
            data: None,
            error_message: None,
        }
    }

    /// The status this result drives the task into.
    pub fn terminal_status(&self) -> TaskStatus {
        match self.outcome {
            TaskOutcome::Success => TaskStatus::Completed,
            TaskOutcome::Failure => TaskStatus::Failed,
            TaskOutcome::Aborted => TaskStatus::Aborted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [TaskStatus; 6] = [
        TaskStatus::Parked,
        TaskStatus::Queued,
        TaskStatus::Started,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Aborted,
    ];

    #[test]
    fn display_matches_serde() {
        for status in ALL {
            let json = serde_json::to_value(status).unwrap();
            assert_eq!(json, status.to_string());
        }
    }

    #[test]
    fn terminal_set() {
        assert!(!TaskStatus::Parked.is_terminal());
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Started.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Aborted.is_terminal());
    }

    #[test]
    fn parked_releases_forward_only() {
        assert!(TaskStatus::Parked.can_transition_to(TaskStatus::Queued));
        assert!(TaskStatus::Parked.can_transition_to(TaskStatus::Aborted));
        assert!(!TaskStatus::Parked.can_transition_to(TaskStatus::Started));
        assert!(!TaskStatus::Parked.can_transition_to(TaskStatus::Completed));
    }

    #[test]
    fn queued_may_skip_started() {
        assert!(TaskStatus::Queued.can_transition_to(TaskStatus::Started));
        assert!(TaskStatus::Queued.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Queued.can_transition_to(TaskStatus::Failed));
        assert!(TaskStatus::Queued.can_transition_to(TaskStatus::Aborted));
        assert!(!TaskStatus::Queued.can_transition_to(TaskStatus::Parked));
    }

    #[test]
    fn terminal_states_reject_everything() {
        for terminal in [TaskStatus::Completed, TaskStatus::Failed, TaskStatus::Aborted] {
            for target in ALL {
                assert!(
                    !terminal.can_transition_to(target),
                    "{terminal} must not transition to {target}"
                );
            }
        }
    }

    #[test]
    fn self_transitions_rejected() {
        for status in ALL {
            assert!(!status.can_transition_to(status));
        }
    }

    #[test]
    fn validate_transition_error_context() {
        let err = TaskStatus::Completed
            .validate_transition("task-7", TaskStatus::Queued)
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("task-7"));
        assert!(msg.contains("completed"));
        assert!(msg.contains("queued"));
    }

    #[test]
    fn result_terminal_status() {
        assert_eq!(
            TaskResult::success(serde_json::json!({})).terminal_status(),
            TaskStatus::Completed
        );
        assert_eq!(
            TaskResult::failure("x").terminal_status(),
            TaskStatus::Failed
        );
        assert_eq!(TaskResult::aborted().terminal_status(), TaskStatus::Aborted);
    }

    #[test]
    fn result_serializes_camel_case() {
        let result = TaskResult::failure("no route to worker");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["outcome"], "failure");
        assert_eq!(json["errorMessage"], "no route to worker");
        assert!(json.get("data").is_none());
    }
}
