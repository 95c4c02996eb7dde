//! Task registry: trait, generic implementation, and the two backends.
//!
//! # Architecture
//!
//! Three layers, mirroring the split between policy and storage:
//!
//! 1. **[`TaskRegistry`]** -- type-erasure interface the
//!    [`DispatchGateway`](crate::gateway::DispatchGateway) holds as
//!    `Arc<dyn TaskRegistry>`.
//! 2. **[`GenericTaskRegistry<B>`](generic::GenericTaskRegistry)** -- all
//!    domain logic (status machine, scope isolation, idempotent results,
//!    CAS mutations, expiry sweep).
//! 3. **[`RegistryBackend`]** -- dumb KV trait with two implementations:
//!    the modern [`InMemoryBackend`](memory::InMemoryBackend) and the
//!    [`LegacyBackend`](legacy::LegacyBackend) that reproduces the old
//!    path's coarse-locked storage.
//!
//! The historical modern and legacy dispatch paths shared global state;
//! here they are two owned backends behind one trait, selected by
//! [`RegistryEra`] at gateway construction, with no shared mutable
//! globals.

pub mod backend;
pub mod generic;
pub mod legacy;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;

pub use backend::{make_key, make_prefix, parse_key, BackendError, RegistryBackend, VersionedRecord};

use crate::domain::record::TaskRecord;
use crate::error::Result;
use crate::types::task::TaskResult;

/// Which dispatch-path storage era a gateway runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryEra {
    /// Sharded in-memory store (current path).
    Modern,
    /// Coarse-locked map matching the historical path.
    Legacy,
}

/// Outcome of recording a terminal result.
#[derive(Debug, Clone)]
pub enum ResultDisposition {
    /// The result was applied and the task transitioned to its terminal
    /// status; completion should be delivered exactly once.
    Applied(TaskRecord),
    /// The task was already terminal; the stored result and status were
    /// left untouched and nothing should be delivered.
    AlreadyTerminal(TaskRecord),
}

/// Type-erasure interface for task storage.
///
/// All operations are account-scoped: an id that exists under a different
/// account is indistinguishable from one that does not exist.
#[async_trait]
pub trait TaskRegistry: Send + Sync {
    /// Persists a freshly built record.
    async fn create(&self, record: TaskRecord) -> Result<()>;

    /// Retrieves a task by id, scoped to the account.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`](crate::error::Error::NotFound) on unknown id
    ///   or account mismatch.
    async fn get(&self, account_id: &str, task_id: &str) -> Result<TaskRecord>;

    /// Releases a parked task into the queue (`Parked -> Queued`).
    async fn release_parked(&self, account_id: &str, task_id: &str) -> Result<TaskRecord>;

    /// Marks a queued task as claimed (`Queued -> Started`). Called by the
    /// worker-pool integration when a delegate acquires the task.
    async fn mark_started(&self, account_id: &str, task_id: &str) -> Result<TaskRecord>;

    /// Records a terminal result.
    ///
    /// Idempotent under at-least-once delivery: a repeat for an already
    /// terminal task returns [`ResultDisposition::AlreadyTerminal`] and
    /// changes nothing.
    async fn record_result(
        &self,
        account_id: &str,
        task_id: &str,
        result: TaskResult,
    ) -> Result<ResultDisposition>;

    /// Records a progress stage. Never changes status; progress arriving
    /// after a terminal status is dropped.
    async fn record_stage(&self, account_id: &str, task_id: &str, stage: &str)
        -> Result<TaskRecord>;

    /// Advisory abort: transitions to `Aborted` and stores an aborted
    /// result unless the task is already terminal, in which case the
    /// record is returned unchanged as `AlreadyTerminal`.
    async fn abort(&self, account_id: &str, task_id: &str) -> Result<ResultDisposition>;

    /// All records under an account.
    async fn list_by_account(&self, account_id: &str) -> Result<Vec<TaskRecord>>;

    /// Removes records whose advisory expiry has passed. Returns the
    /// number removed.
    async fn cleanup_expired(&self) -> Result<usize>;
}

/// Builds the registry for the requested era.
///
/// # Examples
///
/// ```
/// use taskmesh::store::{registry_for, RegistryEra};
///
/// let modern = registry_for(RegistryEra::Modern);
/// let legacy = registry_for(RegistryEra::Legacy);
/// ```
pub fn registry_for(era: RegistryEra) -> Arc<dyn TaskRegistry> {
    match era {
        RegistryEra::Modern => Arc::new(generic::GenericTaskRegistry::new(
            memory::InMemoryBackend::new(),
        )),
        RegistryEra::Legacy => Arc::new(generic::GenericTaskRegistry::new(
            legacy::LegacyBackend::new(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::{TaskPayload, TaskScope};
    use crate::error::Error;
    use crate::types::task::{TaskMode, TaskStatus};
    use serde_json::json;

    fn record(account: &str, mode: TaskMode) -> TaskRecord {
        TaskRecord::new(
            TaskScope::account(account),
            mode,
            TaskPayload {
                kind: "shell-script".to_string(),
                data: json!({}),
            },
            600_000,
            60_000,
        )
    }

    async fn exercise_registry(registry: Arc<dyn TaskRegistry>) {
        let task = record("acct-1", TaskMode::Parked);
        let id = task.task_id.clone();
        registry.create(task).await.unwrap();

        // Wrong account is indistinguishable from missing.
        let err = registry.get("acct-2", &id).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));

        let released = registry.release_parked("acct-1", &id).await.unwrap();
        assert_eq!(released.status, TaskStatus::Queued);

        let started = registry.mark_started("acct-1", &id).await.unwrap();
        assert_eq!(started.status, TaskStatus::Started);

        let first = registry
            .record_result("acct-1", &id, TaskResult::success(json!({"n": 1})))
            .await
            .unwrap();
        assert!(matches!(first, ResultDisposition::Applied(_)));

        // Second delivery is a silent no-op.
        let second = registry
            .record_result("acct-1", &id, TaskResult::failure("late retry"))
            .await
            .unwrap();
        let ResultDisposition::AlreadyTerminal(stored) = second else {
            panic!("repeat delivery must not re-apply");
        };
        assert_eq!(stored.status, TaskStatus::Completed);
        assert_eq!(stored.result.unwrap(), TaskResult::success(json!({"n": 1})));
    }

    #[tokio::test]
    async fn modern_registry_lifecycle() {
        exercise_registry(registry_for(RegistryEra::Modern)).await;
    }

    #[tokio::test]
    async fn legacy_registry_lifecycle() {
        exercise_registry(registry_for(RegistryEra::Legacy)).await;
    }

    #[tokio::test]
    async fn abort_is_advisory_and_idempotent() {
        let registry = registry_for(RegistryEra::Modern);
        let task = record("acct-1", TaskMode::Async);
        let id = task.task_id.clone();
        registry.create(task).await.unwrap();

        let ResultDisposition::Applied(aborted) = registry.abort("acct-1", &id).await.unwrap()
        else {
            panic!("first abort must apply");
        };
        assert_eq!(aborted.status, TaskStatus::Aborted);

        let ResultDisposition::AlreadyTerminal(again) =
            registry.abort("acct-1", &id).await.unwrap()
        else {
            panic!("second abort must be a no-op");
        };
        assert_eq!(again.status, TaskStatus::Aborted);
    }

    #[tokio::test]
    async fn stage_updates_never_touch_status() {
        let registry = registry_for(RegistryEra::Modern);
        let task = record("acct-1", TaskMode::Async);
        let id = task.task_id.clone();
        registry.create(task).await.unwrap();

        let updated = registry
            .record_stage("acct-1", &id, "downloading artifacts")
            .await
            .unwrap();
        assert_eq!(updated.status, TaskStatus::Queued);
        assert_eq!(updated.stage.as_deref(), Some("downloading artifacts"));

        registry.abort("acct-1", &id).await.unwrap();
        let late = registry
            .record_stage("acct-1", &id, "still going")
            .await
            .unwrap();
        assert_eq!(late.status, TaskStatus::Aborted);
        assert_eq!(late.stage.as_deref(), Some("downloading artifacts"));
    }
}
