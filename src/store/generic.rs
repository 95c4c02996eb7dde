//! Generic task registry with all domain logic delegating to a
//! [`RegistryBackend`].
//!
//! [`GenericTaskRegistry`] implements every registry operation (status
//! transitions, account scoping, idempotent result recording, advisory
//! abort, stage updates, expiry sweep) on top of any backend. Backends
//! remain dumb key-value stores.
//!
//! # CAS Semantics
//!
//! Mutations use a read-validate-write loop over
//! [`put_if_version`](RegistryBackend::put_if_version). A version conflict
//! means another worker's update landed between our read and write, so the
//! whole loop re-runs against fresh state; this is what makes
//! [`record_result`](GenericTaskRegistry::record_result) idempotent under
//! concurrent at-least-once delivery. The loop is bounded; persistent
//! contention surfaces as a transient error.
//!
//! # Scope Isolation
//!
//! Account mismatch on any operation returns `NotFound` -- the registry
//! never reveals that a task exists under a different account.

use async_trait::async_trait;

use crate::domain::record::TaskRecord;
use crate::error::{Error, Result};
use crate::store::backend::{make_key, make_prefix, BackendError, RegistryBackend};
use crate::store::{ResultDisposition, TaskRegistry};
use crate::types::task::{TaskResult, TaskStatus};

/// Bound on read-validate-write retries under version conflict.
const CAS_ATTEMPTS: u32 = 5;

/// Generic task registry delegating storage to a [`RegistryBackend`].
#[derive(Debug)]
pub struct GenericTaskRegistry<B: RegistryBackend> {
    backend: B,
}

impl<B: RegistryBackend> GenericTaskRegistry<B> {
    /// Creates a registry over the given backend.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    fn serialize(record: &TaskRecord) -> Result<Vec<u8>> {
        serde_json::to_vec(record)
            .map_err(|e| Error::internal(format!("failed to serialize task record: {e}")))
    }

    fn deserialize(data: &[u8]) -> Result<TaskRecord> {
        serde_json::from_slice(data)
            .map_err(|e| Error::internal(format!("failed to deserialize task record: {e}")))
    }

    fn map_backend_error(err: BackendError, task_id: &str) -> Error {
        match err {
            BackendError::NotFound { .. } => Error::not_found("task", task_id),
            BackendError::VersionConflict { key, .. } => {
                Error::transient(format!("concurrent modification on {key}"))
            },
            BackendError::Backend(message) => Error::internal(message),
        }
    }

    async fn load(&self, account_id: &str, task_id: &str) -> Result<(TaskRecord, u64)> {
        let key = make_key(account_id, task_id);
        let versioned = self
            .backend
            .get(&key)
            .await
            .map_err(|e| Self::map_backend_error(e, task_id))?;
        let record = Self::deserialize(&versioned.data)?;

        // Defense in depth: verify the account even though the key is scoped.
        if record.scope.account_id != account_id {
            tracing::warn!(
                task_id,
                expected_account = account_id,
                actual_account = %record.scope.account_id,
                "account mismatch on task load (returning NotFound)"
            );
            return Err(Error::not_found("task", task_id));
        }

        Ok((record, versioned.version))
    }

    /// Read-validate-write loop. `apply` inspects the fresh record and
    /// either short-circuits with a final value or mutates the record for
    /// a CAS write.
    async fn mutate<T>(
        &self,
        account_id: &str,
        task_id: &str,
        mut apply: impl FnMut(&mut TaskRecord) -> Result<MutateStep<T>>,
    ) -> Result<T>
    where
        T: From<TaskRecord>,
    {
        let key = make_key(account_id, task_id);
        for _ in 0..CAS_ATTEMPTS {
            let (mut record, version) = self.load(account_id, task_id).await?;
            match apply(&mut record)? {
                MutateStep::Done(value) => return Ok(value),
                MutateStep::Write => {},
            }
            record.touch();
            let bytes = Self::serialize(&record)?;
            match self.backend.put_if_version(&key, &bytes, version).await {
                Ok(_) => return Ok(T::from(record)),
                Err(BackendError::VersionConflict { .. }) => continue,
                Err(e) => return Err(Self::map_backend_error(e, task_id)),
            }
        }
        Err(Error::transient(format!(
            "task {task_id} contended beyond {CAS_ATTEMPTS} attempts"
        )))
    }
}

enum MutateStep<T> {
    /// Short-circuit without writing.
    Done(T),
    /// Persist the mutated record via CAS.
    Write,
}

#[async_trait]
impl<B: RegistryBackend + 'static> TaskRegistry for GenericTaskRegistry<B> {
    async fn create(&self, record: TaskRecord) -> Result<()> {
        let key = make_key(&record.scope.account_id, &record.task_id);
        let bytes = Self::serialize(&record)?;
        self.backend
            .put(&key, &bytes)
            .await
            .map_err(|e| Self::map_backend_error(e, &record.task_id))?;
        tracing::debug!(
            task_id = %record.task_id,
            account_id = %record.scope.account_id,
            mode = %record.mode,
            "task record created"
        );
        Ok(())
    }

    async fn get(&self, account_id: &str, task_id: &str) -> Result<TaskRecord> {
        let (record, _) = self.load(account_id, task_id).await?;
        Ok(record)
    }

    async fn release_parked(&self, account_id: &str, task_id: &str) -> Result<TaskRecord> {
        self.mutate(account_id, task_id, |record| {
            record
                .status
                .validate_transition(&record.task_id, TaskStatus::Queued)?;
            record.status = TaskStatus::Queued;
            Ok(MutateStep::Write)
        })
        .await
    }

    async fn mark_started(&self, account_id: &str, task_id: &str) -> Result<TaskRecord> {
        self.mutate(account_id, task_id, |record| {
            record
                .status
                .validate_transition(&record.task_id, TaskStatus::Started)?;
            record.status = TaskStatus::Started;
            Ok(MutateStep::Write)
        })
        .await
    }

    async fn record_result(
        &self,
        account_id: &str,
        task_id: &str,
        result: TaskResult,
    ) -> Result<ResultDisposition> {
        self.mutate(account_id, task_id, |record| {
            if record.status.is_terminal() {
                // At-least-once worker retry: leave the stored result
                // and status untouched.
                return Ok(MutateStep::Done(ResultDisposition::AlreadyTerminal(
                    record.clone(),
                )));
            }
            let next = result.terminal_status();
            record.status.validate_transition(&record.task_id, next)?;
            record.status = next;
            record.result = Some(result.clone());
            Ok(MutateStep::Write)
        })
        .await
    }

    async fn record_stage(&self, account_id: &str, task_id: &str, stage: &str) -> Result<TaskRecord> {
        self.mutate(account_id, task_id, |record| {
            if record.status.is_terminal() {
                // Progress never changes status; late progress for a
                // finished task is dropped.
                return Ok(MutateStep::Done(record.clone()));
            }
            record.stage = Some(stage.to_string());
            Ok(MutateStep::Write)
        })
        .await
    }

    async fn abort(&self, account_id: &str, task_id: &str) -> Result<ResultDisposition> {
        self.mutate(account_id, task_id, |record| {
            if record.status.is_terminal() {
                return Ok(MutateStep::Done(ResultDisposition::AlreadyTerminal(
                    record.clone(),
                )));
            }
            record
                .status
                .validate_transition(&record.task_id, TaskStatus::Aborted)?;
            record.status = TaskStatus::Aborted;
            record.result = Some(TaskResult::aborted());
            Ok(MutateStep::Write)
        })
        .await
    }

    async fn list_by_account(&self, account_id: &str) -> Result<Vec<TaskRecord>> {
        let entries = self
            .backend
            .list_by_prefix(&make_prefix(account_id))
            .await
            .map_err(|e| Self::map_backend_error(e, ""))?;
        entries
            .iter()
            .map(|(_, versioned)| Self::deserialize(&versioned.data))
            .collect()
    }

    async fn cleanup_expired(&self) -> Result<usize> {
        let entries = self
            .backend
            .list_by_prefix("")
            .await
            .map_err(|e| Self::map_backend_error(e, ""))?;
        let mut removed = 0;
        for (key, versioned) in entries {
            let Ok(record) = Self::deserialize(&versioned.data) else {
                continue;
            };
            if record.is_expired()
                && self
                    .backend
                    .delete(&key)
                    .await
                    .map_err(|e| Self::map_backend_error(e, &record.task_id))?
            {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl From<TaskRecord> for ResultDisposition {
    fn from(record: TaskRecord) -> Self {
        Self::Applied(record)
    }
}
