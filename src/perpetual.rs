//! Perpetual task service: CRUD for recurring polling assignments.
//!
//! The service owns [`PerpetualTaskRecord`] lifecycle and nothing else.
//! Assignment to workers and the poll cadence are an external scheduler's
//! job; consumers (notably the reconciliation consumer) hold task ids and
//! react to delivered reports.
//!
//! # Deduplication
//!
//! Non-duplicate tasks are indexed by the content fingerprint of their
//! (type, account, context) tuple. Creation with `allow_duplicate = false`
//! takes the fingerprint entry atomically, so two racing creates of the
//! same tuple resolve to one record.

use dashmap::DashMap;

use crate::domain::perpetual::{
    context_fingerprint, PerpetualTaskRecord, TaskContext, TaskSchedule,
};
use crate::error::{Error, Result};
use crate::store::backend::{make_key, make_prefix};
use crate::types::wire::{
    Ack, CreatePerpetualTaskRequest, CreatePerpetualTaskResponse, DeletePerpetualTaskRequest,
    Envelope, ResetPerpetualTaskRequest,
};

/// Durable store and CRUD surface for perpetual tasks.
///
/// Records are keyed by `{account_id}:{task_id}`; the secondary index
/// maps content fingerprints of non-duplicate tasks to their ids.
#[derive(Debug, Default)]
pub struct PerpetualTaskService {
    records: DashMap<String, PerpetualTaskRecord>,
    by_fingerprint: DashMap<String, String>,
}

impl PerpetualTaskService {
    /// Creates an empty service.
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            by_fingerprint: DashMap::new(),
        }
    }

    /// Creates a perpetual task, or returns the existing id when
    /// `allow_duplicate` is `false` and an equal (type, account, context)
    /// tuple already exists.
    pub fn create_task(
        &self,
        task_type: &str,
        account_id: &str,
        context: TaskContext,
        schedule: TaskSchedule,
        allow_duplicate: bool,
        description: Option<String>,
    ) -> Result<String> {
        if task_type.is_empty() {
            return Err(Error::validation("perpetual task type must not be empty"));
        }

        if allow_duplicate {
            let record = PerpetualTaskRecord::new(
                task_type,
                account_id,
                context,
                schedule,
                true,
                description,
            );
            let task_id = record.task_id.clone();
            self.records
                .insert(make_key(account_id, &task_id), record);
            tracing::debug!(%task_id, account_id, task_type, "perpetual task created");
            return Ok(task_id);
        }

        let fingerprint = context_fingerprint(task_type, account_id, &context);
        // Entry access is atomic per key: the first racer inserts, the
        // rest observe its id.
        let entry = self.by_fingerprint.entry(fingerprint).or_insert_with(|| {
            let record = PerpetualTaskRecord::new(
                task_type,
                account_id,
                context,
                schedule,
                false,
                description,
            );
            let task_id = record.task_id.clone();
            self.records
                .insert(make_key(account_id, &task_id), record);
            tracing::debug!(%task_id, account_id, task_type, "perpetual task created");
            task_id
        });
        Ok(entry.value().clone())
    }

    /// Deletes a task. Deleting an absent id is a no-op: cleanup often
    /// races with externally triggered deletes.
    pub fn delete_task(&self, account_id: &str, task_id: &str) {
        let Some((_, record)) = self.records.remove(&make_key(account_id, task_id)) else {
            tracing::debug!(task_id, account_id, "delete of absent perpetual task ignored");
            return;
        };
        if !record.allow_duplicate {
            let fingerprint = record.fingerprint();
            self.by_fingerprint
                .remove_if(&fingerprint, |_, id| id == task_id);
        }
        tracing::debug!(task_id, account_id, "perpetual task deleted");
    }

    /// Replaces a task's opaque context in place, preserving id,
    /// schedule, and assignment.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] on an unknown (account, id) pairing.
    pub fn reset_task(&self, account_id: &str, task_id: &str, bundle: Vec<u8>) -> Result<()> {
        let mut entry = self
            .records
            .get_mut(&make_key(account_id, task_id))
            .ok_or_else(|| Error::not_found("perpetual task", task_id))?;

        let record = entry.value_mut();
        let old_fingerprint = (!record.allow_duplicate).then(|| record.fingerprint());
        record.replace_context(bundle);

        // Keep the dedupe index pointing at the current context.
        if let Some(old) = old_fingerprint {
            self.by_fingerprint.remove_if(&old, |_, id| id == task_id);
            self.by_fingerprint
                .insert(record.fingerprint(), task_id.to_string());
        }
        tracing::debug!(task_id, account_id, "perpetual task context reset");
        Ok(())
    }

    /// Retrieves a task by (account, id).
    pub fn get_task(&self, account_id: &str, task_id: &str) -> Result<PerpetualTaskRecord> {
        self.records
            .get(&make_key(account_id, task_id))
            .map(|e| e.value().clone())
            .ok_or_else(|| Error::not_found("perpetual task", task_id))
    }

    /// All tasks under an account.
    pub fn list_tasks(&self, account_id: &str) -> Vec<PerpetualTaskRecord> {
        let prefix = make_prefix(account_id);
        self.records
            .iter()
            .filter(|e| e.key().starts_with(&prefix))
            .map(|e| e.value().clone())
            .collect()
    }

    /// Number of stored tasks, across accounts.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if no tasks are stored.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    // ---- Network boundary ----

    /// `CreatePerpetualTask` boundary handler.
    pub fn handle_create(
        &self,
        request: CreatePerpetualTaskRequest,
    ) -> Envelope<CreatePerpetualTaskResponse> {
        Envelope::from_result(
            self.create_task(
                &request.task_type,
                &request.account_id,
                request.context,
                request.schedule,
                request.allow_duplicate,
                request.description,
            )
            .map(|task_id| CreatePerpetualTaskResponse { task_id }),
        )
    }

    /// `DeletePerpetualTask` boundary handler.
    pub fn handle_delete(&self, request: DeletePerpetualTaskRequest) -> Envelope<Ack> {
        self.delete_task(&request.account_id, &request.task_id);
        Envelope::from_result(Ok(Ack::new()))
    }

    /// `ResetPerpetualTask` boundary handler.
    pub fn handle_reset(&self, request: ResetPerpetualTaskRequest) -> Envelope<Ack> {
        Envelope::from_result(
            self.reset_task(&request.account_id, &request.task_id, request.bundle)
                .map(|()| Ack::new()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn schedule() -> TaskSchedule {
        TaskSchedule {
            interval_ms: 600_000,
            timeout_ms: 120_000,
        }
    }

    fn params(pairs: &[(&str, &str)]) -> TaskContext {
        TaskContext::Params(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    #[test]
    fn non_duplicate_creation_collapses() {
        let service = PerpetualTaskService::new();
        let ctx = params(&[("cluster", "east")]);

        let first = service
            .create_task("instance-sync", "acct-1", ctx.clone(), schedule(), false, None)
            .unwrap();
        let second = service
            .create_task("instance-sync", "acct-1", ctx, schedule(), false, None)
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(service.len(), 1);
    }

    #[test]
    fn allow_duplicate_creates_distinct_ids() {
        let service = PerpetualTaskService::new();
        let ctx = params(&[("cluster", "east")]);

        let first = service
            .create_task("instance-sync", "acct-1", ctx.clone(), schedule(), true, None)
            .unwrap();
        let second = service
            .create_task("instance-sync", "acct-1", ctx, schedule(), true, None)
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(service.len(), 2);
    }

    #[test]
    fn equal_context_different_account_is_distinct() {
        let service = PerpetualTaskService::new();
        let ctx = params(&[("cluster", "east")]);

        let first = service
            .create_task("instance-sync", "acct-1", ctx.clone(), schedule(), false, None)
            .unwrap();
        let second = service
            .create_task("instance-sync", "acct-2", ctx, schedule(), false, None)
            .unwrap();

        assert_ne!(first, second);
    }

    #[test]
    fn delete_is_idempotent() {
        let service = PerpetualTaskService::new();
        let id = service
            .create_task("instance-sync", "acct-1", params(&[]), schedule(), false, None)
            .unwrap();

        service.delete_task("acct-1", &id);
        service.delete_task("acct-1", &id);
        assert!(service.is_empty());

        // The fingerprint slot is free again.
        let recreated = service
            .create_task("instance-sync", "acct-1", params(&[]), schedule(), false, None)
            .unwrap();
        assert_ne!(recreated, id);
    }

    #[test]
    fn reset_replaces_context_and_reindexes() {
        let service = PerpetualTaskService::new();
        let id = service
            .create_task(
                "instance-sync",
                "acct-1",
                params(&[("cluster", "east")]),
                schedule(),
                false,
                None,
            )
            .unwrap();

        service.reset_task("acct-1", &id, vec![1, 2, 3]).unwrap();

        let record = service.get_task("acct-1", &id).unwrap();
        assert_eq!(record.context, TaskContext::Bundle(vec![1, 2, 3]));

        // The old tuple no longer collapses onto this task...
        let fresh = service
            .create_task(
                "instance-sync",
                "acct-1",
                params(&[("cluster", "east")]),
                schedule(),
                false,
                None,
            )
            .unwrap();
        assert_ne!(fresh, id);

        // ...but the new bundle does.
        let same = service
            .create_task(
                "instance-sync",
                "acct-1",
                TaskContext::Bundle(vec![1, 2, 3]),
                schedule(),
                false,
                None,
            )
            .unwrap();
        assert_eq!(same, id);
    }

    #[test]
    fn reset_unknown_task_is_not_found() {
        let service = PerpetualTaskService::new();
        let err = service.reset_task("acct-1", "nope", vec![]).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn wrong_account_cannot_reach_task() {
        let service = PerpetualTaskService::new();
        let id = service
            .create_task("instance-sync", "acct-1", params(&[]), schedule(), false, None)
            .unwrap();

        assert!(service.get_task("acct-2", &id).is_err());
        service.delete_task("acct-2", &id);
        assert_eq!(service.len(), 1, "delete under wrong account is a no-op");
    }
}
