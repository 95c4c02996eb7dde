//! Dispatch gateway: the network-facing entry point for task submission,
//! worker status reporting, and completion resolution.
//!
//! # Routing
//!
//! A submission becomes a [`TaskRecord`] and routes by mode:
//!
//! - `Parked` -- stored only; released later via `execute_parked`.
//! - `Async` -- enqueued; the call returns immediately and completion is
//!   delivered through the registered callback sink or polled.
//! - `Sync` -- enqueued; the call parks the caller on a oneshot channel
//!   until a worker delivers a result or the task's bound elapses, in
//!   which case it resolves as a timeout failure. It never hangs.
//!
//! # Completion paths
//!
//! A task has at most one active completion path -- a registered callback
//! token or a blocked synchronous caller, never both. The registry's
//! idempotent [`record_result`](crate::store::TaskRegistry::record_result)
//! decides whether a delivery is the first one; only the first triggers
//! sink delivery or waiter wake-up, so at-least-once worker retries
//! deliver exactly once.
//!
//! # Boundary
//!
//! The `handle_*` methods are the network boundary: each converts its
//! internal result into an [`Envelope`], so no internal error type ever
//! crosses the wire.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::time::{timeout, Duration};

use crate::callback::CallbackRegistry;
use crate::config::DispatchConfig;
use crate::domain::record::TaskRecord;
use crate::error::{Error, Result};
use crate::store::{registry_for, RegistryEra, ResultDisposition, TaskRegistry};
use crate::types::task::{TaskMode, TaskResult, TaskStatus};
use crate::types::wire::{
    Ack, CancelTaskRequest, CancelTaskResponse, Envelope, ExecuteParkedTaskRequest,
    ExecuteParkedTaskResponse, FetchParkedTaskStatusRequest, ParkedTaskStatus,
    RegisterCallbackRequest, RegisterCallbackResponse, SendTaskProgressRequest,
    SendTaskStatusRequest, SubmitTaskRequest, SubmitTaskResponse, TaskProgressRequest,
    TaskProgressResponse,
};

/// Decides whether a worker can take a task. Capability predicates and
/// routing selectors are opaque to the core; the matcher interprets them.
pub trait WorkerMatcher: Send + Sync {
    /// Returns `true` if a worker satisfying this matcher may claim a
    /// task with the given predicates and selectors.
    fn eligible(&self, capabilities: &[String], selectors: &[String]) -> bool;
}

/// Outcome of a submission.
#[derive(Debug, Clone)]
pub enum Submission {
    /// The task was stored (and, unless parked, enqueued). Async and
    /// parked submissions always resolve here.
    Accepted {
        /// Id of the stored task.
        task_id: String,
        /// Advisory total expiry; abort timing is enforced elsewhere.
        total_expiry: chrono::DateTime<chrono::Utc>,
    },
    /// A sync submission that ran to a terminal result within its bound.
    Completed {
        /// Id of the finished task.
        task_id: String,
        /// The delivered result.
        result: TaskResult,
    },
}

/// Network-facing dispatch gateway fronting one task registry.
pub struct DispatchGateway {
    registry: Arc<dyn TaskRegistry>,
    callbacks: Arc<CallbackRegistry>,
    config: DispatchConfig,
    sync_waiters: DashMap<String, oneshot::Sender<TaskResult>>,
}

impl DispatchGateway {
    /// Creates a gateway over the registry backend for `era`.
    pub fn new(era: RegistryEra) -> Self {
        Self::with_registry(registry_for(era))
    }

    /// Creates a gateway over an explicit registry (tests, embedders).
    pub fn with_registry(registry: Arc<dyn TaskRegistry>) -> Self {
        Self {
            registry,
            callbacks: Arc::new(CallbackRegistry::new()),
            config: DispatchConfig::default(),
            sync_waiters: DashMap::new(),
        }
    }

    /// Overrides the dispatch configuration.
    #[must_use]
    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    /// The callback registry backing `RegisterCallback`.
    pub fn callbacks(&self) -> &Arc<CallbackRegistry> {
        &self.callbacks
    }

    /// The underlying registry. Exposed for the worker-pool integration
    /// (claim marking) and tests.
    pub fn registry(&self) -> &Arc<dyn TaskRegistry> {
        &self.registry
    }

    // ---- Operations ----

    /// Submits a task. See the module docs for routing semantics.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] if a sync submission carries a callback
    ///   token (two completion paths) or the token is unregistered.
    /// - [`Error::Timeout`] if a sync submission's bound elapses.
    pub async fn submit(&self, request: SubmitTaskRequest) -> Result<Submission> {
        if request.mode == TaskMode::Sync && request.callback_token.is_some() {
            return Err(Error::validation(
                "sync submission cannot carry a callback token: a task has exactly one completion path",
            ));
        }
        if let Some(token) = &request.callback_token {
            if !self.callbacks.contains(token) {
                return Err(Error::validation(format!(
                    "callback token {token} is not registered"
                )));
            }
        }

        let timeout_ms = self.config.effective_timeout_ms(request.timeout_ms);
        let queue_timeout_ms = self
            .config
            .effective_queue_timeout_ms(request.queue_timeout_ms);

        let mut record = TaskRecord::new(
            request.scope,
            request.mode,
            request.payload,
            timeout_ms,
            queue_timeout_ms,
        )
        .with_capabilities(request.capabilities)
        .with_selectors(request.selectors);
        if let Some(token) = request.callback_token {
            record = record.with_callback_token(token);
        }

        let task_id = record.task_id.clone();
        let account_id = record.scope.account_id.clone();
        let total_expiry = record.expires_at;
        let mode = record.mode;

        tracing::info!(%task_id, %account_id, %mode, "task submitted");

        match mode {
            TaskMode::Parked | TaskMode::Async => {
                self.registry.create(record).await?;
                Ok(Submission::Accepted {
                    task_id,
                    total_expiry,
                })
            },
            TaskMode::Sync => {
                let (sender, receiver) = oneshot::channel();
                // Register the waiter before the record is visible so a
                // fast worker cannot complete the task in between.
                self.sync_waiters.insert(task_id.clone(), sender);
                if let Err(e) = self.registry.create(record).await {
                    self.sync_waiters.remove(&task_id);
                    return Err(e);
                }

                let wait_ms = queue_timeout_ms.saturating_add(timeout_ms);
                match timeout(Duration::from_millis(wait_ms), receiver).await {
                    Ok(Ok(result)) => Ok(Submission::Completed { task_id, result }),
                    Ok(Err(_)) => {
                        // Sender dropped without a send; treat like a timeout.
                        self.sync_waiters.remove(&task_id);
                        Err(Error::Timeout { waited_ms: wait_ms })
                    },
                    Err(_) => {
                        self.sync_waiters.remove(&task_id);
                        tracing::warn!(%task_id, wait_ms, "sync submission timed out");
                        Err(Error::Timeout { waited_ms: wait_ms })
                    },
                }
            },
        }
    }

    /// Releases a parked task into the queue.
    pub async fn execute_parked(&self, account_id: &str, task_id: &str) -> Result<TaskRecord> {
        self.registry.release_parked(account_id, task_id).await
    }

    /// Returns a parked/async task's result once terminal.
    ///
    /// The presented token must match the task's registered driver token;
    /// a mismatch is reported as `NotFound` so callers cannot probe for
    /// other tenants' task ids.
    pub async fn fetch_parked_status(
        &self,
        account_id: &str,
        task_id: &str,
        callback_token: &str,
    ) -> Result<ParkedTaskStatus> {
        let record = self.registry.get(account_id, task_id).await?;
        if record.callback_token.as_deref() != Some(callback_token) {
            tracing::warn!(%task_id, "callback token mismatch on parked status fetch");
            return Err(Error::not_found("task", task_id));
        }
        match record.result {
            Some(result) if record.status.is_terminal() => {
                Ok(ParkedTaskStatus::Ready { result })
            },
            _ => Ok(ParkedTaskStatus::NotReady),
        }
    }

    /// Records a terminal result from a worker and resolves the task's
    /// completion path exactly once. Repeat deliveries are acknowledged
    /// and otherwise ignored.
    pub async fn send_status(
        &self,
        account_id: &str,
        task_id: &str,
        result: TaskResult,
    ) -> Result<()> {
        let disposition = self
            .registry
            .record_result(account_id, task_id, result.clone())
            .await?;

        match disposition {
            ResultDisposition::AlreadyTerminal(_) => {
                tracing::debug!(%task_id, "duplicate terminal delivery ignored");
                Ok(())
            },
            ResultDisposition::Applied(record) => {
                self.resolve_completion(&record, &result).await;
                Ok(())
            },
        }
    }

    /// Records a non-terminal progress stage. Never changes status.
    pub async fn send_progress(
        &self,
        account_id: &str,
        task_id: &str,
        stage: &str,
    ) -> Result<()> {
        self.registry.record_stage(account_id, task_id, stage).await?;
        Ok(())
    }

    /// Advisory cancellation. Marks the task `Aborted` unless already
    /// terminal and returns the stage it was at; the remote worker is not
    /// guaranteed to stop.
    pub async fn cancel(&self, account_id: &str, task_id: &str) -> Result<TaskRecord> {
        match self.registry.abort(account_id, task_id).await? {
            ResultDisposition::Applied(record) => {
                // Unblock a sync caller; its worker will not produce a
                // result anymore.
                if let Some(result) = record.result.clone() {
                    self.resolve_completion(&record, &result).await;
                }
                Ok(record)
            },
            ResultDisposition::AlreadyTerminal(record) => Ok(record),
        }
    }

    /// Read-only stage query.
    pub async fn query_progress(&self, account_id: &str, task_id: &str) -> Result<TaskRecord> {
        self.registry.get(account_id, task_id).await
    }

    /// Marks a queued task claimed by a worker (`Queued -> Started`).
    /// Invoked by the worker-pool integration, not exposed on the wire.
    pub async fn mark_started(&self, account_id: &str, task_id: &str) -> Result<TaskRecord> {
        self.registry.mark_started(account_id, task_id).await
    }

    /// Queued tasks under `account_id` that `matcher` deems eligible.
    /// Used by the worker-pool integration when offering work to a
    /// delegate; claiming itself happens through [`mark_started`](Self::mark_started).
    pub async fn eligible_queued(
        &self,
        account_id: &str,
        matcher: &dyn WorkerMatcher,
    ) -> Result<Vec<TaskRecord>> {
        Ok(self
            .registry
            .list_by_account(account_id)
            .await?
            .into_iter()
            .filter(|task| {
                task.status == TaskStatus::Queued
                    && matcher.eligible(&task.capabilities, &task.selectors)
            })
            .collect())
    }

    /// Wakes the sync waiter or fires the callback sink. Called only on
    /// the first terminal delivery for a task.
    async fn resolve_completion(&self, record: &TaskRecord, result: &TaskResult) {
        if let Some((_, sender)) = self.sync_waiters.remove(&record.task_id) {
            // A dropped receiver just means the caller already timed out.
            let _ = sender.send(result.clone());
            return;
        }
        if let Some(token) = &record.callback_token {
            if let Err(e) = self
                .callbacks
                .deliver(token, &record.task_id, result)
                .await
            {
                tracing::warn!(
                    task_id = %record.task_id,
                    error = %e,
                    "callback delivery failed; result remains pollable"
                );
            }
        }
    }

    // ---- Network boundary ----

    /// `SubmitTask` boundary handler.
    pub async fn handle_submit(&self, request: SubmitTaskRequest) -> Envelope<SubmitTaskResponse> {
        Envelope::from_result(self.submit(request).await.map(|submission| match submission {
            Submission::Accepted {
                task_id,
                total_expiry,
            } => SubmitTaskResponse {
                task_id,
                total_expiry,
                result: None,
            },
            Submission::Completed { task_id, result } => SubmitTaskResponse {
                task_id,
                // The task is already terminal; the expiry is moot.
                total_expiry: chrono::Utc::now(),
                result: Some(result),
            },
        }))
    }

    /// `ExecuteParkedTask` boundary handler.
    pub async fn handle_execute_parked(
        &self,
        request: ExecuteParkedTaskRequest,
    ) -> Envelope<ExecuteParkedTaskResponse> {
        Envelope::from_result(
            self.execute_parked(&request.account_id, &request.task_id)
                .await
                .map(|record| ExecuteParkedTaskResponse {
                    task_id: record.task_id,
                    status: record.status,
                }),
        )
    }

    /// `FetchParkedTaskStatus` boundary handler.
    pub async fn handle_fetch_parked_status(
        &self,
        request: FetchParkedTaskStatusRequest,
    ) -> Envelope<ParkedTaskStatus> {
        Envelope::from_result(
            self.fetch_parked_status(
                &request.account_id,
                &request.task_id,
                &request.callback_token,
            )
            .await,
        )
    }

    /// `SendTaskStatus` boundary handler.
    pub async fn handle_send_status(&self, request: SendTaskStatusRequest) -> Envelope<Ack> {
        Envelope::from_result(
            self.send_status(&request.account_id, &request.task_id, request.result)
                .await
                .map(|()| Ack::new()),
        )
    }

    /// `SendTaskProgress` boundary handler.
    pub async fn handle_send_progress(&self, request: SendTaskProgressRequest) -> Envelope<Ack> {
        Envelope::from_result(
            self.send_progress(&request.account_id, &request.task_id, &request.stage)
                .await
                .map(|()| Ack::new()),
        )
    }

    /// `CancelTask` boundary handler.
    pub async fn handle_cancel(&self, request: CancelTaskRequest) -> Envelope<CancelTaskResponse> {
        Envelope::from_result(
            self.cancel(&request.account_id, &request.task_id)
                .await
                .map(|record| CancelTaskResponse {
                    status: record.status,
                    stage: record.stage,
                }),
        )
    }

    /// `TaskProgress` boundary handler.
    pub async fn handle_query_progress(
        &self,
        request: TaskProgressRequest,
    ) -> Envelope<TaskProgressResponse> {
        Envelope::from_result(
            self.query_progress(&request.account_id, &request.task_id)
                .await
                .map(|record| TaskProgressResponse {
                    status: record.status,
                    stage: record.stage,
                }),
        )
    }

    /// `RegisterCallback` boundary handler.
    ///
    /// The sink itself is process-local and supplied by the embedder; the
    /// wire operation only carries the descriptor.
    pub fn handle_register_callback(
        &self,
        request: RegisterCallbackRequest,
        sink: Arc<dyn crate::callback::CompletionSink>,
    ) -> Envelope<RegisterCallbackResponse> {
        let token = self.callbacks.ensure_callback(request.descriptor, sink);
        Envelope::from_result(Ok(RegisterCallbackResponse { token }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::{CompletionSink, SinkDescriptor};
    use crate::domain::record::{TaskPayload, TaskScope};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    struct RecordingSink {
        delivered: Mutex<Vec<(String, TaskResult)>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                delivered: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CompletionSink for RecordingSink {
        async fn deliver(&self, task_id: &str, result: &TaskResult) -> Result<()> {
            self.delivered
                .lock()
                .push((task_id.to_string(), result.clone()));
            Ok(())
        }
    }

    fn submit_request(mode: TaskMode) -> SubmitTaskRequest {
        SubmitTaskRequest {
            scope: TaskScope::account("acct-1"),
            mode,
            capabilities: vec![],
            selectors: vec![],
            payload: TaskPayload {
                kind: "shell-script".to_string(),
                data: json!({"script": "true"}),
            },
            timeout_ms: Some(1_000),
            queue_timeout_ms: Some(1_000),
            callback_token: None,
        }
    }

    #[tokio::test]
    async fn sync_submission_rejects_callback_token() {
        let gateway = DispatchGateway::new(RegistryEra::Modern);
        let token = gateway.callbacks().ensure_callback(
            SinkDescriptor::new("d", "e"),
            RecordingSink::new(),
        );
        let mut request = submit_request(TaskMode::Sync);
        request.callback_token = Some(token);

        let err = gateway.submit(request).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn unregistered_token_rejected() {
        let gateway = DispatchGateway::new(RegistryEra::Modern);
        let mut request = submit_request(TaskMode::Async);
        request.callback_token = Some("nonexistent".to_string());

        let err = gateway.submit(request).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn sync_submission_times_out_bounded() {
        let gateway = DispatchGateway::new(RegistryEra::Modern);
        let mut request = submit_request(TaskMode::Sync);
        request.timeout_ms = Some(20);
        request.queue_timeout_ms = Some(20);

        let err = gateway.submit(request).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { waited_ms: 40 }));
    }

    #[tokio::test]
    async fn parked_status_requires_matching_token() {
        let gateway = DispatchGateway::new(RegistryEra::Modern);
        let token = gateway.callbacks().ensure_callback(
            SinkDescriptor::new("driver-a", "queue://a"),
            RecordingSink::new(),
        );
        let other_token = gateway.callbacks().ensure_callback(
            SinkDescriptor::new("driver-b", "queue://b"),
            RecordingSink::new(),
        );

        let mut request = submit_request(TaskMode::Parked);
        request.callback_token = Some(token.clone());
        let Submission::Accepted { task_id, .. } = gateway.submit(request).await.unwrap() else {
            panic!("parked submission must be accepted");
        };

        // Another tenant's token cannot see the task at all.
        let err = gateway
            .fetch_parked_status("acct-1", &task_id, &other_token)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));

        // The right token sees not-ready until a result lands.
        let status = gateway
            .fetch_parked_status("acct-1", &task_id, &token)
            .await
            .unwrap();
        assert!(matches!(status, ParkedTaskStatus::NotReady));
    }

    #[tokio::test]
    async fn cancel_reports_stage_at_cancellation() {
        let gateway = DispatchGateway::new(RegistryEra::Modern);
        let Submission::Accepted { task_id, .. } = gateway
            .submit(submit_request(TaskMode::Async))
            .await
            .unwrap()
        else {
            panic!("async submission must be accepted");
        };

        gateway
            .send_progress("acct-1", &task_id, "pulling image")
            .await
            .unwrap();
        let cancelled = gateway.cancel("acct-1", &task_id).await.unwrap();
        assert_eq!(cancelled.status, TaskStatus::Aborted);
        assert_eq!(cancelled.stage.as_deref(), Some("pulling image"));
    }
}
