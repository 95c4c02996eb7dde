//! Reconciliation consumer: keeps tracked deployment state convergent
//! with provider-reported reality through perpetual tasks and distributed
//! locking, degrading to the legacy poller on failure.
//!
//! # Locking
//!
//! Updates to the same resource are linearized by a distributed lock
//! scoped to the **resource id**, not the perpetual-task id -- two
//! perpetual tasks touching one resource still serialize. Every
//! acquisition carries the explicit wait/hold ceilings from
//! [`ReconcileConfig`]. Lock timeout during event tracking is transient
//! and retried up to the attempt budget; exhaustion is the terminal
//! fall-back-to-legacy signal. Lock timeout during report processing is
//! always skip-and-retry-next-cycle.
//!
//! # Failure isolation
//!
//! One tracked record's failure never aborts its siblings in the same
//! report. The whole batch aborts only on an unsupported provider kind or
//! a spent lock budget.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::config::ReconcileConfig;
use crate::domain::perpetual::{TaskContext, TaskSchedule};
use crate::domain::tracked::{DeploymentSummary, ResourceRef, TrackedEvent, TrackedState};
use crate::error::{Error, Result};
use crate::perpetual::PerpetualTaskService;
use crate::reconcile::traits::{
    DistributedLockProvider, FeatureFlag, FeatureFlagProvider, HandlerRegistry, InstanceStore,
    LegacyFallback, ProviderHandler,
};
use crate::types::report::{PerpetualTaskReport, ReportedInstance, SyncOutcome};

/// Task type the consumer registers its perpetual tasks under.
pub const INSTANCE_SYNC_TASK_TYPE: &str = "instance-sync";

/// Outcome of handling a tracked event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    /// The event carried no recognizable deployment; nothing was done.
    Skipped,
    /// The resource is tracked under the given perpetual task.
    Tracked {
        /// The perpetual task now polling the resource.
        perpetual_task_id: String,
    },
}

/// Outcome of processing one periodic report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    /// Failed cycle with the account's flag still enabled; leave the
    /// resources alone and wait for the next cycle.
    Deferred,
    /// Failed cycle with the flag disabled: resources were restored to
    /// the legacy path.
    RestoredToLegacy {
        /// How many resources were restored.
        resources: usize,
        /// Whether the now-empty perpetual task was deleted.
        task_deleted: bool,
    },
    /// Successful cycle.
    Processed {
        /// Tracked records whose instances were applied.
        records: usize,
        /// Release identifiers pruned across all records.
        pruned_releases: usize,
        /// Resources restored to legacy because their account's flag
        /// flipped off mid-flight.
        restored: usize,
        /// Records skipped because their resource lock timed out.
        skipped_locked: usize,
        /// Whether the perpetual task ended up tracking nothing and was
        /// deleted.
        task_deleted: bool,
    },
}

/// The reconciliation consumer. Owns [`TrackedState`] and references
/// perpetual tasks only through the service's narrow API.
pub struct ReconciliationConsumer {
    perpetual: Arc<PerpetualTaskService>,
    locks: Arc<dyn DistributedLockProvider>,
    flags: Arc<dyn FeatureFlagProvider>,
    handlers: HandlerRegistry,
    instances: Arc<dyn InstanceStore>,
    legacy: Arc<dyn LegacyFallback>,
    tracked: DashMap<String, TrackedState>,
    config: ReconcileConfig,
}

impl ReconciliationConsumer {
    /// Wires the consumer to its collaborators.
    pub fn new(
        perpetual: Arc<PerpetualTaskService>,
        locks: Arc<dyn DistributedLockProvider>,
        flags: Arc<dyn FeatureFlagProvider>,
        handlers: HandlerRegistry,
        instances: Arc<dyn InstanceStore>,
        legacy: Arc<dyn LegacyFallback>,
    ) -> Self {
        Self {
            perpetual,
            locks,
            flags,
            handlers,
            instances,
            legacy,
            tracked: DashMap::new(),
            config: ReconcileConfig::default(),
        }
    }

    /// Overrides the reconciliation configuration.
    #[must_use]
    pub fn with_config(mut self, config: ReconcileConfig) -> Self {
        self.config = config;
        self
    }

    /// Tracked state for a resource, if any. Exposed for tests and
    /// observability.
    pub fn tracked_state(&self, resource_id: &str) -> Option<TrackedState> {
        self.tracked.get(resource_id).map(|e| e.value().clone())
    }

    /// Brings the deployment described by `event` under reconciliation.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedOperation`] for an unrecognized provider
    ///   kind; immediate, never retried.
    /// - [`Error::LockExhausted`] when the resource lock could not be
    ///   acquired within the attempt budget; the caller should fall back
    ///   to the legacy poller for this resource.
    /// - Any other failure from the final attempt of the bounded retry
    ///   loop.
    pub async fn handle_new_tracked_event(&self, event: TrackedEvent) -> Result<HandleOutcome> {
        let Some(deployment) = &event.deployment else {
            return Ok(HandleOutcome::Skipped);
        };
        if !deployment.has_recognized_key() {
            tracing::debug!(
                resource_id = %event.resource.resource_id,
                "event without recognized deployment key ignored"
            );
            return Ok(HandleOutcome::Skipped);
        }

        // Unsupported kinds fail before any lock or retry.
        let handler = self.handlers.resolve(&event.resource.provider_kind)?;

        let key = event.resource.resource_id.clone();
        let mut last_err: Option<Error> = None;
        let attempts = self.config.max_lock_attempts;

        for attempt in 1..=attempts {
            let Some(_lease) = self
                .locks
                .try_acquire(&key, self.config.lock_wait, self.config.lock_hold)
                .await
            else {
                tracing::warn!(resource_id = %key, attempt, "lock acquire timed out while tracking");
                last_err = Some(Error::transient(format!("lock acquire timed out for {key}")));
                continue;
            };

            match self
                .track_under_lock(&event.resource, deployment, &handler)
                .await
            {
                Ok(perpetual_task_id) => {
                    return Ok(HandleOutcome::Tracked { perpetual_task_id })
                },
                Err(err @ Error::UnsupportedOperation(_)) => return Err(err),
                Err(err) => {
                    tracing::warn!(resource_id = %key, attempt, error = %err, "tracking attempt failed");
                    last_err = Some(err);
                },
            }
        }

        match last_err {
            // Ran out of attempts against the lock itself: terminal
            // fall-back-to-legacy signal.
            Some(Error::Transient(_)) => Err(Error::LockExhausted { key, attempts }),
            Some(err) => Err(err),
            None => Err(Error::internal("lock attempt budget is zero")),
        }
    }

    /// Body of one tracking attempt, run while holding the resource lock.
    async fn track_under_lock(
        &self,
        resource: &ResourceRef,
        deployment: &DeploymentSummary,
        handler: &Arc<dyn ProviderHandler>,
    ) -> Result<String> {
        let built = handler.build_release_identifiers(deployment)?;
        let now = Utc::now();

        // Already tracked: refresh the release set in place.
        if let Some(mut entry) = self.tracked.get_mut(&resource.resource_id) {
            let state = entry.value_mut();
            Self::apply_releases(state, handler, &built, self.initial_watermark(now));
            return Ok(state.perpetual_task_id.clone());
        }

        // Attach to an existing perpetual task for this provider/account
        // before creating a new one.
        let existing_task = self.tracked.iter().find_map(|entry| {
            let state = entry.value();
            (state.resource.account_id == resource.account_id
                && state.resource.provider_kind == resource.provider_kind)
                .then(|| state.perpetual_task_id.clone())
        });

        let perpetual_task_id = match existing_task {
            Some(task_id) => task_id,
            None => {
                let bundle = handler.fetch_connector_context(resource).await?;
                self.perpetual.create_task(
                    INSTANCE_SYNC_TASK_TYPE,
                    &resource.account_id,
                    TaskContext::Bundle(bundle),
                    TaskSchedule {
                        interval_ms: self.config.sync_interval_ms,
                        timeout_ms: self.config.sync_timeout_ms,
                    },
                    false,
                    Some(format!(
                        "instance sync for {} resources in {}",
                        resource.provider_kind, resource.account_id
                    )),
                )?
            },
        };

        let mut state = TrackedState::new(resource.clone(), perpetual_task_id.clone());
        Self::apply_releases(&mut state, handler, &built, self.initial_watermark(now));
        self.tracked.insert(resource.resource_id.clone(), state);

        tracing::info!(
            resource_id = %resource.resource_id,
            %perpetual_task_id,
            releases = built.len(),
            "resource brought under reconciliation"
        );
        Ok(perpetual_task_id)
    }

    fn initial_watermark(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::milliseconds(self.config.initial_release_ttl_ms.min(i64::MAX as u64) as i64)
    }

    /// Merges `built` into the tracked release set, keeping existing
    /// watermarks and assigning `initial` to newly seen identifiers.
    fn apply_releases(
        state: &mut TrackedState,
        handler: &Arc<dyn ProviderHandler>,
        built: &[String],
        initial: DateTime<Utc>,
    ) {
        let existing: Vec<String> = state.releases.keys().cloned().collect();
        let merged = handler.merge_release_identifiers(&existing, built);
        let mut releases = HashMap::with_capacity(merged.len());
        for id in merged {
            let watermark = state.releases.get(&id).copied().unwrap_or(initial);
            releases.insert(id, watermark);
        }
        state.releases = releases;
    }

    /// Processes a periodic report for `perpetual_task_id`.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedOperation`] if a tracked record's provider
    ///   kind has no handler; aborts the whole batch.
    pub async fn process_periodic_report(
        &self,
        perpetual_task_id: &str,
        report: &PerpetualTaskReport,
    ) -> Result<ReportOutcome> {
        let tracked_ids = self.resources_under(perpetual_task_id);

        if !report.success {
            if self
                .flags
                .is_enabled(FeatureFlag::PerpetualInstanceSync, &report.account_id)
            {
                // Flag still on: the worker gets another chance next
                // cycle, no immediate re-poll.
                tracing::debug!(
                    perpetual_task_id,
                    message = report.message.as_deref().unwrap_or(""),
                    "failed sync cycle deferred"
                );
                return Ok(ReportOutcome::Deferred);
            }

            let mut resources = 0;
            for resource_id in &tracked_ids {
                if self.restore_resource(resource_id).await {
                    resources += 1;
                }
            }
            let task_deleted = self.delete_if_untracked(&report.account_id, perpetual_task_id);
            return Ok(ReportOutcome::RestoredToLegacy {
                resources,
                task_deleted,
            });
        }

        // Mid-flight flag flips: a successful report still restores any
        // account whose flag has since been disabled.
        let mut restored = 0;
        for resource_id in &tracked_ids {
            let Some(account_id) = self
                .tracked
                .get(resource_id)
                .map(|e| e.value().resource.account_id.clone())
            else {
                continue;
            };
            if !self
                .flags
                .is_enabled(FeatureFlag::PerpetualInstanceSync, &account_id)
                && self.restore_resource(resource_id).await
            {
                restored += 1;
            }
        }

        let remaining = self.resources_under(perpetual_task_id);
        if remaining.is_empty() {
            self.perpetual
                .delete_task(&report.account_id, perpetual_task_id);
            return Ok(ReportOutcome::Processed {
                records: 0,
                pruned_releases: 0,
                restored,
                skipped_locked: 0,
                task_deleted: true,
            });
        }

        let mut by_record: HashMap<&str, Vec<&ReportedInstance>> = HashMap::new();
        for instance in &report.instances {
            by_record
                .entry(instance.tracked_record_id.as_str())
                .or_default()
                .push(instance);
        }

        let mut records = 0;
        let mut pruned_releases = 0;
        let mut skipped_locked = 0;

        for resource_id in &remaining {
            let Some(instances) = by_record.get(resource_id.as_str()) else {
                continue;
            };

            let Some(_lease) = self
                .locks
                .try_acquire(resource_id, self.config.lock_wait, self.config.lock_hold)
                .await
            else {
                // Always skip-and-retry-next-cycle while reporting.
                tracing::warn!(%resource_id, "resource lock timed out; record left for next cycle");
                skipped_locked += 1;
                continue;
            };

            let Some(state_ref) = self.tracked.get(resource_id) else {
                continue;
            };
            let mut state = state_ref.value().clone();
            drop(state_ref);

            let handler = self.handlers.resolve(&state.resource.provider_kind)?;
            let now = Utc::now();

            // Releases present in both the tracked and reported sets get
            // recomputed watermarks; absent ones keep their old watermark
            // until it passes.
            let reported: HashSet<&str> =
                instances.iter().map(|i| i.release_id.as_str()).collect();
            for (release_id, delete_after) in state.releases.iter_mut() {
                if reported.contains(release_id.as_str()) {
                    *delete_after = handler.delete_release_after(release_id, report);
                }
            }
            pruned_releases += state.prune_expired_releases(now);

            let owned: Vec<ReportedInstance> =
                instances.iter().map(|i| (*i).clone()).collect();
            match self.instances.apply(resource_id, &owned).await {
                SyncOutcome::Empty => {
                    tracing::debug!(%resource_id, "no instances found; treated as benign");
                },
                SyncOutcome::Applied(count) => {
                    tracing::debug!(%resource_id, count, "instances applied");
                },
                SyncOutcome::Failure(message) => {
                    tracing::warn!(%resource_id, %message, "instance sync failed for record");
                    state.last_sync_failure = Some(now);
                },
            }

            // Persist the updated live set as the new last-run state.
            self.tracked.insert(resource_id.clone(), state);
            records += 1;
        }

        let task_deleted = self.delete_if_untracked(&report.account_id, perpetual_task_id);
        Ok(ReportOutcome::Processed {
            records,
            pruned_releases,
            restored,
            skipped_locked,
            task_deleted,
        })
    }

    fn resources_under(&self, perpetual_task_id: &str) -> Vec<String> {
        self.tracked
            .iter()
            .filter(|e| e.value().perpetual_task_id == perpetual_task_id)
            .map(|e| e.key().clone())
            .collect()
    }

    /// Restores one resource to the legacy poller. Returns `true` on
    /// success; failures are logged and the resource stays tracked so a
    /// later cycle can retry.
    async fn restore_resource(&self, resource_id: &str) -> bool {
        let Some(account_id) = self
            .tracked
            .get(resource_id)
            .map(|e| e.value().resource.account_id.clone())
        else {
            return false;
        };
        match self.legacy.restore(&account_id, resource_id).await {
            Ok(()) => {
                self.tracked.remove(resource_id);
                tracing::info!(resource_id, %account_id, "resource restored to legacy poller");
                true
            },
            Err(err) => {
                tracing::warn!(resource_id, error = %err, "legacy restore failed; still tracked");
                false
            },
        }
    }

    /// Deletes the perpetual task once nothing is tracked under it.
    fn delete_if_untracked(&self, account_id: &str, perpetual_task_id: &str) -> bool {
        if self.resources_under(perpetual_task_id).is_empty() {
            self.perpetual.delete_task(account_id, perpetual_task_id);
            true
        } else {
            false
        }
    }
}
