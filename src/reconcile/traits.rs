//! Collaborator seams consumed by the reconciliation consumer.
//!
//! None of these are implemented by the control plane itself: the lock
//! provider fronts a mutex service, the flag provider fronts the feature
//! flag system, the provider handlers encapsulate per-cloud release
//! computation, the instance store is the deployment system-of-record,
//! and the legacy fallback re-enrolls a resource in the old poller.
//! In-memory doubles live in the test suites.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::tracked::{DeploymentSummary, ProviderKind, ResourceRef};
use crate::error::{Error, Result};
use crate::types::report::{PerpetualTaskReport, ReportedInstance, SyncOutcome};

/// An acquired distributed lock. Dropping the lease releases the lock;
/// the provider additionally releases it when the hold bound elapses.
pub trait LockLease: Send {}

/// Distributed lock provider with explicit wait and hold ceilings.
///
/// `try_acquire` blocks up to `wait` for a contested lock and then gives
/// up with `None` -- it must never block indefinitely. An acquired lease
/// is held at most `hold` before the provider force-releases it.
#[async_trait]
pub trait DistributedLockProvider: Send + Sync {
    /// Attempts to acquire the lock for `key`.
    async fn try_acquire(
        &self,
        key: &str,
        wait: Duration,
        hold: Duration,
    ) -> Option<Box<dyn LockLease>>;
}

/// Feature flag lookup, scoped per account.
pub trait FeatureFlagProvider: Send + Sync {
    /// Returns whether `flag` is enabled for `account_id`.
    fn is_enabled(&self, flag: FeatureFlag, account_id: &str) -> bool;
}

/// Flags the reconciliation consumer consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum FeatureFlag {
    /// Whether an account's resources are reconciled through perpetual
    /// tasks at all; disabled accounts use the legacy poller.
    PerpetualInstanceSync,
}

/// Provider-specific reconciliation capability set, selected by
/// [`ProviderKind`] from a [`HandlerRegistry`].
#[async_trait]
pub trait ProviderHandler: Send + Sync {
    /// Derives the release identifiers a deployment puts in flight.
    fn build_release_identifiers(&self, deployment: &DeploymentSummary) -> Result<Vec<String>>;

    /// Merges newly built identifiers into the already-tracked set.
    fn merge_release_identifiers(&self, existing: &[String], incoming: &[String]) -> Vec<String>;

    /// Recomputes the delete-after watermark for a release that appeared
    /// in `report`.
    fn delete_release_after(&self, release_id: &str, report: &PerpetualTaskReport)
        -> DateTime<Utc>;

    /// Fetches the connector context bytes used as the perpetual task's
    /// execution bundle for `resource`.
    async fn fetch_connector_context(&self, resource: &ResourceRef) -> Result<Vec<u8>>;
}

/// Strategy table mapping provider kinds to handlers.
///
/// # Examples
///
/// ```
/// use taskmesh::domain::tracked::ProviderKind;
/// use taskmesh::reconcile::HandlerRegistry;
///
/// let registry = HandlerRegistry::new();
/// assert!(registry.resolve(&ProviderKind::Kubernetes).is_err());
/// ```
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<ProviderKind, Arc<dyn ProviderHandler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registers `handler` for `kind`, replacing any previous entry.
    #[must_use]
    pub fn with_handler(mut self, kind: ProviderKind, handler: Arc<dyn ProviderHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    /// Resolves the handler for `kind`.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedOperation`] when no handler is registered;
    ///   callers treat this as non-retryable.
    pub fn resolve(&self, kind: &ProviderKind) -> Result<Arc<dyn ProviderHandler>> {
        self.handlers
            .get(kind)
            .cloned()
            .ok_or_else(|| Error::unsupported(format!("no reconciliation handler for {kind}")))
    }
}

/// System-of-record for observed instances.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Applies the instances reported for one tracked record. The benign
    /// no-instances case is [`SyncOutcome::Empty`], not an error.
    async fn apply(&self, tracked_record_id: &str, instances: &[ReportedInstance]) -> SyncOutcome;
}

/// Re-enrolls resources in the legacy (non-perpetual-task) poller.
#[async_trait]
pub trait LegacyFallback: Send + Sync {
    /// Restores `resource_id` to the legacy polling path.
    async fn restore(&self, account_id: &str, resource_id: &str) -> Result<()>;
}
