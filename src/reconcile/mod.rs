//! Reconciliation-consumer pattern: perpetual tasks plus distributed
//! locking keep tracked deployment state convergent with reality, with a
//! feature-flagged fallback to the legacy poller.

pub mod consumer;
pub mod traits;

pub use consumer::{
    HandleOutcome, ReconciliationConsumer, ReportOutcome, INSTANCE_SYNC_TASK_TYPE,
};
pub use traits::{
    DistributedLockProvider, FeatureFlag, FeatureFlagProvider, HandlerRegistry, InstanceStore,
    LegacyFallback, LockLease, ProviderHandler,
};
