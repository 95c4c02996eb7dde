//! Internal domain representations: dispatch task records, perpetual task
//! records, and the reconciliation consumer's tracked state.

pub mod perpetual;
pub mod record;
pub mod tracked;

pub use perpetual::{PerpetualTaskRecord, TaskContext, TaskSchedule};
pub use record::{TaskPayload, TaskRecord, TaskScope};
pub use tracked::{DeploymentSummary, ProviderKind, ResourceRef, TrackedEvent, TrackedState};
