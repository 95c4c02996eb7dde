//! taskmesh -- control-plane core for dispatching work to remote
//! delegates and reconciling out-of-band infrastructure state.
//!
//! # Overview
//!
//! Three coordinated pieces:
//!
//! - **Dispatch**: the [`gateway::DispatchGateway`] turns submissions into
//!   [`domain::record::TaskRecord`]s in a [`store::TaskRegistry`], routes
//!   them sync/async/parked, and resolves completion exactly once through
//!   the [`callback::CallbackRegistry`] or a blocked synchronous caller.
//!   Task status moves through a forward-only state machine
//!   (`parked -> queued -> started -> terminal`) with immutable terminal
//!   states.
//! - **Perpetual tasks**: the [`perpetual::PerpetualTaskService`] owns
//!   declarative recurring polling assignments with content-deduplicated
//!   creation, idempotent deletion, and in-place context reset. An
//!   external scheduler assigns them to workers.
//! - **Reconciliation**: the [`reconcile::ReconciliationConsumer`] reacts
//!   to periodic worker reports, linearizes same-resource updates through
//!   a resource-scoped distributed lock, refreshes release watermarks,
//!   and degrades feature-flag-disabled accounts to the legacy poller.
//!
//! # Module Organization
//!
//! - [`types`] - status machine, wire request/response pairs, reports
//! - [`domain`] - internal task / perpetual-task / tracked-state records
//! - [`store`] - registry trait and the modern / legacy backends
//! - [`callback`] - content-addressed completion sinks
//! - [`gateway`] - the network-facing dispatch surface
//! - [`perpetual`] - perpetual task CRUD
//! - [`reconcile`] - the reconciliation consumer and its collaborator seams
//! - [`error`] - error taxonomy and boundary kind mapping
//! - [`config`] - dispatch and reconciliation tunables

pub mod callback;
pub mod config;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod perpetual;
pub mod reconcile;
pub mod store;
pub mod types;

pub use callback::{CallbackRegistry, CompletionSink, SinkDescriptor};
pub use config::{DispatchConfig, ReconcileConfig};
pub use error::{Error, ErrorKind, Result};
pub use gateway::{DispatchGateway, Submission, WorkerMatcher};
pub use perpetual::PerpetualTaskService;
pub use reconcile::ReconciliationConsumer;
pub use store::{RegistryEra, TaskRegistry};
pub use types::task::{TaskMode, TaskOutcome, TaskResult, TaskStatus};
