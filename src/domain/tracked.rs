//! Tracked state owned by the reconciliation consumer: which perpetual
//! task reconciles which resource, and the release identifiers in flight
//! with their delete-after watermarks.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Deployment-target kind, used to select the provider-specific handler
/// from the strategy table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Kubernetes workloads observed through a cluster connector.
    Kubernetes,
    /// ECS services observed through a cluster ARN.
    Ecs,
    /// VM auto-scaling groups observed through a cloud API.
    AutoScalingGroup,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kubernetes => write!(f, "kubernetes"),
            Self::Ecs => write!(f, "ecs"),
            Self::AutoScalingGroup => write!(f, "auto_scaling_group"),
        }
    }
}

/// Reference to the resource an event or tracked record is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    /// Stable resource identifier; also the distributed-lock key.
    pub resource_id: String,

    /// Owning account.
    pub account_id: String,

    /// Provider kind, selecting the reconciliation handler.
    pub provider_kind: ProviderKind,
}

/// Summary of the deployment that triggered a tracked event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSummary {
    /// Key correlating this deployment with provider-side state. Events
    /// without a recognized key are ignored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_key: Option<String>,

    /// Provider-specific deployment detail, interpreted by the handler.
    pub info: Value,
}

impl DeploymentSummary {
    /// Returns `true` when the summary carries a usable deployment key.
    pub fn has_recognized_key(&self) -> bool {
        self.deployment_key
            .as_deref()
            .is_some_and(|key| !key.is_empty())
    }
}

/// An event announcing that a deployment should be brought under
/// reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedEvent {
    /// The resource the deployment landed on.
    pub resource: ResourceRef,

    /// Deployment summary; events without one are no-ops.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentSummary>,
}

/// Consumer-owned association between a resource and the perpetual task
/// reconciling it.
///
/// Invariants maintained by the consumer:
/// - a release present in the latest report gets a recomputed watermark;
/// - a release absent from the report keeps its old watermark and is
///   pruned once that watermark passes;
/// - a perpetual task with zero tracked resources is deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedState {
    /// The resource under reconciliation.
    pub resource: ResourceRef,

    /// The perpetual task currently polling this resource.
    pub perpetual_task_id: String,

    /// Release identifiers in flight, each with its delete-after
    /// watermark.
    pub releases: HashMap<String, DateTime<Utc>>,

    /// When the last system-of-record write for this resource failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_failure: Option<DateTime<Utc>>,
}

impl TrackedState {
    /// Fresh state binding `resource` to `perpetual_task_id` with no
    /// releases yet.
    pub fn new(resource: ResourceRef, perpetual_task_id: impl Into<String>) -> Self {
        Self {
            resource,
            perpetual_task_id: perpetual_task_id.into(),
            releases: HashMap::new(),
            last_sync_failure: None,
        }
    }

    /// Drops releases whose watermark has passed and returns how many
    /// were pruned.
    pub fn prune_expired_releases(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.releases.len();
        self.releases.retain(|_, delete_after| *delete_after > now);
        before - self.releases.len()
    }
}
