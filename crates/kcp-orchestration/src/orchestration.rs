//! Orchestration records and their state machine.
//!
//! An orchestration is one fleet-wide upgrade campaign. It is created by the
//! trigger handler in [`State::Pending`] and afterwards mutated by the
//! [`crate::manager::OrchestrationManager`], the [`crate::cancel::Canceler`]
//! and the [`crate::retry::RetryEngine`].
//!
//! ```text
//! PENDING     ──► IN PROGRESS | SUCCEEDED (nothing matched) | FAILED
//! IN PROGRESS ──► SUCCEEDED | FAILED | CANCELING
//! FAILED      ──► CANCELING | RETRYING
//! RETRYING    ──► IN PROGRESS | FAILED
//! CANCELING   ──► CANCELED
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kcp_core::{OperationId, OrchestrationId};

use crate::error::{Error, Result};

/// Sentinel value of [`RuntimeTarget::target`] matching every runtime.
pub const TARGET_ALL: &str = "all";

/// Lifecycle state shared by orchestrations and runtime operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum State {
    /// Created, waiting to be processed.
    #[serde(rename = "pending")]
    Pending,
    /// Operations are being dispatched.
    #[serde(rename = "in progress")]
    InProgress,
    /// Cancellation requested, waiting for in-flight work.
    #[serde(rename = "canceling")]
    Canceling,
    /// Canceled.
    #[serde(rename = "canceled")]
    Canceled,
    /// Completed without failed operations.
    #[serde(rename = "succeeded")]
    Succeeded,
    /// Completed with at least one failed operation (or failed outright).
    #[serde(rename = "failed")]
    Failed,
    /// Queued for retry.
    #[serde(rename = "retrying")]
    Retrying,
}

impl State {
    /// Returns the wire representation of the state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in progress",
            Self::Canceling => "canceling",
            Self::Canceled => "canceled",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
        }
    }

    /// Returns true for the terminal states `succeeded`, `failed` and `canceled`.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    /// Returns true if cancellation was requested or completed.
    #[must_use]
    pub const fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceling | Self::Canceled)
    }

    /// Returns true if the orchestration transition from self to target is valid.
    #[must_use]
    pub const fn can_transition_to(&self, target: Self) -> bool {
        match self {
            Self::Pending => matches!(target, Self::InProgress | Self::Succeeded | Self::Failed),
            Self::InProgress => {
                matches!(target, Self::Succeeded | Self::Failed | Self::Canceling)
            }
            Self::Failed => matches!(target, Self::Canceling | Self::Retrying),
            Self::Canceling => matches!(target, Self::Canceled),
            Self::Retrying => matches!(target, Self::InProgress | Self::Failed),
            Self::Succeeded | Self::Canceled => false,
        }
    }
}

impl Default for State {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of upgrade an orchestration rolls out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrchestrationType {
    /// Kyma software upgrade.
    UpgradeKyma,
    /// Cluster (Kubernetes version) upgrade.
    UpgradeCluster,
}

impl std::fmt::Display for OrchestrationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UpgradeKyma => write!(f, "upgradeKyma"),
            Self::UpgradeCluster => write!(f, "upgradeCluster"),
        }
    }
}

/// A declarative runtime filter. Present fields are AND-ed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeTarget {
    /// `"all"` matches every eligible runtime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Regex matched against the global account ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_account: Option<String>,
    /// Regex matched against the subaccount ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_account: Option<String>,
    /// Regex matched against the region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Exact runtime ID.
    #[serde(default, rename = "runtimeID", skip_serializing_if = "Option::is_none")]
    pub runtime_id: Option<String>,
    /// Exact service plan name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_name: Option<String>,
    /// Exact shoot name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shoot: Option<String>,
    /// Exact instance ID.
    #[serde(default, rename = "instanceID", skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

impl RuntimeTarget {
    /// A target matching every eligible runtime.
    #[must_use]
    pub fn all() -> Self {
        Self {
            target: Some(TARGET_ALL.to_string()),
            ..Self::default()
        }
    }

    /// A target matching an exact runtime ID.
    #[must_use]
    pub fn runtime(runtime_id: impl Into<String>) -> Self {
        Self {
            runtime_id: Some(runtime_id.into()),
            ..Self::default()
        }
    }

    /// A target matching global accounts by regular expression.
    #[must_use]
    pub fn global_account(pattern: impl Into<String>) -> Self {
        Self {
            global_account: Some(pattern.into()),
            ..Self::default()
        }
    }
}

/// Ordered include/exclude lists of runtime targets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSpec {
    /// Targets whose union is selected.
    #[serde(default)]
    pub include: Vec<RuntimeTarget>,
    /// Targets whose union is removed from the selection.
    #[serde(default)]
    pub exclude: Vec<RuntimeTarget>,
}

/// Strategy used to dispatch runtime operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StrategyType {
    /// Bounded-concurrency worker pool.
    #[default]
    Parallel,
}

impl std::fmt::Display for StrategyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parallel => write!(f, "parallel"),
        }
    }
}

/// When an operation may start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScheduleType {
    /// As soon as a worker picks it up.
    #[default]
    Immediate,
    /// At the start of the runtime's next maintenance window.
    MaintenanceWindow,
}

/// Parallel strategy settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelStrategySpec {
    /// Number of concurrent workers.
    pub workers: usize,
}

impl Default for ParallelStrategySpec {
    fn default() -> Self {
        Self { workers: 1 }
    }
}

/// Strategy selection and settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategySpec {
    /// Strategy type.
    #[serde(rename = "type", default)]
    pub kind: StrategyType,
    /// Scheduling mode.
    #[serde(default)]
    pub schedule: ScheduleType,
    /// Parallel strategy settings.
    #[serde(default)]
    pub parallel: ParallelStrategySpec,
}

impl StrategySpec {
    /// Parallel strategy with the given worker count and schedule.
    #[must_use]
    pub const fn parallel(workers: usize, schedule: ScheduleType) -> Self {
        Self {
            kind: StrategyType::Parallel,
            schedule,
            parallel: ParallelStrategySpec { workers },
        }
    }
}

/// Pinned Kyma software version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KymaParameters {
    /// Kyma version to upgrade to.
    #[serde(default)]
    pub version: String,
}

/// Pinned Kubernetes version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesParameters {
    /// Kubernetes version to upgrade to.
    #[serde(default)]
    pub kubernetes_version: String,
}

/// Operations queued for retry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryOperationParameters {
    /// Operation IDs appended by retry requests.
    #[serde(default)]
    pub retry_operations: Vec<OperationId>,
    /// Ignore maintenance windows for retried operations.
    #[serde(default)]
    pub immediate: bool,
}

/// Orchestration parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameters {
    /// Runtime selection.
    #[serde(default)]
    pub targets: TargetSpec,
    /// Dispatch strategy.
    #[serde(default)]
    pub strategy: StrategySpec,
    /// When true the executor is asked to simulate the upgrade.
    #[serde(default)]
    pub dry_run: bool,
    /// Pinned Kyma version (Kyma upgrades).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kyma: Option<KymaParameters>,
    /// Pinned Kubernetes version (cluster upgrades).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes: Option<KubernetesParameters>,
    /// Retry bookkeeping.
    #[serde(default)]
    pub retry_operation: RetryOperationParameters,
}

/// One fleet-wide upgrade campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Orchestration {
    /// Unique orchestration identifier.
    #[serde(rename = "orchestrationID")]
    pub id: OrchestrationId,
    /// Upgrade kind.
    #[serde(rename = "type")]
    pub kind: OrchestrationType,
    /// Current state.
    pub state: State,
    /// Human-readable progress note.
    #[serde(default)]
    pub description: String,
    /// Campaign parameters.
    pub parameters: Parameters,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl Orchestration {
    /// Creates a new pending orchestration.
    #[must_use]
    pub fn new(kind: OrchestrationType, parameters: Parameters) -> Self {
        let now = Utc::now();
        Self {
            id: OrchestrationId::generate(),
            kind,
            state: State::Pending,
            description: String::new(),
            parameters,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true if the orchestration reached a terminal state.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.state.is_finished()
    }

    /// Transitions to a new state and records the description.
    ///
    /// Transitioning to the current state only refreshes the description.
    ///
    /// # Errors
    ///
    /// Returns an error if the transition is invalid.
    #[tracing::instrument(skip(self, description), fields(orchestration_id = %self.id, from = %self.state, to = %target))]
    pub fn transition_to(&mut self, target: State, description: impl Into<String>) -> Result<()> {
        if self.state != target && !self.state.can_transition_to(target) {
            return Err(Error::InvalidStateTransition {
                from: self.state.to_string(),
                to: target.to_string(),
                reason: "invalid orchestration state transition".into(),
            });
        }

        self.state = target;
        self.description = description.into();
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Moves a non-finished orchestration to `failed`.
    ///
    /// This is the fatal path: any non-terminal state may fail.
    pub fn fail(&mut self, description: impl Into<String>) {
        if self.is_finished() {
            return;
        }
        self.state = State::Failed;
        self.description = description.into();
        self.updated_at = Utc::now();
    }
}

/// Filter for orchestration listings.
#[derive(Debug, Clone, Default)]
pub struct OrchestrationFilter {
    /// Only return orchestrations in these states (empty = all).
    pub states: Vec<State>,
    /// Only return orchestrations of this kind.
    pub kind: Option<OrchestrationType>,
}

impl OrchestrationFilter {
    /// Filter by state.
    #[must_use]
    pub fn with_states(states: impl IntoIterator<Item = State>) -> Self {
        Self {
            states: states.into_iter().collect(),
            kind: None,
        }
    }

    /// Returns true if the orchestration passes the filter.
    #[must_use]
    pub fn matches(&self, orchestration: &Orchestration) -> bool {
        (self.states.is_empty() || self.states.contains(&orchestration.state))
            && self.kind.map_or(true, |kind| kind == orchestration.kind)
    }
}
