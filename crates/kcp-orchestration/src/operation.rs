//! Runtime operations: one unit of upgrade work for exactly one runtime.
//!
//! Operations belong to one orchestration (by `orchestration_id`) and one
//! instance (by `runtime.instance_id`). They are never deleted; a newer
//! operation for the same instance supersedes older ones.

use std::collections::HashMap;

use chrono::{DateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use kcp_core::{OperationId, OrchestrationId};

use crate::orchestration::{OrchestrationType, State};

/// A managed cluster selected for an orchestration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Runtime {
    /// Service instance ID.
    #[serde(rename = "instanceID")]
    pub instance_id: String,
    /// Runtime ID.
    #[serde(rename = "runtimeID")]
    pub runtime_id: String,
    /// Global account ID.
    #[serde(rename = "globalAccountID")]
    pub global_account_id: String,
    /// Subaccount ID.
    #[serde(rename = "subAccountID")]
    pub sub_account_id: String,
    /// Name of the shoot cluster.
    pub shoot_name: String,
    /// Service plan name.
    pub plan_name: String,
    /// Infrastructure region.
    pub region: String,
    /// Maintenance window start (UTC time of day).
    pub maintenance_window_begin: NaiveTime,
    /// Maintenance window end (UTC time of day).
    pub maintenance_window_end: NaiveTime,
    /// Weekdays on which the window is valid. Empty means every day.
    #[serde(default)]
    pub maintenance_days: Vec<Weekday>,
}

/// A concrete maintenance window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledWindow {
    /// Window start.
    pub begin: DateTime<Utc>,
    /// Window end.
    pub end: DateTime<Utc>,
}

/// One unit of work: upgrading exactly one runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeOperation {
    /// Unique operation identifier.
    #[serde(rename = "operationID")]
    pub id: OperationId,
    /// Owning orchestration.
    #[serde(rename = "orchestrationID")]
    pub orchestration_id: OrchestrationId,
    /// Upgrade kind.
    #[serde(rename = "type")]
    pub kind: OrchestrationType,
    /// Target runtime.
    pub runtime: Runtime,
    /// Whether the executor should only simulate the upgrade.
    #[serde(default)]
    pub dry_run: bool,
    /// Current state.
    pub state: State,
    /// Human-readable progress note.
    #[serde(default)]
    pub description: String,
    /// Next maintenance window, when scheduled by maintenance window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintenance_window: Option<ScheduledWindow>,
    /// Kyma or Kubernetes version to upgrade to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_version: Option<String>,
    /// Provisioning parameters of the instance.
    #[serde(default)]
    pub instance_parameters: serde_json::Value,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl RuntimeOperation {
    /// Returns true if the operation reached a terminal state.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.state.is_finished()
    }

    /// Sets state and description, refreshing `updated_at`.
    pub fn set_state(&mut self, state: State, description: impl Into<String>) {
        self.state = state;
        self.description = description.into();
        self.updated_at = Utc::now();
    }
}

/// Filter for operation listings.
#[derive(Debug, Clone, Default)]
pub struct OperationFilter {
    /// Only return operations in these states (empty = all).
    pub states: Vec<State>,
}

impl OperationFilter {
    /// Filter by state.
    #[must_use]
    pub fn with_states(states: impl IntoIterator<Item = State>) -> Self {
        Self {
            states: states.into_iter().collect(),
        }
    }

    /// Returns true if the operation passes the filter.
    #[must_use]
    pub fn matches(&self, operation: &RuntimeOperation) -> bool {
        self.states.is_empty() || self.states.contains(&operation.state)
    }
}

/// Operation counts per state for one orchestration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationStats {
    counts: HashMap<State, usize>,
}

impl OperationStats {
    /// Builds statistics from a set of operations.
    #[must_use]
    pub fn from_operations<'a>(operations: impl IntoIterator<Item = &'a RuntimeOperation>) -> Self {
        let mut counts = HashMap::new();
        for operation in operations {
            *counts.entry(operation.state).or_insert(0) += 1;
        }
        Self { counts }
    }

    /// Returns the number of operations in `state`.
    #[must_use]
    pub fn count(&self, state: State) -> usize {
        self.counts.get(&state).copied().unwrap_or(0)
    }

    /// Number of operations that still need a worker (`in progress` + `pending`).
    #[must_use]
    pub fn not_finished(&self) -> usize {
        self.count(State::InProgress) + self.count(State::Pending)
    }
}
