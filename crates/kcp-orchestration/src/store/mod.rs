//! Persistence for orchestrations, runtime operations and instances.
//!
//! Records are mutated through load-modify-persist; there is no
//! compare-and-swap. Writers race on the orchestration state and the manager
//! re-fetches the record before its terminal write.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kcp_core::{OperationId, OrchestrationId};

use crate::error::Result;
use crate::operation::{OperationFilter, OperationStats, RuntimeOperation};
use crate::orchestration::{Orchestration, OrchestrationFilter, OrchestrationType};

/// Storage for orchestration records.
#[async_trait]
pub trait OrchestrationStore: Send + Sync {
    /// Loads an orchestration.
    ///
    /// Returns [`crate::Error::OrchestrationNotFound`] if it does not exist.
    async fn get_by_id(&self, id: &OrchestrationId) -> Result<Orchestration>;

    /// Stores a new orchestration.
    async fn insert(&self, orchestration: &Orchestration) -> Result<()>;

    /// Overwrites an existing orchestration.
    ///
    /// Returns [`crate::Error::OrchestrationNotFound`] if it does not exist.
    async fn update(&self, orchestration: &Orchestration) -> Result<()>;

    /// Lists orchestrations passing the filter, oldest first.
    async fn list(&self, filter: &OrchestrationFilter) -> Result<Vec<Orchestration>>;
}

/// Storage for runtime operations.
#[async_trait]
pub trait OperationStore: Send + Sync {
    /// Stores a new operation.
    async fn insert_operation(&self, operation: &RuntimeOperation) -> Result<()>;

    /// Overwrites an existing operation.
    async fn update_operation(&self, operation: &RuntimeOperation) -> Result<()>;

    /// Loads an operation.
    async fn get_operation_by_id(&self, id: &OperationId) -> Result<RuntimeOperation>;

    /// Lists the operations of one orchestration, oldest first.
    async fn list_operations_by_orchestration_id(
        &self,
        orchestration_id: &OrchestrationId,
        filter: &OperationFilter,
    ) -> Result<Vec<RuntimeOperation>>;

    /// Lists every operation of `kind` ever created for an instance, oldest first.
    async fn list_operations_by_instance_id(
        &self,
        kind: OrchestrationType,
        instance_id: &str,
    ) -> Result<Vec<RuntimeOperation>>;

    /// Counts the operations of one orchestration per state.
    async fn get_operation_stats_for_orchestration(
        &self,
        orchestration_id: &OrchestrationId,
    ) -> Result<OperationStats>;
}

/// A provisioned service instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
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
    /// Service plan name.
    pub plan_name: String,
    /// Parameters the instance was provisioned with.
    #[serde(default)]
    pub provisioning_parameters: serde_json::Value,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Read access to service instances.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Loads an instance.
    ///
    /// Returns [`crate::Error::InstanceNotFound`] if it does not exist.
    async fn get_by_id(&self, instance_id: &str) -> Result<Instance>;
}
