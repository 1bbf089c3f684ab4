//! Creation and bookkeeping of runtime operations for an orchestration.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use kcp_core::OperationId;

use crate::config::OrchestrationConfig;
use crate::error::Result;
use crate::operation::{OperationFilter, Runtime, RuntimeOperation, ScheduledWindow};
use crate::orchestration::{
    KubernetesParameters, KymaParameters, Orchestration, OrchestrationType, State,
};
use crate::store::{InstanceStore, OperationStore};

/// Creates, resumes and cancels the runtime operations of an orchestration.
#[async_trait]
pub trait OperationFactory: Send + Sync {
    /// Creates and persists a pending operation for one runtime.
    async fn new_operation(
        &self,
        orchestration: &Orchestration,
        runtime: Runtime,
        maintenance_window: Option<ScheduledWindow>,
    ) -> Result<RuntimeOperation>;

    /// Loads the operations still to be driven, turning retried ones into pending.
    ///
    /// The result is ordered: in progress, then retried, then pending.
    async fn resume_operations(&self, orchestration: &Orchestration) -> Result<Vec<RuntimeOperation>>;

    /// Cancels every pending operation.
    async fn cancel_operations(&self, orchestration: &Orchestration) -> Result<()>;

    /// Fills an empty pinned version from the defaults and stamps the
    /// resulting version on operations without one.
    async fn stamp_versions(
        &self,
        orchestration: &mut Orchestration,
        operations: &mut [RuntimeOperation],
    ) -> Result<()>;
}

/// [`OperationFactory`] for Kyma and cluster upgrades.
pub struct UpgradeOperationFactory {
    operations: Arc<dyn OperationStore>,
    instances: Arc<dyn InstanceStore>,
    default_kyma_version: Option<String>,
    default_kubernetes_version: Option<String>,
}

impl std::fmt::Debug for UpgradeOperationFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpgradeOperationFactory")
            .field("default_kyma_version", &self.default_kyma_version)
            .field("default_kubernetes_version", &self.default_kubernetes_version)
            .finish_non_exhaustive()
    }
}

impl UpgradeOperationFactory {
    /// Creates the factory with default versions taken from `config`.
    #[must_use]
    pub fn new(
        operations: Arc<dyn OperationStore>,
        instances: Arc<dyn InstanceStore>,
        config: &OrchestrationConfig,
    ) -> Self {
        Self {
            operations,
            instances,
            default_kyma_version: config.default_kyma_version.clone(),
            default_kubernetes_version: config.default_kubernetes_version.clone(),
        }
    }

    /// The version the orchestration pins, if any.
    fn pinned_version(orchestration: &Orchestration) -> Option<&str> {
        let version = match orchestration.kind {
            OrchestrationType::UpgradeKyma => orchestration
                .parameters
                .kyma
                .as_ref()
                .map(|kyma| kyma.version.as_str()),
            OrchestrationType::UpgradeCluster => orchestration
                .parameters
                .kubernetes
                .as_ref()
                .map(|kubernetes| kubernetes.kubernetes_version.as_str()),
        };
        version.filter(|version| !version.is_empty())
    }
}

#[async_trait]
impl OperationFactory for UpgradeOperationFactory {
    async fn new_operation(
        &self,
        orchestration: &Orchestration,
        runtime: Runtime,
        maintenance_window: Option<ScheduledWindow>,
    ) -> Result<RuntimeOperation> {
        let instance_parameters = match self.instances.get_by_id(&runtime.instance_id).await {
            Ok(instance) => instance.provisioning_parameters,
            Err(error) if error.is_not_found() => {
                tracing::warn!(instance_id = %runtime.instance_id, "instance not found, creating operation without provisioning parameters");
                serde_json::Value::Null
            }
            Err(error) => return Err(error),
        };

        let now = Utc::now();
        let operation = RuntimeOperation {
            id: OperationId::generate(),
            orchestration_id: orchestration.id.clone(),
            kind: orchestration.kind,
            runtime,
            dry_run: orchestration.parameters.dry_run,
            state: State::Pending,
            description: "Operation created".to_string(),
            maintenance_window,
            target_version: Self::pinned_version(orchestration).map(str::to_string),
            instance_parameters,
            created_at: now,
            updated_at: now,
        };
        self.operations.insert_operation(&operation).await?;
        Ok(operation)
    }

    async fn resume_operations(&self, orchestration: &Orchestration) -> Result<Vec<RuntimeOperation>> {
        let operations = self
            .operations
            .list_operations_by_orchestration_id(
                &orchestration.id,
                &OperationFilter::with_states([State::InProgress, State::Retrying, State::Pending]),
            )
            .await?;

        let immediate = orchestration.parameters.retry_operation.immediate;
        let mut in_progress = Vec::new();
        let mut retried = Vec::new();
        let mut pending = Vec::new();
        for mut operation in operations {
            match operation.state {
                State::InProgress => in_progress.push(operation),
                State::Retrying => {
                    operation.set_state(State::Pending, "Operation retried");
                    if immediate {
                        operation.maintenance_window = None;
                    }
                    self.operations.update_operation(&operation).await?;
                    retried.push(operation);
                }
                _ => pending.push(operation),
            }
        }

        tracing::debug!(
            orchestration_id = %orchestration.id,
            in_progress = in_progress.len(),
            retried = retried.len(),
            pending = pending.len(),
            "resumed operations"
        );
        in_progress.extend(retried);
        in_progress.extend(pending);
        Ok(in_progress)
    }

    #[tracing::instrument(skip_all, fields(orchestration_id = %orchestration.id))]
    async fn cancel_operations(&self, orchestration: &Orchestration) -> Result<()> {
        let pending = self
            .operations
            .list_operations_by_orchestration_id(
                &orchestration.id,
                &OperationFilter::with_states([State::Pending]),
            )
            .await?;
        for mut operation in pending {
            operation.set_state(State::Canceled, "Orchestration was canceled");
            self.operations.update_operation(&operation).await?;
        }
        Ok(())
    }

    async fn stamp_versions(
        &self,
        orchestration: &mut Orchestration,
        operations: &mut [RuntimeOperation],
    ) -> Result<()> {
        if Self::pinned_version(orchestration).is_none() {
            match orchestration.kind {
                OrchestrationType::UpgradeKyma => {
                    if let Some(version) = &self.default_kyma_version {
                        orchestration.parameters.kyma = Some(KymaParameters {
                            version: version.clone(),
                        });
                    }
                }
                OrchestrationType::UpgradeCluster => {
                    if let Some(version) = &self.default_kubernetes_version {
                        orchestration.parameters.kubernetes = Some(KubernetesParameters {
                            kubernetes_version: version.clone(),
                        });
                    }
                }
            }
        }

        let Some(version) = Self::pinned_version(orchestration).map(str::to_string) else {
            return Ok(());
        };
        for operation in operations.iter_mut().filter(|op| op.target_version.is_none()) {
            operation.target_version = Some(version.clone());
            operation.updated_at = Utc::now();
            self.operations.update_operation(operation).await?;
        }
        Ok(())
    }
}
