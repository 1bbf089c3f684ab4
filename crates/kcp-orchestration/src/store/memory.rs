//! In-memory store implementations for testing.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: No durability, no cross-process coordination
//! - **No persistence**: All state is lost when the process exits

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use kcp_core::{OperationId, OrchestrationId};

use super::{Instance, InstanceStore, OperationStore, OrchestrationStore};
use crate::error::{Error, Result};
use crate::operation::{OperationFilter, OperationStats, RuntimeOperation};
use crate::orchestration::{Orchestration, OrchestrationFilter, OrchestrationType};

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

/// In-memory [`OrchestrationStore`].
#[derive(Debug, Default)]
pub struct InMemoryOrchestrationStore {
    orchestrations: RwLock<HashMap<OrchestrationId, Orchestration>>,
}

impl InMemoryOrchestrationStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrchestrationStore for InMemoryOrchestrationStore {
    async fn get_by_id(&self, id: &OrchestrationId) -> Result<Orchestration> {
        let orchestrations = self.orchestrations.read().map_err(poison_err)?;
        orchestrations
            .get(id)
            .cloned()
            .ok_or_else(|| Error::OrchestrationNotFound {
                orchestration_id: id.clone(),
            })
    }

    async fn insert(&self, orchestration: &Orchestration) -> Result<()> {
        let mut orchestrations = self.orchestrations.write().map_err(poison_err)?;
        if orchestrations.contains_key(&orchestration.id) {
            return Err(Error::storage(format!(
                "orchestration {} already exists",
                orchestration.id
            )));
        }
        orchestrations.insert(orchestration.id.clone(), orchestration.clone());
        Ok(())
    }

    async fn update(&self, orchestration: &Orchestration) -> Result<()> {
        let mut orchestrations = self.orchestrations.write().map_err(poison_err)?;
        let Some(stored) = orchestrations.get_mut(&orchestration.id) else {
            return Err(Error::OrchestrationNotFound {
                orchestration_id: orchestration.id.clone(),
            });
        };
        stored.clone_from(orchestration);
        Ok(())
    }

    async fn list(&self, filter: &OrchestrationFilter) -> Result<Vec<Orchestration>> {
        let mut result: Vec<Orchestration> = {
            let orchestrations = self.orchestrations.read().map_err(poison_err)?;
            orchestrations
                .values()
                .filter(|o| filter.matches(o))
                .cloned()
                .collect()
        };
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(result)
    }
}

/// In-memory [`OperationStore`].
#[derive(Debug, Default)]
pub struct InMemoryOperationStore {
    operations: RwLock<HashMap<OperationId, RuntimeOperation>>,
}

impl InMemoryOperationStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn collect_sorted(
        &self,
        predicate: impl Fn(&RuntimeOperation) -> bool,
    ) -> Result<Vec<RuntimeOperation>> {
        let mut result: Vec<RuntimeOperation> = {
            let operations = self.operations.read().map_err(poison_err)?;
            operations.values().filter(|op| predicate(op)).cloned().collect()
        };
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(result)
    }
}

#[async_trait]
impl OperationStore for InMemoryOperationStore {
    async fn insert_operation(&self, operation: &RuntimeOperation) -> Result<()> {
        let mut operations = self.operations.write().map_err(poison_err)?;
        if operations.contains_key(&operation.id) {
            return Err(Error::storage(format!(
                "operation {} already exists",
                operation.id
            )));
        }
        operations.insert(operation.id.clone(), operation.clone());
        Ok(())
    }

    async fn update_operation(&self, operation: &RuntimeOperation) -> Result<()> {
        let mut operations = self.operations.write().map_err(poison_err)?;
        let Some(stored) = operations.get_mut(&operation.id) else {
            return Err(Error::OperationNotFound {
                operation_id: operation.id.clone(),
            });
        };
        stored.clone_from(operation);
        Ok(())
    }

    async fn get_operation_by_id(&self, id: &OperationId) -> Result<RuntimeOperation> {
        let operations = self.operations.read().map_err(poison_err)?;
        operations
            .get(id)
            .cloned()
            .ok_or_else(|| Error::OperationNotFound {
                operation_id: id.clone(),
            })
    }

    async fn list_operations_by_orchestration_id(
        &self,
        orchestration_id: &OrchestrationId,
        filter: &OperationFilter,
    ) -> Result<Vec<RuntimeOperation>> {
        self.collect_sorted(|op| &op.orchestration_id == orchestration_id && filter.matches(op))
    }

    async fn list_operations_by_instance_id(
        &self,
        kind: OrchestrationType,
        instance_id: &str,
    ) -> Result<Vec<RuntimeOperation>> {
        self.collect_sorted(|op| op.kind == kind && op.runtime.instance_id == instance_id)
    }

    async fn get_operation_stats_for_orchestration(
        &self,
        orchestration_id: &OrchestrationId,
    ) -> Result<OperationStats> {
        let operations = self.operations.read().map_err(poison_err)?;
        Ok(OperationStats::from_operations(
            operations
                .values()
                .filter(|op| &op.orchestration_id == orchestration_id),
        ))
    }
}

/// In-memory [`InstanceStore`].
#[derive(Debug, Default)]
pub struct InMemoryInstanceStore {
    instances: RwLock<HashMap<String, Instance>>,
}

impl InMemoryInstanceStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn upsert(&self, instance: Instance) -> Result<()> {
        self.instances
            .write()
            .map_err(poison_err)?
            .insert(instance.instance_id.clone(), instance);
        Ok(())
    }
}

#[async_trait]
impl InstanceStore for InMemoryInstanceStore {
    async fn get_by_id(&self, instance_id: &str) -> Result<Instance> {
        let instances = self.instances.read().map_err(poison_err)?;
        instances
            .get(instance_id)
            .cloned()
            .ok_or_else(|| Error::InstanceNotFound {
                instance_id: instance_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Runtime;
    use crate::orchestration::{Parameters, State};
    use chrono::{Duration, NaiveTime, Utc};

    fn operation(orchestration_id: &str, instance_id: &str, state: State) -> RuntimeOperation {
        let now = Utc::now();
        RuntimeOperation {
            id: OperationId::generate(),
            orchestration_id: OrchestrationId::new(orchestration_id),
            kind: OrchestrationType::UpgradeKyma,
            runtime: Runtime {
                instance_id: instance_id.into(),
                runtime_id: format!("rt-{instance_id}"),
                global_account_id: "GA1".into(),
                sub_account_id: "SA1".into(),
                shoot_name: "shoot".into(),
                plan_name: "azure".into(),
                region: "westeurope".into(),
                maintenance_window_begin: NaiveTime::MIN,
                maintenance_window_end: NaiveTime::MIN,
                maintenance_days: vec![],
            },
            dry_run: false,
            state,
            description: String::new(),
            maintenance_window: None,
            target_version: None,
            instance_parameters: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn orchestration_crud() {
        let store = InMemoryOrchestrationStore::new();
        let mut orchestration =
            Orchestration::new(OrchestrationType::UpgradeKyma, Parameters::default());

        assert!(store.get_by_id(&orchestration.id).await.unwrap_err().is_not_found());
        assert!(store.update(&orchestration).await.unwrap_err().is_not_found());

        store.insert(&orchestration).await.unwrap();
        assert!(store.insert(&orchestration).await.is_err());

        orchestration.transition_to(State::InProgress, "running").unwrap();
        store.update(&orchestration).await.unwrap();
        let loaded = store.get_by_id(&orchestration.id).await.unwrap();
        assert_eq!(loaded.state, State::InProgress);

        let pending = store
            .list(&OrchestrationFilter::with_states([State::Pending]))
            .await
            .unwrap();
        assert!(pending.is_empty());
        assert_eq!(store.list(&OrchestrationFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn operations_by_orchestration_and_stats() {
        let store = InMemoryOperationStore::new();
        let mut first = operation("o-1", "i-1", State::Pending);
        first.created_at -= Duration::seconds(10);
        let second = operation("o-1", "i-2", State::Failed);
        let other = operation("o-2", "i-1", State::Pending);
        for op in [&second, &first, &other] {
            store.insert_operation(op).await.unwrap();
        }

        let listed = store
            .list_operations_by_orchestration_id(&OrchestrationId::new("o-1"), &OperationFilter::default())
            .await
            .unwrap();
        assert_eq!(listed.iter().map(|op| &op.id).collect::<Vec<_>>(), vec![&first.id, &second.id]);

        let failed = store
            .list_operations_by_orchestration_id(
                &OrchestrationId::new("o-1"),
                &OperationFilter::with_states([State::Failed]),
            )
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);

        let stats = store
            .get_operation_stats_for_orchestration(&OrchestrationId::new("o-1"))
            .await
            .unwrap();
        assert_eq!(stats.count(State::Pending), 1);
        assert_eq!(stats.count(State::Failed), 1);

        let by_instance = store
            .list_operations_by_instance_id(OrchestrationType::UpgradeKyma, "i-1")
            .await
            .unwrap();
        assert_eq!(by_instance.len(), 2);
        assert!(store
            .list_operations_by_instance_id(OrchestrationType::UpgradeCluster, "i-1")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn update_missing_operation_is_not_found() {
        let store = InMemoryOperationStore::new();
        let op = operation("o-1", "i-1", State::Pending);
        assert!(store.update_operation(&op).await.unwrap_err().is_not_found());
        assert!(store.get_operation_by_id(&op.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn instance_lookup() {
        let store = InMemoryInstanceStore::new();
        store
            .upsert(Instance {
                instance_id: "i-1".into(),
                runtime_id: "rt-1".into(),
                global_account_id: "GA1".into(),
                sub_account_id: "SA1".into(),
                plan_name: "azure".into(),
                provisioning_parameters: serde_json::json!({"name": "c1"}),
                created_at: Utc::now(),
            })
            .unwrap();
        assert_eq!(store.get_by_id("i-1").await.unwrap().runtime_id, "rt-1");
        assert!(store.get_by_id("i-2").await.unwrap_err().is_not_found());
    }
}
