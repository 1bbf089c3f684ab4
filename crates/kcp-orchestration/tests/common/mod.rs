//! Shared fixtures for orchestration integration tests.

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};

use kcp_core::{OperationId, OrchestrationId};
use kcp_orchestration::cancel::Canceler;
use kcp_orchestration::config::OrchestrationConfig;
use kcp_orchestration::error::Error;
use kcp_orchestration::executor::{ExecutorError, OperationExecutor};
use kcp_orchestration::factory::UpgradeOperationFactory;
use kcp_orchestration::maintenance::StaticConfigSource;
use kcp_orchestration::manager::OrchestrationManager;
use kcp_orchestration::operation::{Runtime, RuntimeOperation, ScheduledWindow};
use kcp_orchestration::orchestration::{
    Orchestration, OrchestrationFilter, OrchestrationType, Parameters, State,
};
use kcp_orchestration::queue::memory::InMemoryTaskQueue;
use kcp_orchestration::resolver::memory::InMemoryFleet;
use kcp_orchestration::resolver::{
    GardenerRuntimeResolver, LifecycleOperation, LifecycleOperationType, LifecycleState,
    RuntimeRecord, Shoot, ShootMaintenance, GLOBAL_ACCOUNT_LABEL, RUNTIME_ID_ANNOTATION,
    SUB_ACCOUNT_LABEL,
};
use kcp_orchestration::retry::RetryEngine;
use kcp_orchestration::store::memory::{
    InMemoryInstanceStore, InMemoryOperationStore, InMemoryOrchestrationStore,
};
use kcp_orchestration::store::{Instance, OperationStore, OrchestrationStore};
use kcp_orchestration::strategy::ParallelStrategy;

/// Intervals short enough for tests to finish quickly.
pub fn fast_config() -> OrchestrationConfig {
    OrchestrationConfig {
        poll_interval: Duration::from_millis(10),
        retry_backoff: Duration::from_millis(50),
        cancel_poll_interval: Duration::from_millis(10),
        ..OrchestrationConfig::default()
    }
}

/// A shoot annotated with `runtime_id`.
pub fn shoot(name: &str, runtime_id: &str, global_account: &str, region: &str) -> Shoot {
    Shoot {
        name: name.to_string(),
        annotations: BTreeMap::from([(RUNTIME_ID_ANNOTATION.to_string(), runtime_id.to_string())]),
        labels: BTreeMap::from([
            (GLOBAL_ACCOUNT_LABEL.to_string(), global_account.to_string()),
            (SUB_ACCOUNT_LABEL.to_string(), format!("sa-{runtime_id}")),
        ]),
        region: region.to_string(),
        maintenance: ShootMaintenance {
            time_window_begin: "010000+0000".to_string(),
            time_window_end: "030000+0000".to_string(),
        },
    }
}

/// A runtime record whose last lifecycle operation is a succeeded provisioning.
pub fn active_record(runtime_id: &str, instance_id: &str) -> RuntimeRecord {
    record_with(runtime_id, instance_id, LifecycleOperationType::Provision)
}

/// A runtime record whose last lifecycle operation is a succeeded `kind`.
pub fn record_with(runtime_id: &str, instance_id: &str, kind: LifecycleOperationType) -> RuntimeRecord {
    let provisioned = Utc::now() - chrono::Duration::days(30);
    let mut operations = vec![LifecycleOperation {
        kind: LifecycleOperationType::Provision,
        state: LifecycleState::Succeeded,
        created_at: provisioned,
    }];
    if kind != LifecycleOperationType::Provision {
        operations.push(LifecycleOperation {
            kind,
            state: LifecycleState::Succeeded,
            created_at: provisioned + chrono::Duration::days(1),
        });
    }
    RuntimeRecord {
        runtime_id: runtime_id.to_string(),
        instance_id: instance_id.to_string(),
        plan_name: "azure".to_string(),
        operations,
    }
}

/// A detached runtime value.
pub fn runtime(runtime_id: &str) -> Runtime {
    Runtime {
        instance_id: format!("instance-{runtime_id}"),
        runtime_id: runtime_id.to_string(),
        global_account_id: "GA1".to_string(),
        sub_account_id: "SA1".to_string(),
        shoot_name: format!("shoot-{runtime_id}"),
        plan_name: "azure".to_string(),
        region: "westeurope".to_string(),
        maintenance_window_begin: NaiveTime::MIN,
        maintenance_window_end: NaiveTime::MIN,
        maintenance_days: Vec::new(),
    }
}

/// A pending operation for `runtime_id` owned by `orchestration_id`.
pub fn operation(
    orchestration_id: &OrchestrationId,
    runtime_id: &str,
    maintenance_window: Option<ScheduledWindow>,
) -> RuntimeOperation {
    operation_at(orchestration_id, runtime_id, maintenance_window, Utc::now())
}

/// Like [`operation`] with an explicit creation time.
pub fn operation_at(
    orchestration_id: &OrchestrationId,
    runtime_id: &str,
    maintenance_window: Option<ScheduledWindow>,
    created_at: DateTime<Utc>,
) -> RuntimeOperation {
    RuntimeOperation {
        id: OperationId::generate(),
        orchestration_id: orchestration_id.clone(),
        kind: OrchestrationType::UpgradeKyma,
        runtime: runtime(runtime_id),
        dry_run: false,
        state: State::Pending,
        description: String::new(),
        maintenance_window,
        target_version: None,
        instance_parameters: serde_json::Value::Null,
        created_at,
        updated_at: created_at,
    }
}

/// A window starting `from_now` after the current time.
pub fn window_in(from_now: chrono::Duration) -> ScheduledWindow {
    let begin = Utc::now() + from_now;
    ScheduledWindow {
        begin,
        end: begin + chrono::Duration::hours(1),
    }
}

/// Marks operations succeeded, or failed for runtimes listed as failing.
#[derive(Debug)]
pub struct MarkingExecutor {
    operations: Arc<InMemoryOperationStore>,
    failing: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl MarkingExecutor {
    pub fn new(operations: Arc<InMemoryOperationStore>) -> Self {
        Self {
            operations,
            failing: Mutex::new(HashSet::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn fail_runtime(&self, runtime_id: &str) {
        self.failing.lock().unwrap().insert(runtime_id.to_string());
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OperationExecutor for MarkingExecutor {
    async fn execute(&self, operation_id: &OperationId) -> Result<Duration, ExecutorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut operation = self
            .operations
            .get_operation_by_id(operation_id)
            .await
            .map_err(|error| ExecutorError::Aborted {
                operation_id: operation_id.clone(),
                message: error.to_string(),
            })?;
        let fails = self
            .failing
            .lock()
            .unwrap()
            .contains(&operation.runtime.runtime_id);
        if fails {
            operation.set_state(State::Failed, "upgrade failed");
            self.operations.update_operation(&operation).await.unwrap();
            return Err(ExecutorError::Failed {
                operation_id: operation_id.clone(),
                message: "upgrade failed".to_string(),
            });
        }
        operation.set_state(State::Succeeded, "upgrade completed");
        self.operations.update_operation(&operation).await.unwrap();
        Ok(Duration::ZERO)
    }
}

/// Counts calls per operation and asks for `delays` requeues before finishing.
#[derive(Debug, Default)]
pub struct SteppingExecutor {
    delays: Vec<Duration>,
    calls: Mutex<HashMap<OperationId, usize>>,
    order: Mutex<Vec<OperationId>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    hold: Duration,
}

impl SteppingExecutor {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self {
            delays,
            ..Self::default()
        }
    }

    /// Keeps each call busy for `hold` so concurrency can be observed.
    pub fn holding(hold: Duration) -> Self {
        Self {
            hold,
            ..Self::default()
        }
    }

    pub fn calls_for(&self, id: &OperationId) -> usize {
        self.calls.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Operation IDs in the order of their first call.
    pub fn order(&self) -> Vec<OperationId> {
        self.order.lock().unwrap().clone()
    }
}

#[async_trait]
impl OperationExecutor for SteppingExecutor {
    async fn execute(&self, operation_id: &OperationId) -> Result<Duration, ExecutorError> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        if !self.hold.is_zero() {
            tokio::time::sleep(self.hold).await;
        }
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let entry = calls.entry(operation_id.clone()).or_insert(0);
            *entry += 1;
            *entry
        };
        if call == 1 {
            self.order.lock().unwrap().push(operation_id.clone());
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(self.delays.get(call - 1).copied().unwrap_or(Duration::ZERO))
    }
}

/// Wraps the in-memory store with switchable failures.
#[derive(Debug)]
pub struct FlakyOrchestrationStore {
    inner: Arc<InMemoryOrchestrationStore>,
    failing_updates: AtomicUsize,
    failing_reads: AtomicUsize,
    vanished: AtomicBool,
}

impl FlakyOrchestrationStore {
    pub fn new(inner: Arc<InMemoryOrchestrationStore>) -> Self {
        Self {
            inner,
            failing_updates: AtomicUsize::new(0),
            failing_reads: AtomicUsize::new(0),
            vanished: AtomicBool::new(false),
        }
    }

    /// Fails the next `count` updates with a storage error.
    pub fn fail_updates(&self, count: usize) {
        self.failing_updates.store(count, Ordering::SeqCst);
    }

    /// Fails the next `count` reads with a storage error.
    pub fn fail_reads(&self, count: usize) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    /// Makes every orchestration look deleted.
    pub fn vanish(&self) {
        self.vanished.store(true, Ordering::SeqCst);
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl OrchestrationStore for FlakyOrchestrationStore {
    async fn get_by_id(&self, id: &OrchestrationId) -> kcp_orchestration::Result<Orchestration> {
        if self.vanished.load(Ordering::SeqCst) {
            return Err(Error::OrchestrationNotFound {
                orchestration_id: id.clone(),
            });
        }
        if Self::take_failure(&self.failing_reads) {
            return Err(Error::storage("orchestration table unavailable"));
        }
        self.inner.get_by_id(id).await
    }

    async fn insert(&self, orchestration: &Orchestration) -> kcp_orchestration::Result<()> {
        self.inner.insert(orchestration).await
    }

    async fn update(&self, orchestration: &Orchestration) -> kcp_orchestration::Result<()> {
        if Self::take_failure(&self.failing_updates) {
            return Err(Error::storage("orchestration table unavailable"));
        }
        self.inner.update(orchestration).await
    }

    async fn list(&self, filter: &OrchestrationFilter) -> kcp_orchestration::Result<Vec<Orchestration>> {
        self.inner.list(filter).await
    }
}

/// In-memory collaborators wired together.
pub struct Harness {
    pub orchestrations: Arc<InMemoryOrchestrationStore>,
    pub operations: Arc<InMemoryOperationStore>,
    pub instances: Arc<InMemoryInstanceStore>,
    pub fleet: Arc<InMemoryFleet>,
    pub executor: Arc<MarkingExecutor>,
    pub config_source: Arc<StaticConfigSource>,
    pub queue: Arc<InMemoryTaskQueue>,
    pub config: OrchestrationConfig,
}

impl Harness {
    pub fn new() -> Self {
        let operations = Arc::new(InMemoryOperationStore::new());
        Self {
            orchestrations: Arc::new(InMemoryOrchestrationStore::new()),
            executor: Arc::new(MarkingExecutor::new(Arc::clone(&operations))),
            operations,
            instances: Arc::new(InMemoryInstanceStore::new()),
            fleet: Arc::new(InMemoryFleet::new()),
            config_source: Arc::new(StaticConfigSource::new()),
            queue: Arc::new(InMemoryTaskQueue::new()),
            config: fast_config(),
        }
    }

    /// Registers an active runtime with its shoot, record and instance.
    pub fn add_runtime(&self, runtime_id: &str, global_account: &str, region: &str) {
        self.add_runtime_with_shoot(shoot(&format!("shoot-{runtime_id}"), runtime_id, global_account, region));
    }

    pub fn add_runtime_with_shoot(&self, shoot: Shoot) {
        let runtime_id = shoot.runtime_id().unwrap().to_string();
        let instance_id = format!("instance-{runtime_id}");
        self.instances
            .upsert(Instance {
                instance_id: instance_id.clone(),
                runtime_id: runtime_id.clone(),
                global_account_id: shoot.labels[GLOBAL_ACCOUNT_LABEL].clone(),
                sub_account_id: shoot.labels[SUB_ACCOUNT_LABEL].clone(),
                plan_name: "azure".to_string(),
                provisioning_parameters: serde_json::json!({"region": shoot.region}),
                created_at: Utc::now(),
            })
            .unwrap();
        self.fleet.add(shoot, active_record(&runtime_id, &instance_id)).unwrap();
    }

    pub fn resolver(&self) -> Arc<GardenerRuntimeResolver> {
        Arc::new(GardenerRuntimeResolver::new(self.fleet.clone(), self.fleet.clone()))
    }

    pub fn manager(&self) -> OrchestrationManager {
        self.manager_with(self.orchestrations.clone()).0
    }

    /// A manager reading orchestrations from `orchestrations`, with its strategy.
    pub fn manager_with(
        &self,
        orchestrations: Arc<dyn OrchestrationStore>,
    ) -> (OrchestrationManager, Arc<ParallelStrategy>) {
        let factory = UpgradeOperationFactory::new(
            self.operations.clone(),
            self.instances.clone(),
            &self.config,
        );
        let strategy = Arc::new(ParallelStrategy::new(
            self.executor.clone(),
            Arc::clone(&orchestrations),
            self.config.cancel_poll_interval,
        ));
        let manager = OrchestrationManager::new(
            orchestrations,
            self.operations.clone(),
            self.resolver(),
            Arc::new(factory),
            strategy.clone(),
            self.config_source.clone(),
            self.config.clone(),
        );
        (manager, strategy)
    }

    /// A store over the harness orchestrations whose failures tests control.
    pub fn flaky_store(&self) -> Arc<FlakyOrchestrationStore> {
        Arc::new(FlakyOrchestrationStore::new(self.orchestrations.clone()))
    }

    pub fn retry_engine(&self) -> RetryEngine {
        RetryEngine::new(
            self.orchestrations.clone(),
            self.operations.clone(),
            self.queue.clone(),
        )
    }

    pub fn canceler(&self) -> Canceler {
        Canceler::new(self.orchestrations.clone(), self.queue.clone())
    }

    /// Inserts a pending orchestration.
    pub async fn create(&self, parameters: Parameters) -> Orchestration {
        let orchestration = Orchestration::new(OrchestrationType::UpgradeKyma, parameters);
        self.orchestrations.insert(&orchestration).await.unwrap();
        orchestration
    }

    pub async fn orchestration(&self, id: &OrchestrationId) -> Orchestration {
        self.orchestrations.get_by_id(id).await.unwrap()
    }

    pub async fn operations_of(&self, id: &OrchestrationId) -> Vec<RuntimeOperation> {
        self.operations
            .list_operations_by_orchestration_id(id, &Default::default())
            .await
            .unwrap()
    }

    /// Polls until the orchestration reaches `state` or the timeout elapses.
    pub async fn wait_for_state(&self, id: &OrchestrationId, state: State) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.orchestration(id).await.state != state {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("orchestration did not reach expected state");
    }
}
