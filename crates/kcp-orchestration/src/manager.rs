//! Drives one orchestration from `pending` to a terminal state.
//!
//! [`OrchestrationManager::execute`] is one long call per orchestration. It
//! resolves or resumes the runtime operations, hands them to a strategy, polls
//! the operation statistics until the work is done, and writes the terminal
//! state. The return value is the delay after which the orchestration should
//! be processed again; zero means there is nothing left to do.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::Instrument;

use kcp_core::observability::orchestration_span;
use kcp_core::OrchestrationId;

use crate::config::OrchestrationConfig;
use crate::error::{Error, Result};
use crate::factory::OperationFactory;
use crate::maintenance::{next_window, CompiledMaintenancePolicy, ConfigSource, MaintenancePolicy};
use crate::metrics::{OrchestrationMetrics, TimingGuard};
use crate::operation::{OperationFilter, RuntimeOperation};
use crate::orchestration::{Orchestration, ScheduleType, State, StrategyType};
use crate::queue::Processor;
use crate::resolver::RuntimeResolver;
use crate::store::{OperationStore, OrchestrationStore};
use crate::strategy::{ExecutionId, Strategy};

/// Executes orchestrations.
pub struct OrchestrationManager {
    orchestrations: Arc<dyn OrchestrationStore>,
    operations: Arc<dyn OperationStore>,
    resolver: Arc<dyn RuntimeResolver>,
    factory: Arc<dyn OperationFactory>,
    strategies: HashMap<StrategyType, Arc<dyn Strategy>>,
    config_source: Arc<dyn ConfigSource>,
    config: OrchestrationConfig,
    metrics: OrchestrationMetrics,
}

impl std::fmt::Debug for OrchestrationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestrationManager")
            .field("strategies", &self.strategies.keys().collect::<Vec<_>>())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl OrchestrationManager {
    /// Creates a manager with `parallel` registered as the parallel strategy.
    #[must_use]
    pub fn new(
        orchestrations: Arc<dyn OrchestrationStore>,
        operations: Arc<dyn OperationStore>,
        resolver: Arc<dyn RuntimeResolver>,
        factory: Arc<dyn OperationFactory>,
        parallel: Arc<dyn Strategy>,
        config_source: Arc<dyn ConfigSource>,
        config: OrchestrationConfig,
    ) -> Self {
        Self {
            orchestrations,
            operations,
            resolver,
            factory,
            strategies: HashMap::from([(StrategyType::Parallel, parallel)]),
            config_source,
            config,
            metrics: OrchestrationMetrics::new(),
        }
    }

    /// Processes the orchestration and returns the re-schedule delay.
    pub async fn execute(&self, id: &OrchestrationId) -> Duration {
        let mut orchestration = match self.orchestrations.get_by_id(id).await {
            Ok(orchestration) => orchestration,
            Err(error) if error.is_not_found() => {
                tracing::warn!(orchestration_id = %id, "orchestration not found, nothing to do");
                return Duration::ZERO;
            }
            Err(error) => {
                tracing::error!(orchestration_id = %id, %error, "failed to load orchestration");
                return self.config.retry_backoff;
            }
        };
        if orchestration.is_finished() {
            tracing::debug!(orchestration_id = %id, state = %orchestration.state, "orchestration already finished");
            return Duration::ZERO;
        }

        let kind = orchestration.kind.to_string();
        let span = orchestration_span("execute", id.as_str(), &kind);
        let _timer = TimingGuard::new(|elapsed| self.metrics.observe_execute_duration(&kind, elapsed));

        async {
            let policy = self.load_policy().await;

            let mut operations = match self.resolve_operations(&mut orchestration, policy.as_ref()).await {
                Ok(operations) => operations,
                Err(error) => {
                    return self
                        .fail(orchestration, format!("failed to resolve operations: {error}"))
                        .await;
                }
            };

            if let Err(error) = self
                .factory
                .stamp_versions(&mut orchestration, &mut operations)
                .await
            {
                tracing::error!(%error, "failed to stamp target versions");
                return self.config.retry_backoff;
            }
            if let Err(error) = self.orchestrations.update(&orchestration).await {
                tracing::error!(%error, "failed to persist orchestration");
                return self.config.retry_backoff;
            }
            if orchestration.is_finished() {
                self.metrics.record_finished(&kind, orchestration.state.as_str());
                tracing::info!(state = %orchestration.state, description = %orchestration.description, "orchestration finished");
                return Duration::ZERO;
            }

            let strategy_kind = orchestration.parameters.strategy.kind;
            let Some(strategy) = self.strategies.get(&strategy_kind).map(Arc::clone) else {
                let error = Error::UnsupportedStrategy {
                    strategy: strategy_kind.to_string(),
                };
                return self.fail(orchestration, error.to_string()).await;
            };

            // A canceled orchestration only drives work that was already dispatched.
            if orchestration.state.is_canceled() {
                operations.retain(|op| op.state == State::InProgress);
            }
            let execution_id = match strategy
                .execute(operations, &orchestration.parameters.strategy)
                .await
            {
                Ok(execution_id) => execution_id,
                Err(error) => {
                    return self
                        .fail(orchestration, format!("failed to start strategy: {error}"))
                        .await;
                }
            };

            self.wait_for_completion(id).await;
            self.finish(id, strategy.as_ref(), &execution_id).await
        }
        .instrument(span)
        .await
    }

    /// Loads the maintenance policy; any problem means no overrides.
    async fn load_policy(&self) -> Option<CompiledMaintenancePolicy> {
        let name = &self.config.maintenance_policy_name;
        let raw = match self.config_source.get(name).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                tracing::debug!(policy = %name, "no maintenance policy configured");
                return None;
            }
            Err(error) => {
                tracing::warn!(policy = %name, %error, "failed to load maintenance policy");
                return None;
            }
        };
        match MaintenancePolicy::from_json(&raw).and_then(|policy| policy.compile()) {
            Ok(policy) => Some(policy),
            Err(error) => {
                tracing::warn!(policy = %name, %error, "ignoring malformed maintenance policy");
                None
            }
        }
    }

    async fn resolve_operations(
        &self,
        orchestration: &mut Orchestration,
        policy: Option<&CompiledMaintenancePolicy>,
    ) -> Result<Vec<RuntimeOperation>> {
        if orchestration.state != State::Pending {
            let operations = self.factory.resume_operations(orchestration).await?;
            if orchestration.state == State::Retrying {
                orchestration.transition_to(State::InProgress, "Retrying operations")?;
            }
            return Ok(operations);
        }

        // An earlier pass may have created the operations without persisting
        // the transition out of `pending`.
        let existing = self
            .operations
            .list_operations_by_orchestration_id(&orchestration.id, &OperationFilter::default())
            .await?;
        if !existing.is_empty() {
            let operations = self.factory.resume_operations(orchestration).await?;
            orchestration.transition_to(State::InProgress, format!("Scheduled {} operations", existing.len()))?;
            tracing::info!(operations = existing.len(), "resumed operations of a pending orchestration");
            return Ok(operations);
        }

        let runtimes = self.resolver.resolve(&orchestration.parameters.targets).await?;
        let by_window = orchestration.parameters.strategy.schedule == ScheduleType::MaintenanceWindow;
        let now = Utc::now();

        let mut operations = Vec::with_capacity(runtimes.len());
        for mut runtime in runtimes {
            let window = by_window.then(|| {
                if let Some(policy) = policy {
                    policy.apply(&mut runtime);
                }
                next_window(
                    now,
                    runtime.maintenance_window_begin,
                    runtime.maintenance_window_end,
                    &runtime.maintenance_days,
                )
            });
            operations.push(self.factory.new_operation(orchestration, runtime, window).await?);
        }

        let target = if operations.is_empty() {
            State::Succeeded
        } else {
            State::InProgress
        };
        orchestration.transition_to(target, format!("Scheduled {} operations", operations.len()))?;
        self.metrics
            .record_operations_scheduled(&orchestration.kind.to_string(), operations.len());
        tracing::info!(operations = operations.len(), "scheduled operations");
        Ok(operations)
    }

    /// Polls until no operation needs a worker. While the orchestration is
    /// being canceled, only in-flight operations are waited for.
    async fn wait_for_completion(&self, id: &OrchestrationId) {
        loop {
            match self.orchestrations.get_by_id(id).await {
                Ok(orchestration) => {
                    match self.operations.get_operation_stats_for_orchestration(id).await {
                        Ok(stats) => {
                            let done = if orchestration.state.is_canceled() {
                                stats.count(State::InProgress) == 0
                            } else {
                                stats.not_finished() == 0
                            };
                            if done {
                                return;
                            }
                        }
                        Err(error) => tracing::warn!(%error, "failed to read operation statistics"),
                    }
                }
                Err(error) if error.is_not_found() => return,
                Err(error) => tracing::warn!(%error, "failed to read orchestration state"),
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn finish(
        &self,
        id: &OrchestrationId,
        strategy: &dyn Strategy,
        execution_id: &ExecutionId,
    ) -> Duration {
        let mut orchestration = match self.orchestrations.get_by_id(id).await {
            Ok(orchestration) => orchestration,
            Err(error) if error.is_not_found() => {
                tracing::warn!("orchestration disappeared before completion");
                strategy.cancel(execution_id).await;
                return Duration::ZERO;
            }
            Err(error) => {
                tracing::error!(%error, "failed to reload orchestration");
                strategy.cancel(execution_id).await;
                return self.config.retry_backoff;
            }
        };

        if orchestration.state.is_canceled() {
            strategy.cancel(execution_id).await;
            if let Err(error) = self.factory.cancel_operations(&orchestration).await {
                tracing::error!(%error, "failed to cancel pending operations");
                return self.config.retry_backoff;
            }
            if let Err(error) = orchestration.transition_to(State::Canceled, "Orchestration was canceled") {
                tracing::error!(%error, "failed to mark orchestration canceled");
                return Duration::ZERO;
            }
        } else {
            strategy.wait(execution_id).await;
            let stats = match self.operations.get_operation_stats_for_orchestration(id).await {
                Ok(stats) => stats,
                Err(error) => {
                    tracing::error!(%error, "failed to read operation statistics");
                    return self.config.retry_backoff;
                }
            };
            if stats.count(State::Retrying) > 0 {
                tracing::info!(
                    retrying = stats.count(State::Retrying),
                    "operations were retried while in progress, re-scheduling"
                );
                return self.config.poll_interval;
            }

            let failed = stats.count(State::Failed);
            let (state, description) = if failed > 0 {
                (State::Failed, format!("{failed} operations failed"))
            } else {
                (State::Succeeded, "Orchestration completed".to_string())
            };
            if let Err(error) = orchestration.transition_to(state, description) {
                tracing::error!(%error, "failed to finish orchestration");
                return Duration::ZERO;
            }
        }

        self.persist_terminal(&orchestration).await
    }

    async fn fail(&self, mut orchestration: Orchestration, description: String) -> Duration {
        tracing::error!(orchestration_id = %orchestration.id, %description, "orchestration failed");
        orchestration.fail(description);
        self.persist_terminal(&orchestration).await
    }

    async fn persist_terminal(&self, orchestration: &Orchestration) -> Duration {
        match self.orchestrations.update(orchestration).await {
            Ok(()) => {
                self.metrics
                    .record_finished(&orchestration.kind.to_string(), orchestration.state.as_str());
                tracing::info!(
                    orchestration_id = %orchestration.id,
                    state = %orchestration.state,
                    description = %orchestration.description,
                    "orchestration finished"
                );
                Duration::ZERO
            }
            Err(error) if error.is_not_found() => {
                tracing::warn!(orchestration_id = %orchestration.id, "orchestration disappeared before terminal write");
                Duration::ZERO
            }
            Err(error) => {
                tracing::error!(orchestration_id = %orchestration.id, %error, "failed to persist terminal state");
                self.config.retry_backoff
            }
        }
    }
}

#[async_trait]
impl Processor for OrchestrationManager {
    async fn process(&self, id: &OrchestrationId) -> Duration {
        self.execute(id).await
    }
}
