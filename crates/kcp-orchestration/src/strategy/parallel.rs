//! Bounded-concurrency worker pool strategy.
//!
//! `workers` tasks share one unbounded channel. Each worker pulls one
//! operation, waits for its start time while polling the orchestration for
//! cancellation, then drives it through the [`OperationExecutor`] using a
//! private [`DelayingQueue`] for requeues. Operations are FIFO per worker and
//! unordered across workers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use kcp_core::observability::operation_span;
use kcp_core::OrchestrationId;

use super::{DelayingQueue, ExecutionId, Strategy};
use crate::error::{Error, Result};
use crate::executor::OperationExecutor;
use crate::metrics::OrchestrationMetrics;
use crate::operation::RuntimeOperation;
use crate::orchestration::{ScheduleType, State, StrategySpec, StrategyType};
use crate::store::OrchestrationStore;

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<RuntimeOperation>>>;

/// A running execution.
struct Execution {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    remaining: Arc<AtomicUsize>,
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("strategy execution registry lock poisoned")
}

/// Runs operations on a bounded pool of workers.
pub struct ParallelStrategy {
    executor: Arc<dyn OperationExecutor>,
    orchestrations: Arc<dyn OrchestrationStore>,
    cancel_poll_interval: Duration,
    executions: Mutex<HashMap<ExecutionId, Execution>>,
    metrics: OrchestrationMetrics,
}

impl std::fmt::Debug for ParallelStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelStrategy")
            .field("cancel_poll_interval", &self.cancel_poll_interval)
            .finish_non_exhaustive()
    }
}

impl ParallelStrategy {
    /// Creates the strategy.
    #[must_use]
    pub fn new(
        executor: Arc<dyn OperationExecutor>,
        orchestrations: Arc<dyn OrchestrationStore>,
        cancel_poll_interval: Duration,
    ) -> Self {
        Self {
            executor,
            orchestrations,
            cancel_poll_interval,
            executions: Mutex::new(HashMap::new()),
            metrics: OrchestrationMetrics::new(),
        }
    }

    /// Number of operations of the execution not yet handled by a worker.
    ///
    /// Returns `None` for unknown, finished or canceled executions.
    #[must_use]
    pub fn remaining(&self, execution_id: &ExecutionId) -> Option<usize> {
        let executions = self.executions.lock().ok()?;
        executions
            .get(execution_id)
            .map(|execution| execution.remaining.load(Ordering::SeqCst))
    }

    /// Number of executions that were neither waited for nor canceled.
    #[must_use]
    pub fn active_executions(&self) -> usize {
        self.executions.lock().map_or(0, |executions| executions.len())
    }

    fn take_execution(&self, execution_id: &ExecutionId) -> Option<Execution> {
        match self.executions.lock() {
            Ok(mut executions) => executions.remove(execution_id),
            Err(_) => {
                tracing::error!(%execution_id, "strategy execution registry lock poisoned");
                None
            }
        }
    }
}

#[async_trait]
impl Strategy for ParallelStrategy {
    #[tracing::instrument(skip_all, fields(operations = operations.len(), workers = spec.parallel.workers))]
    async fn execute(
        &self,
        mut operations: Vec<RuntimeOperation>,
        spec: &StrategySpec,
    ) -> Result<ExecutionId> {
        if operations.is_empty() {
            return Ok(ExecutionId::default());
        }

        let execution_id = ExecutionId::generate();
        let token = CancellationToken::new();
        let remaining = Arc::new(AtomicUsize::new(operations.len()));

        if spec.schedule == ScheduleType::MaintenanceWindow {
            operations.sort_by_key(|op| op.maintenance_window.map(|window| window.begin));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let receiver: SharedReceiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let handles: Vec<JoinHandle<()>> = (0..spec.parallel.workers.max(1))
            .map(|worker| {
                let worker = Worker {
                    worker,
                    executor: Arc::clone(&self.executor),
                    orchestrations: Arc::clone(&self.orchestrations),
                    cancel_poll_interval: self.cancel_poll_interval,
                    schedule: spec.schedule,
                    token: token.clone(),
                    receiver: Arc::clone(&receiver),
                    remaining: Arc::clone(&remaining),
                    metrics: self.metrics,
                };
                tokio::spawn(worker.run())
            })
            .collect();

        for operation in operations {
            if sender.send(operation).is_err() {
                break;
            }
        }
        drop(sender);

        self.executions.lock().map_err(poison_err)?.insert(
            execution_id.clone(),
            Execution {
                token,
                handles,
                remaining,
            },
        );
        self.metrics
            .record_strategy_execution(&StrategyType::Parallel.to_string());
        tracing::info!(%execution_id, "started parallel execution");
        Ok(execution_id)
    }

    async fn wait(&self, execution_id: &ExecutionId) {
        if execution_id.is_empty() {
            return;
        }
        let Some(execution) = self.take_execution(execution_id) else {
            return;
        };
        for handle in execution.handles {
            if let Err(error) = handle.await {
                tracing::error!(%execution_id, %error, "strategy worker panicked");
            }
        }
        tracing::debug!(%execution_id, "parallel execution finished");
    }

    async fn cancel(&self, execution_id: &ExecutionId) {
        if execution_id.is_empty() {
            return;
        }
        if let Some(execution) = self.take_execution(execution_id) {
            execution.token.cancel();
            tracing::info!(
                %execution_id,
                remaining = execution.remaining.load(Ordering::SeqCst),
                "canceled parallel execution"
            );
        }
    }
}

struct Worker {
    worker: usize,
    executor: Arc<dyn OperationExecutor>,
    orchestrations: Arc<dyn OrchestrationStore>,
    cancel_poll_interval: Duration,
    schedule: ScheduleType,
    token: CancellationToken,
    receiver: SharedReceiver,
    remaining: Arc<AtomicUsize>,
    metrics: OrchestrationMetrics,
}

impl Worker {
    async fn run(self) {
        let mut queue = DelayingQueue::new();
        while let Some(operation) = self.pull().await {
            let span = operation_span(
                operation.orchestration_id.as_str(),
                operation.id.as_str(),
                &operation.runtime.runtime_id,
            );
            self.handle(operation, &mut queue).instrument(span).await;
            self.remaining.fetch_sub(1, Ordering::SeqCst);
        }
        tracing::debug!(worker = self.worker, "strategy worker stopped");
    }

    async fn pull(&self) -> Option<RuntimeOperation> {
        let mut receiver = self.receiver.lock().await;
        tokio::select! {
            biased;
            () = self.token.cancelled() => None,
            operation = receiver.recv() => operation,
        }
    }

    async fn handle(&self, operation: RuntimeOperation, queue: &mut DelayingQueue<RuntimeOperation>) {
        let until = match (self.schedule, operation.maintenance_window) {
            (ScheduleType::MaintenanceWindow, Some(window)) => {
                (window.begin - Utc::now()).to_std().unwrap_or(Duration::ZERO)
            }
            _ => Duration::ZERO,
        };

        // Operations already in progress were started by an earlier pass.
        let started = operation.state == State::InProgress;
        if !started && self.wait_for_start(&operation.orchestration_id, until).await {
            tracing::info!(
                worker = self.worker,
                operation_id = %operation.id,
                runtime_id = %operation.runtime.runtime_id,
                "orchestration canceled, skipping operation"
            );
            self.metrics.record_operation_skipped();
            return;
        }

        queue.add(operation);
        while let Some(operation) = queue.next(&self.token).await {
            match self.executor.execute(&operation.id).await {
                Ok(delay) if delay.is_zero() => {
                    tracing::debug!(worker = self.worker, operation_id = %operation.id, "operation finished");
                }
                Ok(delay) => queue.add_after(operation, delay),
                Err(error) => {
                    tracing::error!(
                        worker = self.worker,
                        operation_id = %operation.id,
                        runtime_id = %operation.runtime.runtime_id,
                        kind = error.kind(),
                        %error,
                        "operation execution failed"
                    );
                    self.metrics.record_executor_failure(error.kind());
                }
            }
        }
    }

    /// Waits `until`, checking for cancellation at least once and then every
    /// poll interval. Returns true if the orchestration was canceled.
    async fn wait_for_start(&self, orchestration_id: &OrchestrationId, until: Duration) -> bool {
        let deadline = Instant::now() + until;
        loop {
            if self.is_canceled(orchestration_id).await {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let step = self.cancel_poll_interval.min(deadline - now);
            tokio::select! {
                biased;
                () = self.token.cancelled() => return true,
                () = tokio::time::sleep(step) => {}
            }
        }
    }

    async fn is_canceled(&self, orchestration_id: &OrchestrationId) -> bool {
        if self.token.is_cancelled() {
            return true;
        }
        match self.orchestrations.get_by_id(orchestration_id).await {
            Ok(orchestration) => orchestration.state.is_canceled(),
            Err(error) => {
                tracing::warn!(%orchestration_id, %error, "failed to check orchestration state");
                false
            }
        }
    }
}
