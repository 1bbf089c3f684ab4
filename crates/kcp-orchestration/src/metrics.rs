//! Metrics for the orchestration engine.
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `kcp_orchestrations_finished_total` | Counter | `type`, `state` | Orchestrations reaching a terminal state |
//! | `kcp_orchestration_operations_scheduled_total` | Counter | `type` | Runtime operations created |
//! | `kcp_orchestration_execute_duration_seconds` | Histogram | `type` | Manager `execute` latency |
//! | `kcp_orchestration_retries_total` | Counter | `result` | Retried, stale and invalid operation IDs |
//! | `kcp_orchestration_cancellations_total` | Counter | `from_state` | Accepted cancel requests |
//! | `kcp_orchestration_strategy_executions_total` | Counter | `strategy` | Strategy executions started |
//! | `kcp_orchestration_operations_skipped_total` | Counter | - | Operations skipped by cancellation |
//! | `kcp_orchestration_executor_failures_total` | Counter | `kind` | Executor errors |
//!
//! Metrics go through the `metrics` crate facade; without an installed
//! recorder every call is a no-op.

use std::time::{Duration, Instant};

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: Orchestrations reaching a terminal state.
    pub const ORCHESTRATIONS_FINISHED_TOTAL: &str = "kcp_orchestrations_finished_total";
    /// Counter: Runtime operations created.
    pub const OPERATIONS_SCHEDULED_TOTAL: &str = "kcp_orchestration_operations_scheduled_total";
    /// Histogram: Manager execute duration in seconds.
    pub const EXECUTE_DURATION_SECONDS: &str = "kcp_orchestration_execute_duration_seconds";
    /// Counter: Retry request outcomes per operation ID.
    pub const RETRIES_TOTAL: &str = "kcp_orchestration_retries_total";
    /// Counter: Accepted cancel requests.
    pub const CANCELLATIONS_TOTAL: &str = "kcp_orchestration_cancellations_total";
    /// Counter: Strategy executions started.
    pub const STRATEGY_EXECUTIONS_TOTAL: &str = "kcp_orchestration_strategy_executions_total";
    /// Counter: Operations never executed because of cancellation.
    pub const OPERATIONS_SKIPPED_TOTAL: &str = "kcp_orchestration_operations_skipped_total";
    /// Counter: Executor failures.
    pub const EXECUTOR_FAILURES_TOTAL: &str = "kcp_orchestration_executor_failures_total";
}

/// Label keys used across metrics.
pub mod labels {
    /// Orchestration type (upgradeKyma, upgradeCluster).
    pub const TYPE: &str = "type";
    /// Orchestration state.
    pub const STATE: &str = "state";
    /// State a transition started from.
    pub const FROM_STATE: &str = "from_state";
    /// Result (retried, stale, invalid).
    pub const RESULT: &str = "result";
    /// Strategy name.
    pub const STRATEGY: &str = "strategy";
    /// Executor failure kind.
    pub const KIND: &str = "kind";
}

/// High-level interface for recording orchestration metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrchestrationMetrics;

impl OrchestrationMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Records an orchestration reaching a terminal state.
    pub fn record_finished(&self, kind: &str, state: &str) {
        counter!(
            names::ORCHESTRATIONS_FINISHED_TOTAL,
            labels::TYPE => kind.to_string(),
            labels::STATE => state.to_string(),
        )
        .increment(1);
    }

    /// Records newly created runtime operations.
    pub fn record_operations_scheduled(&self, kind: &str, count: usize) {
        counter!(
            names::OPERATIONS_SCHEDULED_TOTAL,
            labels::TYPE => kind.to_string(),
        )
        .increment(u64::try_from(count).unwrap_or(u64::MAX));
    }

    /// Records the duration of one manager `execute` call.
    pub fn observe_execute_duration(&self, kind: &str, duration: Duration) {
        histogram!(
            names::EXECUTE_DURATION_SECONDS,
            labels::TYPE => kind.to_string(),
        )
        .record(duration.as_secs_f64());
    }

    /// Records retry request outcomes.
    pub fn record_retry(&self, result: &str, count: usize) {
        counter!(
            names::RETRIES_TOTAL,
            labels::RESULT => result.to_string(),
        )
        .increment(u64::try_from(count).unwrap_or(u64::MAX));
    }

    /// Records an accepted cancel request.
    pub fn record_cancellation(&self, from_state: &str) {
        counter!(
            names::CANCELLATIONS_TOTAL,
            labels::FROM_STATE => from_state.to_string(),
        )
        .increment(1);
    }

    /// Records a started strategy execution.
    pub fn record_strategy_execution(&self, strategy: &str) {
        counter!(
            names::STRATEGY_EXECUTIONS_TOTAL,
            labels::STRATEGY => strategy.to_string(),
        )
        .increment(1);
    }

    /// Records an operation skipped because its orchestration was canceled.
    pub fn record_operation_skipped(&self) {
        counter!(names::OPERATIONS_SKIPPED_TOTAL).increment(1);
    }

    /// Records an executor failure.
    pub fn record_executor_failure(&self, kind: &str) {
        counter!(
            names::EXECUTOR_FAILURES_TOTAL,
            labels::KIND => kind.to_string(),
        )
        .increment(1);
    }
}

/// RAII guard for timing operations.
///
/// Calls `on_drop` with the elapsed duration when dropped.
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Creates a new timing guard.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}
