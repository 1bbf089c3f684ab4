//! Re-running failed runtime operations of an orchestration.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use kcp_core::{OperationId, OrchestrationId};

use crate::error::{Error, Result};
use crate::metrics::OrchestrationMetrics;
use crate::operation::RuntimeOperation;
use crate::orchestration::{Orchestration, State};
use crate::queue::TaskQueue;
use crate::store::{OperationStore, OrchestrationStore};

/// Outcome of a retry request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryResponse {
    /// The orchestration whose operations were retried.
    #[serde(rename = "orchestrationID")]
    pub orchestration_id: OrchestrationId,
    /// Operations moved to `retrying`.
    pub retry_operations: Vec<OperationId>,
    /// Operations skipped because a newer operation exists for the instance.
    pub old_operations: Vec<OperationId>,
    /// Requested IDs that are not retryable operations of the orchestration.
    pub invalid_operations: Vec<OperationId>,
    /// Human-readable summary.
    pub msg: String,
}

/// Moves failed operations back into the orchestration's work set.
pub struct RetryEngine {
    orchestrations: Arc<dyn OrchestrationStore>,
    operations: Arc<dyn OperationStore>,
    queue: Arc<dyn TaskQueue>,
    metrics: OrchestrationMetrics,
}

impl std::fmt::Debug for RetryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryEngine").finish_non_exhaustive()
    }
}

impl RetryEngine {
    /// Creates the engine.
    #[must_use]
    pub fn new(
        orchestrations: Arc<dyn OrchestrationStore>,
        operations: Arc<dyn OperationStore>,
        queue: Arc<dyn TaskQueue>,
    ) -> Self {
        Self {
            orchestrations,
            operations,
            queue,
            metrics: OrchestrationMetrics::new(),
        }
    }

    /// Retries `ids` among the `known` retryable operations while respecting
    /// maintenance windows.
    ///
    /// # Errors
    ///
    /// See [`Self::retry_with`].
    pub async fn retry(
        &self,
        orchestration: &Orchestration,
        known: &[RuntimeOperation],
        ids: &[OperationId],
    ) -> Result<RetryResponse> {
        self.retry_with(orchestration, known, ids, false).await
    }

    /// Retries `ids` among the `known` retryable operations. An empty `ids`
    /// retries every known operation. With `immediate` the retried operations
    /// ignore their maintenance windows.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the orchestration is neither failed
    /// nor in progress, [`Error::OrchestrationCanceled`] if it was canceled
    /// meanwhile, and store errors.
    #[tracing::instrument(skip_all, fields(orchestration_id = %orchestration.id, requested = ids.len()))]
    pub async fn retry_with(
        &self,
        orchestration: &Orchestration,
        known: &[RuntimeOperation],
        ids: &[OperationId],
        immediate: bool,
    ) -> Result<RetryResponse> {
        if !matches!(orchestration.state, State::Failed | State::InProgress) {
            return Err(Error::InvalidInput(format!(
                "orchestration {} is {}, only failed or in progress orchestrations can be retried",
                orchestration.id, orchestration.state
            )));
        }

        let mut response = RetryResponse {
            orchestration_id: orchestration.id.clone(),
            retry_operations: Vec::new(),
            old_operations: Vec::new(),
            invalid_operations: Vec::new(),
            msg: String::new(),
        };

        let mut candidates: Vec<&RuntimeOperation> = Vec::new();
        if ids.is_empty() {
            candidates.extend(known);
        } else {
            let mut seen = HashSet::new();
            for id in ids.iter().filter(|id| seen.insert(*id)) {
                match known.iter().find(|op| &op.id == id) {
                    Some(operation) => candidates.push(operation),
                    None => response.invalid_operations.push(id.clone()),
                }
            }
        }
        self.metrics
            .record_retry("invalid", response.invalid_operations.len());

        if candidates.is_empty() {
            response.msg = "No operations to retry".to_string();
            return Ok(response);
        }

        let mut retryable = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if orchestration.state == State::Failed && self.is_stale(candidate).await? {
                response.old_operations.push(candidate.id.clone());
            } else {
                retryable.push(candidate.clone());
            }
        }
        self.metrics.record_retry("stale", response.old_operations.len());

        if retryable.is_empty() {
            response.msg = "All operations are superseded by newer operations".to_string();
            return Ok(response);
        }

        for operation in &mut retryable {
            operation.set_state(State::Retrying, "Operation retry requested");
            self.operations.update_operation(operation).await?;
            response.retry_operations.push(operation.id.clone());
        }
        self.metrics.record_retry("retried", response.retry_operations.len());

        let mut current = self.orchestrations.get_by_id(&orchestration.id).await?;
        if current.state.is_canceled() {
            return Err(Error::OrchestrationCanceled {
                orchestration_id: current.id,
            });
        }

        let was_failed = current.state == State::Failed;
        let retry_parameters = &mut current.parameters.retry_operation;
        retry_parameters
            .retry_operations
            .extend(response.retry_operations.iter().cloned());
        retry_parameters.immediate = immediate;
        if was_failed {
            current.transition_to(State::Retrying, "Retrying failed operations")?;
        } else {
            current.updated_at = chrono::Utc::now();
        }
        self.orchestrations.update(&current).await?;
        if was_failed {
            self.queue.add(current.id.clone()).await?;
        }

        tracing::info!(retried = response.retry_operations.len(), "queued operations for retry");
        response.msg = "Retry operations queued".to_string();
        Ok(response)
    }

    /// Returns true if a strictly newer, non-canceled operation of the same
    /// kind exists for the candidate's instance.
    async fn is_stale(&self, candidate: &RuntimeOperation) -> Result<bool> {
        let history = self
            .operations
            .list_operations_by_instance_id(candidate.kind, &candidate.runtime.instance_id)
            .await?;
        Ok(history.iter().any(|op| {
            op.id != candidate.id
                && op.created_at > candidate.created_at
                && !op.state.is_canceled()
        }))
    }
}
