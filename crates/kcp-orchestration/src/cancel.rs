//! Cancellation requests for orchestrations.

use std::sync::Arc;

use kcp_core::OrchestrationId;

use crate::error::{Error, Result};
use crate::metrics::OrchestrationMetrics;
use crate::orchestration::State;
use crate::queue::TaskQueue;
use crate::store::OrchestrationStore;

/// Requests cancellation; the manager performs it.
pub struct Canceler {
    orchestrations: Arc<dyn OrchestrationStore>,
    queue: Arc<dyn TaskQueue>,
    metrics: OrchestrationMetrics,
}

impl std::fmt::Debug for Canceler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Canceler").finish_non_exhaustive()
    }
}

impl Canceler {
    /// Creates the canceler.
    #[must_use]
    pub fn new(orchestrations: Arc<dyn OrchestrationStore>, queue: Arc<dyn TaskQueue>) -> Self {
        Self {
            orchestrations,
            queue,
            metrics: OrchestrationMetrics::new(),
        }
    }

    /// Marks the orchestration `canceling`.
    ///
    /// A failed orchestration is re-enqueued so the manager drives it to
    /// `canceled`; an in-progress one is picked up by its running manager.
    ///
    /// # Errors
    ///
    /// Returns an error if the orchestration does not exist, cannot be
    /// canceled in its current state, or cannot be persisted.
    #[tracing::instrument(skip(self), fields(orchestration_id = %id))]
    pub async fn cancel(&self, id: &OrchestrationId) -> Result<()> {
        let mut orchestration = self.orchestrations.get_by_id(id).await?;
        let from = orchestration.state;
        match from {
            State::Canceling | State::Canceled => {
                tracing::debug!(state = %from, "orchestration already canceled");
                Ok(())
            }
            State::InProgress | State::Failed => {
                orchestration.transition_to(State::Canceling, "Orchestration is being canceled")?;
                self.orchestrations.update(&orchestration).await?;
                if from == State::Failed {
                    self.queue.add(id.clone()).await?;
                }
                self.metrics.record_cancellation(from.as_str());
                tracing::info!(from = %from, "cancellation requested");
                Ok(())
            }
            other => Err(Error::InvalidStateTransition {
                from: other.to_string(),
                to: State::Canceling.to_string(),
                reason: "only in progress or failed orchestrations can be canceled".into(),
            }),
        }
    }
}
