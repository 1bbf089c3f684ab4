//! The injected per-operation upgrade step.

use std::time::Duration;

use async_trait::async_trait;

use kcp_core::OperationId;

/// Errors reported by an [`OperationExecutor`].
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// The step failed; the operation may be attempted again by a later retry.
    #[error("operation {operation_id} failed: {message}")]
    Failed {
        /// The operation that failed.
        operation_id: OperationId,
        /// Description of the failure.
        message: String,
    },

    /// The step gave up on the operation permanently.
    #[error("operation {operation_id} aborted: {message}")]
    Aborted {
        /// The aborted operation.
        operation_id: OperationId,
        /// Description of the reason.
        message: String,
    },
}

impl ExecutorError {
    /// Short label for metrics and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Failed { .. } => "failed",
            Self::Aborted { .. } => "aborted",
        }
    }
}

/// Performs one step of the upgrade of one runtime operation.
///
/// `Ok(Duration::ZERO)` means the operation is done (the executor records the
/// terminal operation state itself). A non-zero duration asks to be called
/// again after that delay.
#[async_trait]
pub trait OperationExecutor: Send + Sync {
    /// Executes one step for the operation.
    async fn execute(&self, operation_id: &OperationId) -> Result<Duration, ExecutorError>;
}
