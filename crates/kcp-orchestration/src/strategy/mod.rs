//! Strategies for dispatching runtime operations.
//!
//! A strategy runs the operations of one orchestration to completion or until
//! it is canceled. The only strategy is [`ParallelStrategy`], a bounded worker
//! pool.

pub mod delay_queue;
pub mod parallel;

pub use delay_queue::DelayingQueue;
pub use parallel::ParallelStrategy;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::Result;
use crate::operation::RuntimeOperation;
use crate::orchestration::StrategySpec;

/// Identifies one strategy execution. Empty when nothing was spawned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(String);

impl ExecutionId {
    /// Generates a fresh execution ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Returns true for the empty ID of an execution without operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Dispatches runtime operations.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Starts executing the operations in the background.
    ///
    /// An empty operation list spawns nothing and returns an empty ID.
    async fn execute(
        &self,
        operations: Vec<RuntimeOperation>,
        spec: &StrategySpec,
    ) -> Result<ExecutionId>;

    /// Waits until every worker of the execution has exited.
    async fn wait(&self, execution_id: &ExecutionId);

    /// Cancels the execution. Workers stop pulling operations, delayed
    /// requeues are abandoned and pending cancellation polls end.
    async fn cancel(&self, execution_id: &ExecutionId);
}
