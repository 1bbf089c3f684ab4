//! Work queue feeding orchestration IDs to the manager.
//!
//! The trigger handler, the [`crate::cancel::Canceler`] and the
//! [`crate::retry::RetryEngine`] enqueue IDs; workers pop them and call a
//! [`Processor`]. A non-zero delay returned by the processor re-adds the ID
//! after that delay.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

use kcp_core::OrchestrationId;

use crate::error::Result;

/// Queue of orchestration IDs awaiting processing.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Adds an ID for immediate processing.
    async fn add(&self, id: OrchestrationId) -> Result<()>;

    /// Adds an ID once `delay` has elapsed.
    async fn add_after(&self, id: OrchestrationId, delay: Duration) -> Result<()>;
}

/// Processes one orchestration ID popped from a [`TaskQueue`].
#[async_trait]
pub trait Processor: Send + Sync {
    /// Processes the ID and returns the re-schedule delay. Zero means done.
    async fn process(&self, id: &OrchestrationId) -> Duration;
}
