//! In-memory task queue with delayed re-adds and a worker loop.
//!
//! ## Limitations
//!
//! - **Single-process only**: IDs are not visible across process boundaries
//! - **No persistence**: Queued and delayed IDs are lost on restart

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use kcp_core::OrchestrationId;

use super::{Processor, TaskQueue};
use crate::error::{Error, Result};

/// Internal queue state protected by a single lock.
///
/// An ID is in `dirty` while it waits in `ready`. An ID added while a worker
/// processes it stays in `dirty` only and is pushed to `ready` once the worker
/// is done, so one ID is never processed concurrently.
#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<OrchestrationId>,
    dirty: HashSet<OrchestrationId>,
    processing: HashSet<OrchestrationId>,
    delayed: BinaryHeap<Reverse<(Instant, u64, OrchestrationId)>>,
    sequence: u64,
}

impl QueueState {
    fn push(&mut self, id: OrchestrationId) -> bool {
        if !self.dirty.insert(id.clone()) {
            return false;
        }
        if self.processing.contains(&id) {
            return false;
        }
        self.ready.push_back(id);
        true
    }

    /// Moves due delayed IDs to `ready`; returns the next wake-up time, if any.
    fn promote_due(&mut self, now: Instant) -> Option<Instant> {
        while let Some(Reverse((due, _, _))) = self.delayed.peek() {
            if *due > now {
                break;
            }
            if let Some(Reverse((_, _, id))) = self.delayed.pop() {
                self.push(id);
            }
        }
        self.delayed.peek().map(|Reverse((due, _, _))| *due)
    }
}

/// In-memory [`TaskQueue`].
#[derive(Debug, Default)]
pub struct InMemoryTaskQueue {
    state: RwLock<QueueState>,
    notify: Notify,
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("task queue lock poisoned")
}

impl InMemoryTaskQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the IDs waiting for immediate processing, in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn ready(&self) -> Result<Vec<OrchestrationId>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.ready.iter().cloned().collect())
    }

    /// Returns the number of IDs scheduled for later.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn delayed_len(&self) -> Result<usize> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.delayed.len())
    }

    /// Pops the next due ID without waiting.
    ///
    /// The ID is marked as processing until [`Self::done`] is called.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn try_next(&self) -> Result<Option<OrchestrationId>> {
        let (id, _) = self.pop_due()?;
        Ok(id)
    }

    /// Marks an ID as no longer processing.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn done(&self, id: &OrchestrationId) -> Result<()> {
        let requeued = {
            let mut state = self.state.write().map_err(poison_err)?;
            state.processing.remove(id);
            if state.dirty.contains(id) {
                state.ready.push_back(id.clone());
                true
            } else {
                false
            }
        };
        if requeued {
            self.notify.notify_one();
        }
        Ok(())
    }

    fn pop_due(&self) -> Result<(Option<OrchestrationId>, Option<Instant>)> {
        let mut state = self.state.write().map_err(poison_err)?;
        let next_due = state.promote_due(Instant::now());
        let id = state.ready.pop_front();
        if let Some(id) = &id {
            state.dirty.remove(id);
            state.processing.insert(id.clone());
        }
        drop(state);
        Ok((id, next_due))
    }

    async fn next(&self, shutdown: &CancellationToken) -> Option<OrchestrationId> {
        loop {
            let notified = self.notify.notified();
            let next_due = match self.pop_due() {
                Ok((Some(id), _)) => return Some(id),
                Ok((None, next_due)) => next_due,
                Err(error) => {
                    tracing::error!(%error, "task queue unavailable");
                    return None;
                }
            };

            let wake = next_due.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));
            tokio::select! {
                () = shutdown.cancelled() => return None,
                () = notified => {}
                () = tokio::time::sleep_until(wake) => {}
            }
        }
    }

    /// Runs `workers` workers feeding IDs to `processor` until `shutdown` fires.
    ///
    /// Each ID is processed by at most one worker at a time. A non-zero delay
    /// returned by the processor re-adds the ID after that delay.
    pub async fn run(
        self: Arc<Self>,
        processor: Arc<dyn Processor>,
        workers: usize,
        shutdown: CancellationToken,
    ) {
        let handles: Vec<_> = (0..workers.max(1))
            .map(|worker| {
                let queue = Arc::clone(&self);
                let processor = Arc::clone(&processor);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    while let Some(id) = queue.next(&shutdown).await {
                        let delay = processor.process(&id).await;
                        if let Err(error) = queue.done(&id) {
                            tracing::error!(worker, orchestration_id = %id, %error, "failed to release orchestration");
                        }
                        if !delay.is_zero() {
                            if let Err(error) = queue.add_after(id.clone(), delay).await {
                                tracing::error!(worker, orchestration_id = %id, %error, "failed to re-schedule orchestration");
                            }
                        }
                    }
                    tracing::debug!(worker, "task queue worker stopped");
                })
            })
            .collect();

        for handle in handles {
            if let Err(error) = handle.await {
                tracing::error!(%error, "task queue worker panicked");
            }
        }
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn add(&self, id: OrchestrationId) -> Result<()> {
        let pushed = self.state.write().map_err(poison_err)?.push(id);
        if pushed {
            self.notify.notify_one();
        }
        Ok(())
    }

    async fn add_after(&self, id: OrchestrationId, delay: Duration) -> Result<()> {
        if delay.is_zero() {
            return self.add(id).await;
        }
        {
            let mut state = self.state.write().map_err(poison_err)?;
            state.sequence += 1;
            let sequence = state.sequence;
            state
                .delayed
                .push(Reverse((Instant::now() + delay, sequence, id)));
        }
        // Wake a sleeping worker so it recomputes its deadline.
        self.notify.notify_one();
        Ok(())
    }
}
