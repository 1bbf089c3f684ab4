//! In-memory fleet for testing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use super::{RuntimeLister, RuntimeRecord, Shoot, ShootLister};
use crate::error::{Error, Result};

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

/// Shoots and runtime records held in memory.
///
/// Implements both [`ShootLister`] and [`RuntimeLister`].
#[derive(Debug, Default)]
pub struct InMemoryFleet {
    shoots: RwLock<Vec<Shoot>>,
    runtimes: RwLock<Vec<RuntimeRecord>>,
    unavailable: AtomicBool,
}

impl InMemoryFleet {
    /// Creates an empty fleet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a shoot and its runtime record.
    ///
    /// # Errors
    ///
    /// Returns an error if a lock is poisoned.
    pub fn add(&self, shoot: Shoot, record: RuntimeRecord) -> Result<()> {
        self.add_shoot(shoot)?;
        self.runtimes.write().map_err(poison_err)?.push(record);
        Ok(())
    }

    /// Adds a shoot without a runtime record.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn add_shoot(&self, shoot: Shoot) -> Result<()> {
        self.shoots.write().map_err(poison_err)?.push(shoot);
        Ok(())
    }

    /// Makes every listing call fail while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::listing("fleet unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl ShootLister for InMemoryFleet {
    async fn list_shoots(&self) -> Result<Vec<Shoot>> {
        self.check_available()?;
        Ok(self.shoots.read().map_err(poison_err)?.clone())
    }
}

#[async_trait]
impl RuntimeLister for InMemoryFleet {
    async fn list_all_runtimes(&self) -> Result<Vec<RuntimeRecord>> {
        self.check_available()?;
        Ok(self.runtimes.read().map_err(poison_err)?.clone())
    }
}
