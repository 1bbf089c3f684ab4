//! # kcp-orchestration
//!
//! Fleet-wide upgrade orchestration for Kyma runtimes.
//!
//! This crate implements the orchestration domain, providing:
//!
//! - **Runtime Resolution**: Declarative include/exclude targets evaluated against the fleet
//! - **Maintenance Windows**: Per-runtime windows with policy overrides
//! - **Parallel Strategy**: Bounded worker pools with cancellation and requeue
//! - **Lifecycle Management**: Retry, cancel and resume of orchestrations
//!
//! ## Core Concepts
//!
//! - **Orchestration**: One upgrade campaign across a set of runtimes
//! - **Runtime Operation**: One unit of upgrade work for exactly one runtime
//! - **Strategy**: The dispatcher that runs operations, honoring schedules
//!
//! ## Example
//!
//! ```rust
//! use kcp_orchestration::maintenance::{next_window, parse_window_time};
//! use kcp_orchestration::orchestration::{
//!     Orchestration, OrchestrationType, Parameters, RuntimeTarget, State,
//! };
//!
//! # fn main() -> kcp_orchestration::error::Result<()> {
//! let mut parameters = Parameters::default();
//! parameters.targets.include.push(RuntimeTarget::all());
//! let orchestration = Orchestration::new(OrchestrationType::UpgradeKyma, parameters);
//! assert_eq!(orchestration.state, State::Pending);
//!
//! let begin = parse_window_time("010000+0000")?;
//! let end = parse_window_time("030000+0000")?;
//! let window = next_window(chrono::Utc::now(), begin, end, &[]);
//! assert!(window.begin < window.end);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod cancel;
pub mod config;
pub mod error;
pub mod executor;
pub mod factory;
pub mod maintenance;
pub mod manager;
pub mod metrics;
pub mod operation;
pub mod orchestration;
pub mod queue;
pub mod resolver;
pub mod retry;
pub mod store;
pub mod strategy;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::cancel::Canceler;
    pub use crate::config::OrchestrationConfig;
    pub use crate::error::{Error, Result};
    pub use crate::executor::{ExecutorError, OperationExecutor};
    pub use crate::factory::{OperationFactory, UpgradeOperationFactory};
    pub use crate::maintenance::{ConfigSource, MaintenancePolicy, StaticConfigSource};
    pub use crate::manager::OrchestrationManager;
    pub use crate::metrics::OrchestrationMetrics;
    pub use crate::operation::{Runtime, RuntimeOperation, ScheduledWindow};
    pub use crate::orchestration::{Orchestration, OrchestrationType, Parameters, State};
    pub use crate::queue::{Processor, TaskQueue};
    pub use crate::resolver::{GardenerRuntimeResolver, RuntimeResolver};
    pub use crate::retry::{RetryEngine, RetryResponse};
    pub use crate::store::{InstanceStore, OperationStore, OrchestrationStore};
    pub use crate::strategy::{ExecutionId, ParallelStrategy, Strategy};
}

pub use error::{Error, Result};
