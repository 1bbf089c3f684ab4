//! # kcp-core
//!
//! Shared primitives for the Kyma control plane orchestration engine.
//!
//! This crate provides the foundational types used by every orchestration component:
//!
//! - **Identifiers**: Strongly-typed IDs for orchestrations and runtime operations
//! - **Error Types**: Shared error definitions and result types
//! - **Observability**: Logging initialization and span constructors
//!
//! ## Example
//!
//! ```rust
//! use kcp_core::prelude::*;
//!
//! let orchestration = OrchestrationId::generate();
//! let operation = OperationId::generate();
//! assert_ne!(orchestration.as_str(), operation.as_str());
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod id;
pub mod observability;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::id::{OperationId, OrchestrationId};
    pub use crate::observability::{LogFormat, init_logging};
}

pub use error::{Error, Result};
pub use id::{OperationId, OrchestrationId};
pub use observability::{LogFormat, init_logging};
