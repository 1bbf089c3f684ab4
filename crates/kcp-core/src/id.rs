//! Strongly-typed identifiers for orchestration entities.
//!
//! Identifiers are opaque strings on the wire. Freshly generated IDs are ULIDs,
//! which keeps them sortable by creation time, but any non-empty string coming
//! from storage is accepted.
//!
//! # Example
//!
//! ```rust
//! use kcp_core::id::{OperationId, OrchestrationId};
//!
//! let orchestration = OrchestrationId::generate();
//! let operation: OperationId = "op-1".parse().unwrap();
//!
//! // IDs are different types - this won't compile:
//! // let wrong: OrchestrationId = operation;
//! # let _ = (orchestration, operation);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

use crate::error::{Error, Result};

/// A unique identifier for an orchestration (one fleet-wide upgrade campaign).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrchestrationId(String);

impl OrchestrationId {
    /// Generates a new unique orchestration ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Wraps an existing identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrchestrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for OrchestrationId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().is_empty() {
            return Err(Error::InvalidId {
                message: "orchestration ID must not be empty".into(),
            });
        }
        Ok(Self(s.to_string()))
    }
}

/// A unique identifier for a runtime operation (one runtime's unit of upgrade work).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    /// Generates a new unique operation ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Wraps an existing identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for OperationId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().is_empty() {
            return Err(Error::InvalidId {
                message: "operation ID must not be empty".into(),
            });
        }
        Ok(Self(s.to_string()))
    }
}
