//! Error types for the orchestration domain.

use kcp_core::{OperationId, OrchestrationId};

/// The result type used throughout kcp-orchestration.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in orchestration operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An orchestration was not found.
    #[error("orchestration not found: {orchestration_id}")]
    OrchestrationNotFound {
        /// The orchestration ID that was not found.
        orchestration_id: OrchestrationId,
    },

    /// A runtime operation was not found.
    #[error("operation not found: {operation_id}")]
    OperationNotFound {
        /// The operation ID that was not found.
        operation_id: OperationId,
    },

    /// An instance was not found.
    #[error("instance not found: {instance_id}")]
    InstanceNotFound {
        /// The instance ID that was not found.
        instance_id: String,
    },

    /// An invalid state transition was attempted.
    #[error("invalid state transition: {from} -> {to} ({reason})")]
    InvalidStateTransition {
        /// The current state.
        from: String,
        /// The attempted target state.
        to: String,
        /// The reason the transition is invalid.
        reason: String,
    },

    /// The orchestration was canceled while another writer was working on it.
    #[error("orchestration {orchestration_id} was canceled")]
    OrchestrationCanceled {
        /// The canceled orchestration.
        orchestration_id: OrchestrationId,
    },

    /// A runtime target entry could not be evaluated.
    #[error("invalid runtime target: {message}")]
    InvalidTarget {
        /// Description of the invalid target.
        message: String,
    },

    /// A maintenance window or policy value could not be parsed.
    #[error("invalid maintenance window: {message}")]
    InvalidMaintenanceWindow {
        /// Description of the parse failure.
        message: String,
    },

    /// The requested strategy is not supported.
    #[error("unsupported strategy: {strategy}")]
    UnsupportedStrategy {
        /// The strategy name.
        strategy: String,
    },

    /// Invalid input was provided by the caller.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration failure.
        message: String,
    },

    /// A fleet listing call (shoots, runtime lifecycle) failed.
    #[error("fleet listing failed: {message}")]
    Listing {
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// An error from kcp-core.
    #[error("core error: {0}")]
    Core(#[from] kcp_core::Error),
}

impl Error {
    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new listing error.
    #[must_use]
    pub fn listing(message: impl Into<String>) -> Self {
        Self::Listing {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns true if the error reports a missing record.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::OrchestrationNotFound { .. }
                | Self::OperationNotFound { .. }
                | Self::InstanceNotFound { .. }
        )
    }
}
