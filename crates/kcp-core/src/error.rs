//! Error types and result aliases shared across the control plane.

/// The result type used throughout kcp-core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in shared primitives.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An invalid identifier was provided.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of what made the ID invalid.
        message: String,
    },
}
