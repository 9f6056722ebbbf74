//! CSI error types.
//!
//! All errors in the `libcsi` crate are represented by the [`CsiError`] enum,
//! which derives [`thiserror::Error`] for ergonomic error handling and also
//! implements [`Serialize`]/[`Deserialize`] so plugin errors can travel back
//! over the socket to the caller.
//!
//! The variants mirror the status codes a CSI plugin reports.  Callers decide
//! whether to retry with [`CsiError::is_retryable`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for CSI operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum CsiError {
    /// A volume with the same name exists but was created with different
    /// parameters.
    #[error("volume {0} already exists with incompatible parameters")]
    AlreadyExists(String),

    /// The requested volume was not found.
    #[error("volume {0} not found")]
    NotFound(String),

    /// The caller supplied an invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The plugin has no capacity left for the request.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The plugin is temporarily unable to serve the request.
    #[error("plugin unavailable: {0}")]
    Unavailable(String),

    /// Another operation on the same volume is still in progress.
    #[error("operation aborted: {0}")]
    Aborted(String),

    /// The call did not finish before the caller's deadline.
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// The storage backend behind the plugin returned an error.
    #[error("backend error: {0}")]
    BackendError(String),

    /// A socket / transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),

    /// An unclassified internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CsiError {
    /// Create a [`CsiError::BackendError`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn backend<E: std::fmt::Display>(e: E) -> Self {
        Self::BackendError(e.to_string())
    }

    /// Create a [`CsiError::TransportError`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn transport<E: std::fmt::Display>(e: E) -> Self {
        Self::TransportError(e.to_string())
    }

    /// Create a [`CsiError::Internal`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }

    /// Whether the failure is transient.
    ///
    /// A retryable error leaves the outcome of the call unresolved: the
    /// operation may or may not have taken effect on the plugin side, so a
    /// retry must reuse the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_)
                | Self::Aborted(_)
                | Self::DeadlineExceeded(_)
                | Self::TransportError(_)
        )
    }
}
