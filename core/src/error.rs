//! Error types raised while wiring resource modules together.
//!
//! Runtime failures of HTTP calls never surface here: they are converted into
//! failure notifications by the task call adapter. [`SagaError`] only covers
//! construction-time problems, which are reported synchronously before any
//! I/O happens.

use thiserror::Error;

/// Errors produced while building calls, task sets, modules or transports.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SagaError {
    /// A precondition on a caller-supplied argument was violated
    ///
    /// Typically fatal to module setup. Never retried.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The underlying HTTP client could not be constructed
    #[error("HTTP client error: {0}")]
    Client(String),
}

impl SagaError {
    /// Shorthand for [`SagaError::InvalidArgument`].
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Returns `true` for [`SagaError::InvalidArgument`].
    #[must_use]
    pub const fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }
}
