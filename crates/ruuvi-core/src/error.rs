//! Error types for ruuvi-core.
//!
//! The pipeline keeps its failure surface small on purpose:
//!
//! - **Decode failures** stay local to the payload decoder
//!   ([`ruuvi_types::DecodeError`]); the sample listener treats them as
//!   "skip this advertisement", so they never surface here.
//! - **Sink/publish errors** are caught at the pipeline boundary, logged, and
//!   do not stop the pipeline.
//! - **Cancellation** is clean termination and reported as success.
//! - **`AlreadyRunning`** is a caller programming error and fails fast.

use thiserror::Error;

/// Errors produced by the listener and publisher pipeline.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A second `run` was attempted while the pipeline was already running.
    #[error("publisher is already running")]
    AlreadyRunning,

    /// The advertisement source failed to start or terminated abnormally.
    #[error("advertisement source error: {0}")]
    Source(String),
}

impl Error {
    /// Create a source error from any displayable cause.
    pub fn source(cause: impl std::fmt::Display) -> Self {
        Self::Source(cause.to_string())
    }
}

/// Result type alias using ruuvi-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
