//! Error types for the re-identification engine.
//!
//! Most "failures" of the matching loop are not errors at all (an empty frame, a
//! skipped pose, a degenerate box). What remains here are the conditions a caller
//! genuinely has to act on: a broken capture source, a cancelled enrollment, an
//! invalid configuration, or I/O around the diagnostic snapshot.

use thiserror::Error;

/// Result type for re-identification operations.
pub type ReidResult<T> = Result<T, ReidError>;

/// Errors surfaced by the engine to its caller.
#[derive(Debug, Error)]
pub enum ReidError {
    #[error("Frame capture failed: {0}")]
    Capture(String),

    #[error("Detector failed: {0}")]
    Detection(String),

    #[error("Enrollment was cancelled by the operator")]
    EnrollmentCancelled,

    #[error("Base feature set is empty; refusing to start tracking")]
    EmptyBaseSet,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Session is still shared with a live handle")]
    SessionInUse,

    #[error("Background task failed: {0}")]
    TaskJoin(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl ReidError {
    /// Create a capture failure error.
    pub fn capture(message: impl Into<String>) -> Self {
        Self::Capture(message.into())
    }

    /// Create a detector failure error.
    pub fn detection(message: impl Into<String>) -> Self {
        Self::Detection(message.into())
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}

impl From<tokio::task::JoinError> for ReidError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}
