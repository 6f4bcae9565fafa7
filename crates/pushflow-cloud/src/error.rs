//! Control plane error types

use thiserror::Error;

/// Errors returned by a [`ControlPlane`](crate::ControlPlane) implementation.
///
/// Payloads are plain strings so the error can be cloned into events and
/// compared in tests.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CloudError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    #[error("Not authorized: {0}")]
    Unauthorized(String),

    /// The platform rejected the request body (bad manifest values etc.).
    #[error("Rejected by the platform: {0}")]
    UnprocessableEntity(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    /// The upload stream broke mid-transfer. Safe to retry with a fresh
    /// stream.
    #[error("Upload interrupted: {0}")]
    UploadInterrupted(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl CloudError {
    pub fn is_retryable_upload(&self) -> bool {
        matches!(self, CloudError::UploadInterrupted(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, CloudError::AlreadyExists(_))
    }
}

impl From<serde_json::Error> for CloudError {
    fn from(e: serde_json::Error) -> Self {
        CloudError::InvalidResponse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
