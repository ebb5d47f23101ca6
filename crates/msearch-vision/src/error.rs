//! Error type for vision-capability calls.

use thiserror::Error;

pub type VisionResult<T> = Result<T, VisionError>;

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("vision backend not configured: {0}")]
    NotConfigured(String),

    #[error("vision request failed: {0}")]
    RequestFailed(String),

    #[error("vision backend returned an error response: {status}: {body}")]
    BackendError { status: u16, body: String },

    #[error("could not parse vision backend response: {0}")]
    InvalidResponse(String),

    #[error("io error reading image: {0}")]
    Io(#[from] std::io::Error),
}
