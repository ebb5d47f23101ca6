//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("job failed: {0}")]
    JobFailed(String),

    #[error("processing failed: {0}")]
    ProcessingFailed(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("database error: {0}")]
    Db(#[from] msearch_db::DbError),

    #[error("media error: {0}")]
    Media(#[from] msearch_media::MediaError),

    #[error("vision error: {0}")]
    Vision(#[from] msearch_vision::VisionError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn processing_failed(msg: impl Into<String>) -> Self {
        Self::ProcessingFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Whether retrying the same asset without intervention stands any
    /// chance of succeeding. Database/vision hiccups are transient; a
    /// malformed config or a job that already declared itself failed is not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkerError::Db(_) | WorkerError::Vision(_) | WorkerError::Io(_))
    }
}
