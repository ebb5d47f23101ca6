//! Structured asset-processing logging utilities.
//!
//! Provides consistent, structured logging for per-asset work with tracing
//! spans and contextual information.

use tracing::{error, info, warn, Span};

/// Asset logger for structured logging with consistent formatting.
///
/// Provides a simple interface for logging an asset's lifecycle through one
/// stage of the pipeline (proxy, scene indexing, vision analysis, ...),
/// with automatic contextual information (asset id, stage).
#[derive(Debug, Clone)]
pub struct AssetLogger {
    asset_id: i64,
    stage: String,
}

impl AssetLogger {
    pub fn new(asset_id: i64, stage: &str) -> Self {
        Self {
            asset_id,
            stage: stage.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(asset_id = self.asset_id, stage = %self.stage, "started: {}", message);
    }

    pub fn log_progress(&self, message: &str) {
        info!(asset_id = self.asset_id, stage = %self.stage, "progress: {}", message);
    }

    pub fn log_warning(&self, message: &str) {
        warn!(asset_id = self.asset_id, stage = %self.stage, "warning: {}", message);
    }

    pub fn log_error(&self, message: &str) {
        error!(asset_id = self.asset_id, stage = %self.stage, "error: {}", message);
    }

    pub fn log_completion(&self, message: &str) {
        info!(asset_id = self.asset_id, stage = %self.stage, "completed: {}", message);
    }

    pub fn asset_id(&self) -> i64 {
        self.asset_id
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Create a tracing span for this asset's processing, for attaching
    /// additional structured fields across a multi-step operation.
    pub fn create_span(&self) -> Span {
        tracing::info_span!("asset", asset_id = self.asset_id, stage = %self.stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_logger_carries_id_and_stage() {
        let logger = AssetLogger::new(42, "proxy");
        assert_eq!(logger.asset_id(), 42);
        assert_eq!(logger.stage(), "proxy");
    }
}
