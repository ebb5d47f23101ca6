use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::{AssetStatus, AssetType};
use crate::visual_analysis::VisualAnalysis;

/// One discovered file: an image or a video, somewhere in the staged
/// pipeline between `pending` and `completed`.
///
/// `worker_id`/`lease_expires_at` are either both `Some` (status is
/// `processing` and some worker owns the lease) or both `None` — never one
/// without the other.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Asset {
    pub id: i64,
    pub library_id: String,
    pub rel_path: String,
    #[sqlx(rename = "type")]
    pub asset_type: String,
    pub mtime: f64,
    pub size: i64,
    pub status: String,
    pub tags_model_id: Option<i32>,
    pub analysis_model_id: Option<i32>,
    pub worker_id: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub visual_analysis: Option<serde_json::Value>,
    pub preview_path: Option<String>,
    pub video_preview_path: Option<String>,
    pub segmentation_version: Option<i32>,
}

impl Asset {
    pub fn asset_type(&self) -> AssetType {
        self.asset_type.parse().unwrap_or(AssetType::Image)
    }

    pub fn status(&self) -> AssetStatus {
        self.status.parse().unwrap_or(AssetStatus::Pending)
    }

    pub fn is_leased(&self) -> bool {
        self.worker_id.is_some()
    }

    /// The source-of-truth retry ceiling: anything past this is poisoned
    /// rather than retried again.
    pub const MAX_RETRIES: i32 = 5;

    pub fn should_poison(&self) -> bool {
        self.retry_count > Self::MAX_RETRIES
    }

    pub fn visual_analysis(&self) -> Option<VisualAnalysis> {
        self.visual_analysis
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Upsert input for the scanner: everything it observes on disk for one
/// file. Status/worker_id/lease are never touched by an upsert — only by
/// the claim/update-status paths.
#[derive(Debug, Clone)]
pub struct ScannedAsset {
    pub library_id: String,
    pub rel_path: String,
    pub asset_type: AssetType,
    pub mtime: f64,
    pub size: i64,
}
