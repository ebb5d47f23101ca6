use serde::{Deserialize, Serialize};

use crate::enums::SceneKeepReason;

/// One closed scene of a segmented video: a time range plus its
/// representative frame and whatever vision analysis ran against it.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct VideoScene {
    pub id: i64,
    pub asset_id: i64,
    pub start_ts: f64,
    pub end_ts: f64,
    pub description: Option<String>,
    #[sqlx(rename = "metadata")]
    pub scene_metadata: Option<serde_json::Value>,
    pub sharpness_score: f64,
    pub rep_frame_path: String,
    pub keep_reason: String,
}

impl VideoScene {
    pub fn keep_reason(&self) -> SceneKeepReason {
        self.keep_reason.parse().unwrap_or(SceneKeepReason::Forced)
    }
}

/// Resume state for an asset currently mid-segmentation. Exactly one row
/// per in-flight video asset; deleted (not just zeroed) once segmentation
/// finishes or the asset is abandoned.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct VideoActiveState {
    pub asset_id: i64,
    pub anchor_phash: String,
    pub scene_start_ts: f64,
    pub current_best_pts: f64,
    pub current_best_sharpness: f64,
}
