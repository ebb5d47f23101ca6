use serde::{Deserialize, Serialize};

/// One row of a blended search response: an image or video asset, ranked
/// against the text/OCR/tag query, with enough context for the API layer to
/// build URLs without a second lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub asset_id: i64,
    #[serde(rename = "type")]
    pub asset_type: String,
    pub status: String,
    pub error_message: Option<String>,
    pub final_rank: f64,
    /// Fraction of a video's scenes that matched the query; always `1.0`
    /// for image hits.
    pub match_ratio: f64,
    pub best_scene_ts: Option<f64>,
    pub library_slug: String,
    pub library_name: String,
    pub filename: String,
    pub thumbnail_path: Option<String>,
    pub preview_path: Option<String>,
    pub video_preview_path: Option<String>,
}

/// Parameters accepted by the search service. `vibe` matches against
/// description+tags, `ocr` against OCR text only; both are optional and may
/// be combined.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchQuery {
    pub vibe: Option<String>,
    pub ocr: Option<String>,
    #[serde(default)]
    pub library_slugs: Vec<String>,
    #[serde(default)]
    pub asset_types: Vec<String>,
    pub tag: Option<String>,
    pub limit: Option<i64>,
}
