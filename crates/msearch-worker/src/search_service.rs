//! The two in-scope HTTP endpoints (search, library-listing) plus the
//! clip-on-demand redirect and library-picker endpoint they're served
//! alongside, grounded on `api/main.py`'s FastAPI routes. Everything else
//! that file exposes — the template-rendered dashboard, project export,
//! asset-detail page — is out of scope per spec.md §1.

use std::path::Path;
use std::sync::Arc;

use axum::extract::{Path as AxumPath, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Json, Router};
use msearch_db::{AssetRepository, LibraryRepository, SearchRepository, SortKey};
use msearch_media::{FfmpegCommand, FfmpegRunner, MediaStore};
use msearch_models::{AssetType, SearchQuery};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

const CLIP_DURATION_SECS: f64 = 10.0;
const CLIP_LEAD_IN_SECS: f64 = 2.0;

const NO_THUMB_STATUSES: &[&str] = &["pending", "processing", "failed", "poisoned"];

#[derive(Clone)]
pub struct AppState {
    pub search_repo: Arc<SearchRepository>,
    pub asset_repo: Arc<AssetRepository>,
    pub library_repo: Arc<LibraryRepository>,
    pub store: Arc<MediaStore>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<msearch_db::DbError> for ApiError {
    fn from(err: msearch_db::DbError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<msearch_media::MediaError> for ApiError {
    fn from(err: msearch_media::MediaError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorBody { detail: self.to_string() })).into_response()
    }
}

fn format_mmss(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{:02}:{:02}", total / 60, total % 60)
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct SearchResultOut {
    pub asset_id: i64,
    #[serde(rename = "type")]
    pub asset_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_preview_url: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub final_rank: f64,
    pub match_ratio: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_scene_ts: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_scene_ts_seconds: Option<f64>,
    pub library_slug: String,
    pub library_name: String,
    pub filename: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    pub ocr: Option<String>,
    #[serde(default)]
    pub library: Vec<String>,
    #[serde(default, rename = "type")]
    pub asset_type: Vec<String>,
    pub tag: Option<String>,
    pub limit: Option<i64>,
}

fn thumbnail_url(library_slug: &str, asset_id: i64, status: &str) -> Option<String> {
    if NO_THUMB_STATUSES.contains(&status) {
        return None;
    }
    Some(format!("/media/{library_slug}/thumbnails/{}/{asset_id}.jpg", asset_id % 1000))
}

fn media_url(rel_path: &Option<String>) -> Option<String> {
    rel_path.as_ref().map(|p| format!("/media/{}", p.trim_start_matches('/')))
}

fn filename_of(rel_path: &str) -> String {
    Path::new(rel_path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| rel_path.to_string())
}

pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Response, ApiError> {
    let query = SearchQuery {
        vibe: params.q,
        ocr: params.ocr,
        library_slugs: params.library.clone(),
        asset_types: params.asset_type,
        tag: params.tag,
        limit: params.limit,
    };

    let hits = state.search_repo.search(&query).await?;
    let incomplete = state.library_repo.any_libraries_analyzing(&params.library).await?;

    let out: Vec<SearchResultOut> = hits
        .into_iter()
        .map(|h| SearchResultOut {
            asset_id: h.asset_id,
            thumbnail_url: thumbnail_url(&h.library_slug, h.asset_id, &h.status),
            preview_url: media_url(&h.preview_path),
            video_preview_url: media_url(&h.video_preview_path),
            status: h.status,
            error_message: h.error_message,
            final_rank: h.final_rank,
            match_ratio: (h.match_ratio * 100.0 * 10.0).round() / 10.0,
            best_scene_ts: h.best_scene_ts.map(format_mmss),
            best_scene_ts_seconds: h.best_scene_ts,
            library_slug: h.library_slug,
            library_name: h.library_name,
            filename: filename_of(&h.filename),
            asset_type: h.asset_type,
        })
        .collect();

    let mut headers = HeaderMap::new();
    headers.insert(
        "X-Search-Incomplete",
        HeaderValue::from_static(if incomplete { "true" } else { "false" }),
    );
    Ok((headers, Json(out)).into_response())
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct LibraryAssetOut {
    pub asset_id: i64,
    #[serde(rename = "type")]
    pub asset_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_preview_url: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub match_ratio: f64,
    pub best_scene_ts: Option<String>,
    pub best_scene_ts_seconds: Option<f64>,
    pub library_slug: String,
    pub library_name: String,
    pub filename: String,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct LibraryAssetsOut {
    pub items: Vec<LibraryAssetOut>,
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
pub struct LibraryAssetsParams {
    pub library: String,
    #[serde(default = "default_sort")]
    pub sort: String,
    #[serde(default = "default_order")]
    pub order: String,
    #[serde(default, rename = "type")]
    pub asset_type: Vec<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_sort() -> String {
    "date".to_string()
}
fn default_order() -> String {
    "desc".to_string()
}
fn default_limit() -> i64 {
    50
}

/// `sort`/`order` collapse onto this crate's combined `SortKey`; only
/// `date` (source mtime) and `added` (id, i.e. scan order) are meaningful
/// over the columns this repository tracks — `name`/`size`/`type` aren't
/// indexed sort keys here and fall back to scan order.
fn sort_key(sort: &str, order: &str) -> SortKey {
    match (sort, order) {
        ("date", "asc") => SortKey::IdAsc,
        ("date", _) => SortKey::MtimeDesc,
        (_, "asc") => SortKey::IdAsc,
        _ => SortKey::IdDesc,
    }
}

pub async fn library_assets(
    State(state): State<AppState>,
    Query(params): Query<LibraryAssetsParams>,
) -> Result<Json<LibraryAssetsOut>, ApiError> {
    let asset_types: Vec<AssetType> = params
        .asset_type
        .iter()
        .filter_map(|t| t.parse().ok())
        .collect();

    let sort = sort_key(&params.sort, &params.order);
    let mut assets = state
        .asset_repo
        .list_for_library(&params.library, sort, &asset_types, params.limit + 1, params.offset)
        .await?;

    let has_more = assets.len() as i64 > params.limit;
    assets.truncate(params.limit as usize);

    let library_name = state
        .library_repo
        .get_by_slug(&params.library, false)
        .await?
        .map(|l| l.name)
        .unwrap_or_else(|| params.library.clone());

    let items = assets
        .into_iter()
        .map(|a| LibraryAssetOut {
            asset_id: a.id,
            asset_type: a.asset_type,
            thumbnail_url: thumbnail_url(&a.library_id, a.id, &a.status),
            preview_url: media_url(&a.preview_path),
            video_preview_url: media_url(&a.video_preview_path),
            status: a.status,
            error_message: a.error_message,
            match_ratio: 100.0,
            best_scene_ts: None,
            best_scene_ts_seconds: None,
            library_slug: a.library_id,
            library_name: library_name.clone(),
            filename: filename_of(&a.rel_path),
        })
        .collect();

    Ok(Json(LibraryAssetsOut { items, has_more }))
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct LibraryOut {
    pub slug: String,
    pub name: String,
    pub is_analyzing: bool,
}

pub async fn libraries(State(state): State<AppState>) -> Result<Json<Vec<LibraryOut>>, ApiError> {
    let libs = state.library_repo.list_libraries_with_status().await?;
    Ok(Json(
        libs.into_iter()
            .map(|(lib, is_analyzing)| LibraryOut { slug: lib.slug, name: lib.name, is_analyzing })
            .collect(),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ClipParams {
    pub ts: f64,
}

/// Lazily produce (if missing) and redirect to a ~10s web-safe clip
/// centered on `ts`, for verifying a video search hit. Mirrors
/// `clip_extractor.py`'s fast-seek-then-transcode args exactly: `-ss`
/// before `-i` for a cheap approximate seek, starting 2s early for context.
pub async fn asset_clip(
    State(state): State<AppState>,
    AxumPath(asset_id): AxumPath<i64>,
    Query(params): Query<ClipParams>,
) -> Result<Response, ApiError> {
    let asset = state
        .asset_repo
        .get_by_id(asset_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("asset not found".to_string()))?;
    if asset.asset_type() != AssetType::Video {
        return Err(ApiError::BadRequest("clip endpoint is for video assets only".to_string()));
    }
    let absolute_path = state
        .library_repo
        .get_absolute_path(&asset.library_id, false)
        .await?
        .ok_or_else(|| ApiError::NotFound("library not found".to_string()))?;
    let source_path = Path::new(&absolute_path).join(&asset.rel_path);
    if !source_path.exists() {
        return Err(ApiError::NotFound("source file not found".to_string()));
    }

    let clip_name = format!("clip_{}.mp4", params.ts as i64);
    let clip_rel = state.store.video_clip_rel_path(&asset.library_id, asset_id, &clip_name);
    let dest_path = state.store.resolve(&clip_rel)?;

    if !dest_path.exists() {
        if let Some(parent) = dest_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| ApiError::Internal(e.to_string()))?;
        }
        let safe_start = (params.ts - CLIP_LEAD_IN_SECS).max(0.0);
        let cmd = FfmpegCommand::new(&source_path, &dest_path)
            .seek(safe_start)
            .duration(CLIP_DURATION_SECS)
            .output_args(["-map", "0:v:0", "-map", "0:a:0?"])
            .video_codec("libx264")
            .preset("veryfast")
            .crf(28)
            .video_filter("scale='min(1280\\,iw)':-2")
            .audio_codec("aac")
            .audio_bitrate("128k")
            .output_args(["-movflags", "+faststart"]);
        if FfmpegRunner::new().run(&cmd).await.is_err() {
            warn!(asset_id, "clip extraction failed");
            return Err(ApiError::Internal("clip extraction failed".to_string()));
        }
    }

    Ok(Redirect::to(&format!("/media/{clip_rel}")).into_response())
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/search", get(search))
        .route("/api/library-assets", get(library_assets))
        .route("/api/libraries", get(libraries))
        .route("/api/asset/:asset_id/clip", get(asset_clip))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_mmss() {
        assert_eq!(format_mmss(65.0), "01:05");
        assert_eq!(format_mmss(0.0), "00:00");
    }

    #[test]
    fn no_thumb_for_pending_asset() {
        assert_eq!(thumbnail_url("lib", 1, "pending"), None);
        assert!(thumbnail_url("lib", 1, "completed").is_some());
    }

    #[test]
    fn sort_key_maps_date_desc_to_mtime() {
        assert!(matches!(sort_key("date", "desc"), SortKey::MtimeDesc));
        assert!(matches!(sort_key("added", "asc"), SortKey::IdAsc));
    }
}
