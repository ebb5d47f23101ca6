//! AI workers: claim proxied/analyzed_light assets, run vision analysis
//! against local proxies (images) or scene rep frames (video), advance
//! assets toward `analyzed_light`/`completed`. Light and full passes share
//! almost everything except the claim status and which half of
//! `VisionCapability` they call; model-mismatch repair resets assets whose
//! analysis was stamped with a superseded model back to `proxied`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use msearch_db::{AssetRepository, ClaimRequest, ClaimScope, SceneRepository};
use msearch_media::MediaStore;
use msearch_models::{file_extensions, Asset, AssetStatus, VisualAnalysis};
use msearch_vision::VisionCapability;
use serde_json::json;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::logging::AssetLogger;
use crate::semantic_dedup::is_semantic_duplicate;
use crate::worker_base::WorkerRunner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiMode {
    Light,
    Full,
}

impl AiMode {
    fn claim_status(self) -> AssetStatus {
        match self {
            AiMode::Light => AssetStatus::Proxied,
            AiMode::Full => AssetStatus::AnalyzedLight,
        }
    }

    fn advance_status(self) -> AssetStatus {
        match self {
            AiMode::Light => AssetStatus::AnalyzedLight,
            AiMode::Full => AssetStatus::Completed,
        }
    }
}

pub struct ImageAiWorker {
    worker_id: String,
    asset_repo: Arc<AssetRepository>,
    store: Arc<MediaStore>,
    vision: Arc<dyn VisionCapability>,
    model_id: i32,
    mode: AiMode,
    library_slug: Option<String>,
    system_default_model_id: Option<i32>,
    batch_size: i64,
    lease_seconds: i64,
}

impl ImageAiWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker_id: String,
        asset_repo: Arc<AssetRepository>,
        store: Arc<MediaStore>,
        vision: Arc<dyn VisionCapability>,
        model_id: i32,
        mode: AiMode,
        library_slug: Option<String>,
        system_default_model_id: Option<i32>,
        batch_size: i64,
        lease_seconds: i64,
    ) -> Self {
        Self {
            worker_id,
            asset_repo,
            store,
            vision,
            model_id,
            mode,
            library_slug,
            system_default_model_id,
            batch_size,
            lease_seconds,
        }
    }

    fn scope(&self) -> ClaimScope {
        match &self.library_slug {
            Some(slug) => ClaimScope::Library(slug.clone()),
            None => ClaimScope::Global,
        }
    }

    async fn claim_batch(&self) -> Vec<msearch_db::ClaimedAsset> {
        let extensions: Vec<String> = file_extensions::image_extensions().into_iter().map(str::to_string).collect();
        let mut request = ClaimRequest::new(&self.worker_id, self.mode.claim_status(), self.scope());
        request.allowed_extensions = extensions;
        request.lease_seconds = self.lease_seconds;
        request.limit = self.batch_size.max(1);
        if self.system_default_model_id.is_some() {
            request.target_model_id = Some(self.model_id);
            request.system_default_model_id = self.system_default_model_id;
        }
        self.asset_repo.claim_asset_by_status(request).await.unwrap_or_default()
    }

    /// Owned handles for one claimed asset's processing, spawned as its own
    /// task so a batch claim (`ClaimRequest::limit`) processes concurrently
    /// the way the original's `ThreadPoolExecutor(max_workers=len(assets))`
    /// does, without requiring `WorkerRunner::process_task` to take `Arc<Self>`.
    fn task_handles(&self) -> ImageAnalysisTask {
        ImageAnalysisTask {
            worker_id: self.worker_id.clone(),
            asset_repo: self.asset_repo.clone(),
            store: self.store.clone(),
            vision: self.vision.clone(),
            model_id: self.model_id,
            mode: self.mode,
        }
    }
}

struct ImageAnalysisTask {
    worker_id: String,
    asset_repo: Arc<AssetRepository>,
    store: Arc<MediaStore>,
    vision: Arc<dyn VisionCapability>,
    model_id: i32,
    mode: AiMode,
}

impl ImageAnalysisTask {
    async fn run(self, claimed: msearch_db::ClaimedAsset) {
        let asset_id = claimed.asset.id;
        let logger = AssetLogger::new(asset_id, "ai-image");
        let proxy_rel = match &claimed.asset.preview_path {
            Some(p) => p.clone(),
            None => {
                logger.log_error("no preview_path on claimed asset");
                let _ = self
                    .asset_repo
                    .update_asset_status(asset_id, AssetStatus::Poisoned, Some("missing preview_path"), Some(&self.worker_id))
                    .await;
                return;
            }
        };
        let proxy_path = match self.store.resolve(&proxy_rel) {
            Ok(p) => p,
            Err(err) => {
                logger.log_error(&format!("proxy path resolution failed: {err}"));
                let _ = self
                    .asset_repo
                    .update_asset_status(asset_id, AssetStatus::Poisoned, Some(&err.to_string()), Some(&self.worker_id))
                    .await;
                return;
            }
        };

        let analysis_result = match self.mode {
            AiMode::Light => self.vision.analyze(&proxy_path).await,
            AiMode::Full => {
                let existing = claimed.asset.visual_analysis().unwrap_or_default();
                self.vision.refine(&proxy_path, &existing).await
            }
        };

        let analysis = match analysis_result {
            Ok(a) => a,
            Err(err) => {
                error!(asset_id, error = %err, "vision analysis failed");
                let _ = self
                    .asset_repo
                    .update_asset_status(asset_id, AssetStatus::Poisoned, Some(&err.to_string()), Some(&self.worker_id))
                    .await;
                return;
            }
        };

        let value = serde_json::to_value(&analysis).unwrap_or_else(|_| json!({}));
        if let Err(err) = self.asset_repo.set_visual_analysis(asset_id, &value, self.model_id).await {
            logger.log_error(&format!("visual analysis write failed: {err}"));
            return;
        }

        match self
            .asset_repo
            .update_asset_status(asset_id, self.mode.advance_status(), None, Some(&self.worker_id))
            .await
        {
            Ok(true) => logger.log_completion("vision analysis written"),
            Ok(false) => warn!(asset_id, "lease reclaimed mid-analysis; asset handled elsewhere"),
            Err(err) => logger.log_error(&format!("status update failed: {err}")),
        }
    }
}

#[async_trait]
impl WorkerRunner for ImageAiWorker {
    async fn process_task(&self) -> bool {
        let batch = self.claim_batch().await;
        if batch.is_empty() {
            return false;
        }
        let mut tasks = JoinSet::new();
        for claimed in batch {
            let task = self.task_handles();
            tasks.spawn(async move { task.run(claimed).await });
        }
        while tasks.join_next().await.is_some() {}
        true
    }
}

/// Repair pass: reset assets whose `analysis_model_id` no longer matches the
/// library's effective target vision model back to `proxied` for re-analysis.
pub async fn run_repair_pass(asset_repo: &AssetRepository, system_default_model_id: Option<i32>) -> msearch_db::DbResult<u64> {
    let mismatched = asset_repo.list_model_mismatched(system_default_model_id).await?;
    let mut reset_count = 0u64;
    for asset in &mismatched {
        asset_repo.update_asset_status(asset.id, AssetStatus::Proxied, None, None).await?;
        reset_count += 1;
    }
    if reset_count > 0 {
        info!(reset_count, "AI repair pass reset model-mismatched assets to proxied");
    }
    Ok(reset_count)
}

pub struct VideoAiWorker {
    worker_id: String,
    asset_repo: Arc<AssetRepository>,
    scene_repo: Arc<SceneRepository>,
    store: Arc<MediaStore>,
    vision: Arc<dyn VisionCapability>,
    model_id: i32,
    mode: AiMode,
    library_slug: Option<String>,
    lease_seconds: i64,
}

impl VideoAiWorker {
    pub fn new(
        worker_id: String,
        asset_repo: Arc<AssetRepository>,
        scene_repo: Arc<SceneRepository>,
        store: Arc<MediaStore>,
        vision: Arc<dyn VisionCapability>,
        model_id: i32,
        mode: AiMode,
        library_slug: Option<String>,
        lease_seconds: i64,
    ) -> Self {
        Self { worker_id, asset_repo, scene_repo, store, vision, model_id, mode, library_slug, lease_seconds }
    }

    fn scope(&self) -> ClaimScope {
        match &self.library_slug {
            Some(slug) => ClaimScope::Library(slug.clone()),
            None => ClaimScope::Global,
        }
    }

    async fn claim_one(&self) -> Option<msearch_db::ClaimedAsset> {
        let extensions: Vec<String> = file_extensions::VIDEO_EXTENSIONS.iter().map(|s| s.to_string()).collect();
        let mut request = ClaimRequest::new(&self.worker_id, self.mode.claim_status(), self.scope());
        request.allowed_extensions = extensions;
        request.lease_seconds = self.lease_seconds;
        self.asset_repo.claim_asset_by_status(request).await.ok().and_then(|mut v| v.pop())
    }

    fn scene_needs_vision(&self, scene: &msearch_models::VideoScene) -> bool {
        match self.mode {
            AiMode::Light => scene.description.is_none(),
            AiMode::Full => scene.description.is_some() && scene_needs_ocr(scene),
        }
    }

    async fn process_scenes(&self, asset: &Asset) -> Result<u64, String> {
        let scenes = self.scene_repo.list_scenes(asset.id).await.map_err(|e| e.to_string())?;
        let model_mismatch = asset.analysis_model_id.map(|id| id != self.model_id).unwrap_or(false);

        let mut last_written: Option<String> = None;
        let mut processed = 0u64;
        for scene in scenes.iter().filter(|s| self.scene_needs_vision(s)) {
            let rep_path = match self.store.resolve(&scene.rep_frame_path) {
                Ok(p) => p,
                Err(_) => continue,
            };
            if !rep_path.exists() {
                continue;
            }

            let use_light_replace = model_mismatch;
            let existing = scene_visual_analysis(scene);
            let analysis = self
                .run_vision(&rep_path, use_light_replace, existing.as_ref())
                .await
                .map_err(|e| e.to_string())?;

            if self.mode == AiMode::Light || use_light_replace {
                let description = analysis.description.clone().unwrap_or_default();
                let mut metadata = scene.scene_metadata.clone().unwrap_or_else(|| json!({}));
                metadata["moondream"] = serde_json::to_value(&analysis).unwrap_or_else(|_| json!({}));
                if is_semantic_duplicate(last_written.as_deref(), &description) {
                    metadata["semantic_duplicate"] = json!(true);
                }
                self.scene_repo
                    .update_scene_vision(scene.id, &description, &metadata)
                    .await
                    .map_err(|e| e.to_string())?;
                last_written = Some(description);
            } else {
                let mut metadata = scene.scene_metadata.clone().unwrap_or_else(|| json!({}));
                let mut moondream = metadata.get("moondream").cloned().unwrap_or_else(|| json!({}));
                moondream["ocr_text"] = json!(analysis.ocr_text);
                metadata["moondream"] = moondream;
                self.scene_repo
                    .update_scene_vision(scene.id, scene.description.as_deref().unwrap_or(""), &metadata)
                    .await
                    .map_err(|e| e.to_string())?;
            }
            processed += 1;
        }
        Ok(processed)
    }

    /// Light mode (or a model-mismatch repair, regardless of configured
    /// mode) re-runs a fresh analysis; a genuine full pass refines the
    /// scene's existing description with OCR detail.
    async fn run_vision(
        &self,
        rep_path: &Path,
        force_light: bool,
        existing: Option<&VisualAnalysis>,
    ) -> Result<VisualAnalysis, msearch_vision::VisionError> {
        if self.mode == AiMode::Light || force_light {
            self.vision.analyze(rep_path).await
        } else {
            self.vision.refine(rep_path, existing.unwrap_or(&VisualAnalysis::default())).await
        }
    }

    async fn process_one(&self, claimed: msearch_db::ClaimedAsset) {
        let asset_id = claimed.asset.id;
        let logger = AssetLogger::new(asset_id, "ai-video");

        let processed = match self.process_scenes(&claimed.asset).await {
            Ok(n) => n,
            Err(err) => {
                logger.log_error(&format!("scene vision pass failed: {err}"));
                let _ = self
                    .asset_repo
                    .update_asset_status(asset_id, AssetStatus::Poisoned, Some(&err), Some(&self.worker_id))
                    .await;
                return;
            }
        };

        // Asset-level marker so `reclaim_stale_leases` can tell a video past
        // this stage apart from one still mid-analysis; the searchable
        // content itself lives on each scene, not here.
        let marker = json!({"scenes_processed": processed});
        if let Err(err) = self.asset_repo.set_visual_analysis(asset_id, &marker, self.model_id).await {
            logger.log_error(&format!("analysis marker write failed: {err}"));
            return;
        }

        match self
            .asset_repo
            .update_asset_status(asset_id, self.mode.advance_status(), None, Some(&self.worker_id))
            .await
        {
            Ok(true) => logger.log_completion(&format!("{processed} scene(s) analyzed")),
            Ok(false) => warn!(asset_id, "lease reclaimed mid-analysis; asset handled elsewhere"),
            Err(err) => logger.log_error(&format!("status update failed: {err}")),
        }
    }
}

#[async_trait]
impl WorkerRunner for VideoAiWorker {
    async fn process_task(&self) -> bool {
        match self.claim_one().await {
            Some(claimed) => {
                self.process_one(claimed).await;
                true
            }
            None => false,
        }
    }
}

fn scene_visual_analysis(scene: &msearch_models::VideoScene) -> Option<VisualAnalysis> {
    scene
        .scene_metadata
        .as_ref()
        .and_then(|m| m.get("moondream"))
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
}

fn scene_needs_ocr(scene: &msearch_models::VideoScene) -> bool {
    scene
        .scene_metadata
        .as_ref()
        .and_then(|m| m.get("moondream"))
        .and_then(|m| m.as_object())
        .map(|m| !m.contains_key("ocr_text"))
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn light_mode_claims_proxied() {
        assert_eq!(AiMode::Light.claim_status(), AssetStatus::Proxied);
        assert_eq!(AiMode::Light.advance_status(), AssetStatus::AnalyzedLight);
    }

    #[test]
    fn full_mode_claims_analyzed_light() {
        assert_eq!(AiMode::Full.claim_status(), AssetStatus::AnalyzedLight);
        assert_eq!(AiMode::Full.advance_status(), AssetStatus::Completed);
    }
}
