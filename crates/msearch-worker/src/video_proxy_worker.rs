//! Video proxy worker: transcodes a pending video asset to a 720p proxy,
//! extracts a poster frame and a hover-preview head clip, then runs
//! resumable scene indexing. Builds out the full pipeline sketched by
//! `video/indexing.py` and `video_worker.py`'s head-clip backfill, rather
//! than the narrower thumbnail-only "Phase 1" stub.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use msearch_db::{
    ActiveState, AssetRepository, ClaimRequest, ClaimScope, ClaimedAsset, NewScene, SceneRepository,
};
use msearch_media::{
    probe_video, segment_video, segmentation_version, Derivative, FfmpegCommand, FfmpegRunner,
    MediaStore, ResumeState, SceneResult, SegmenterOptions,
};
use msearch_models::{file_extensions, AssetStatus};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::logging::AssetLogger;
use crate::worker_base::WorkerRunner;

const HEAD_CLIP_DURATION_SECS: f64 = 10.0;
const RESUME_REWIND_SECS: f64 = 2.0;
const DURATION_TOLERANCE_SECS: f64 = 2.0;

/// Hardware encoders tried in order before the `libx264` software fallback.
/// Unlike `VideoScanner` (always `-hwaccel auto`, which ffmpeg itself
/// degrades gracefully when no accelerator is present), encoder selection
/// has no equivalent auto-negotiation, so the fallback chain is explicit
/// here.
const HWACCEL_ENCODERS: &[&str] = &["h264_videotoolbox", "h264_nvenc", "h264_qsv"];

pub struct VideoProxyWorker {
    worker_id: String,
    asset_repo: Arc<AssetRepository>,
    scene_repo: Arc<SceneRepository>,
    store: Arc<MediaStore>,
    library_slug: Option<String>,
    lease_seconds: i64,
}

impl VideoProxyWorker {
    pub fn new(
        worker_id: String,
        asset_repo: Arc<AssetRepository>,
        scene_repo: Arc<SceneRepository>,
        store: Arc<MediaStore>,
        library_slug: Option<String>,
        lease_seconds: i64,
    ) -> Self {
        Self { worker_id, asset_repo, scene_repo, store, library_slug, lease_seconds }
    }

    fn scope(&self) -> ClaimScope {
        match &self.library_slug {
            Some(slug) => ClaimScope::Library(slug.clone()),
            None => ClaimScope::Global,
        }
    }

    async fn claim_one(&self) -> Option<ClaimedAsset> {
        let extensions: Vec<String> = file_extensions::VIDEO_EXTENSIONS.iter().map(|s| s.to_string()).collect();
        let mut request = ClaimRequest::new(&self.worker_id, AssetStatus::Pending, self.scope());
        request.allowed_extensions = extensions;
        request.lease_seconds = self.lease_seconds;
        self.asset_repo.claim_asset_by_status(request).await.ok().and_then(|mut v| v.pop())
    }

    async fn fail(&self, asset_id: i64, message: &str) {
        let _ = self
            .asset_repo
            .update_asset_status(asset_id, AssetStatus::Failed, Some(message), Some(&self.worker_id))
            .await;
    }

    /// 720p H.264/AAC, scaled down (never up), trying hardware encoders
    /// before the `libx264` fallback.
    async fn transcode_720p(&self, source: &Path, dest: &Path) -> bool {
        for encoder in HWACCEL_ENCODERS {
            let cmd = FfmpegCommand::new(source, dest)
                .video_filter("scale=-2:min(720\\,ih)")
                .video_codec(*encoder)
                .audio_codec("aac")
                .audio_bitrate("128k");
            if FfmpegRunner::new().run(&cmd).await.is_ok() {
                return true;
            }
        }
        let cmd = FfmpegCommand::new(source, dest)
            .video_filter("scale=-2:min(720\\,ih)")
            .video_codec("libx264")
            .preset("veryfast")
            .crf(23)
            .audio_codec("aac")
            .audio_bitrate("128k");
        FfmpegRunner::new().run(&cmd).await.is_ok()
    }

    async fn extract_poster(&self, source: &Path, dest: &Path) -> bool {
        let cmd = FfmpegCommand::new(source, dest).seek(0.0).single_frame();
        FfmpegRunner::new().run(&cmd).await.is_ok()
    }

    /// Stream-copy the first ~10s when the container allows it; fall back
    /// to a cheap re-encode otherwise. Mirrors `clip_extractor.py`'s
    /// on-demand clip args for the transcode path.
    async fn extract_head_clip(&self, source: &Path, dest: &Path) -> bool {
        let copy_cmd = FfmpegCommand::new(source, dest)
            .duration(HEAD_CLIP_DURATION_SECS)
            .video_codec("copy")
            .audio_codec("copy")
            .output_args(["-movflags", "+faststart"]);
        if FfmpegRunner::new().run(&copy_cmd).await.is_ok() {
            return true;
        }
        let transcode_cmd = FfmpegCommand::new(source, dest)
            .duration(HEAD_CLIP_DURATION_SECS)
            .video_filter("scale='min(1280\\,iw)':-2")
            .video_codec("libx264")
            .preset("veryfast")
            .crf(28)
            .audio_codec("aac")
            .audio_bitrate("128k")
            .output_args(["-movflags", "+faststart"]);
        FfmpegRunner::new().run(&transcode_cmd).await.is_ok()
    }

    /// Drive `segment_video`, persisting each closed scene through an
    /// unbounded channel: `segment_video`'s `on_scene` callback is
    /// synchronous, so a DB write can't happen inline without blocking the
    /// decode loop's own task. The channel closes (and the persist task
    /// drains and exits) once `segment_video` returns, since the closure
    /// that owns `tx` is dropped with it.
    async fn persist_scenes(
        &self,
        asset_id: i64,
        library_slug: &str,
        source: &Path,
        options: SegmenterOptions,
    ) -> Result<u64, msearch_media::MediaError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<(SceneResult, Option<ResumeState>)>();
        let scene_repo = self.scene_repo.clone();
        let store = self.store.clone();
        let library_slug = library_slug.to_string();

        let persist_task = tokio::spawn(async move {
            let mut saved = 0u64;
            while let Some((scene, resume)) = rx.recv().await {
                let rep_rel =
                    store.scene_rep_frame_rel_path(&library_slug, asset_id, scene.scene_start_pts, scene.scene_end_pts);
                if let Err(err) = store.write_atomic(&rep_rel, &scene.best_frame_bytes).await {
                    error!(asset_id, error = %err, "failed to write scene rep-frame");
                    continue;
                }
                let new_scene = NewScene {
                    start_ts: scene.scene_start_pts,
                    end_ts: scene.scene_end_pts,
                    description: None,
                    metadata: None,
                    sharpness_score: scene.sharpness_score,
                    rep_frame_path: rep_rel,
                    keep_reason: scene.keep_reason.as_str(),
                };
                let next_state = resume.map(|r| ActiveState {
                    anchor_phash: r.anchor_phash,
                    scene_start_ts: r.scene_start_pts,
                    current_best_pts: r.current_best_pts,
                    current_best_sharpness: r.current_best_sharpness,
                });
                match scene_repo.save_scene_and_update_state(asset_id, &new_scene, next_state.as_ref()).await {
                    Ok(_) => saved += 1,
                    Err(err) => error!(asset_id, error = %err, "failed to save scene"),
                }
            }
            saved
        });

        let source = source.to_path_buf();
        segment_video(&source, options, || false, move |scene, resume| {
            let _ = tx.send((scene, resume));
        })
        .await?;

        Ok(persist_task.await.unwrap_or(0))
    }

    /// Resume-aware scene indexing for one asset: seeds `SegmenterOptions`
    /// from the asset's `max(end_ts)` and any open active-state row, exactly
    /// per the resume contract (reseek to `max(0, max_end_ts - 2.0)`,
    /// discard frames short of `max_end_ts`, restore the anchor/scene-start
    /// of a still-open scene).
    async fn run_scene_indexing(
        &self,
        asset_id: i64,
        library_slug: &str,
        source: &Path,
        duration_hint: Option<f64>,
    ) -> Result<u64, msearch_media::MediaError> {
        let max_end_ts = self.scene_repo.get_max_end_ts(asset_id).await.unwrap_or(None);
        let active_state = self.scene_repo.get_active_state(asset_id).await.unwrap_or(None);

        let mut options = SegmenterOptions { duration_hint, ..SegmenterOptions::default() };
        if let Some(max_end) = max_end_ts {
            options.seek_pts = Some((max_end - RESUME_REWIND_SECS).max(0.0));
            options.discard_until_pts = Some(max_end);
            if let Some(state) = &active_state {
                options.initial_scene_start_pts = Some(state.scene_start_ts);
                options.initial_anchor_phash = Some(state.anchor_phash.clone());
            }
        }

        self.persist_scenes(asset_id, library_slug, source, options).await
    }

    async fn process_one(&self, claimed: ClaimedAsset) {
        let asset_id = claimed.asset.id;
        let logger = AssetLogger::new(asset_id, "video-proxy");
        let library_slug = claimed.asset.library_id.clone();
        let source_path = Path::new(&claimed.library_absolute_path).join(&claimed.asset.rel_path);

        let current_version = segmentation_version();
        if let Some(persisted) = claimed.asset.segmentation_version {
            if persisted != current_version {
                logger.log_warning("segmentation_version changed; clearing scene index for re-segmentation");
                let _ = self.scene_repo.delete_scenes_for_asset(asset_id).await;
                let _ = self.scene_repo.delete_active_state(asset_id).await;
            }
        }

        let tmp_dir = self.store.tmp_dir(Some(&library_slug)).join(asset_id.to_string());
        if let Err(err) = tokio::fs::create_dir_all(&tmp_dir).await {
            logger.log_error(&format!("tmp dir creation failed: {err}"));
            self.fail(asset_id, &err.to_string()).await;
            return;
        }

        if let Err(message) = self.build_derivatives(asset_id, &library_slug, &source_path, &tmp_dir, &logger).await {
            let _ = tokio::fs::remove_dir_all(&tmp_dir).await;
            self.fail(asset_id, &message).await;
            return;
        }
        let _ = tokio::fs::remove_dir_all(&tmp_dir).await;

        let probed_duration = probe_video(&source_path).await.ok().map(|info| info.duration);

        let saved = match self
            .run_scene_indexing(asset_id, &library_slug, &source_path, probed_duration)
            .await
        {
            Ok(saved) => saved,
            Err(err) => {
                logger.log_error(&format!("scene indexing failed: {err}"));
                self.fail(asset_id, &err.to_string()).await;
                return;
            }
        };

        if saved == 0 {
            logger.log_warning("no scenes produced; source may be unsupported or corrupt");
            self.fail(asset_id, "scene indexing produced no scenes").await;
            return;
        }

        if let Some(duration) = probed_duration {
            if let Ok(Some(indexed_end)) = self.scene_repo.get_max_end_ts(asset_id).await {
                let tolerance = DURATION_TOLERANCE_SECS.min(duration * 0.02);
                if indexed_end < duration - tolerance {
                    logger.log_warning(&format!(
                        "scene index truncated: indexed to {indexed_end:.1}s but duration is {:.1}s",
                        duration
                    ));
                    self.fail(asset_id, "scene index truncated before source duration").await;
                    return;
                }
            }
        }

        match self
            .asset_repo
            .update_asset_status(asset_id, AssetStatus::Proxied, None, Some(&self.worker_id))
            .await
        {
            Ok(true) => logger.log_completion(&format!("{saved} scene(s) indexed")),
            Ok(false) => warn!(asset_id, "lease reclaimed mid-proxy; asset handled elsewhere"),
            Err(err) => logger.log_error(&format!("status update failed: {err}")),
        }
    }

    /// Poster frame, 720p proxy, and head clip, written into the store
    /// before `video_preview_path`/`preview_path` are stamped. Returns a
    /// human-readable failure reason on the first step that fails.
    async fn build_derivatives(
        &self,
        asset_id: i64,
        library_slug: &str,
        source_path: &Path,
        tmp_dir: &Path,
        logger: &AssetLogger,
    ) -> Result<(), String> {
        let poster_tmp = tmp_dir.join("poster.jpg");
        if !self.extract_poster(source_path, &poster_tmp).await {
            return Err("poster frame extraction failed".to_string());
        }

        let proxy_tmp = tmp_dir.join("proxy.mp4");
        if !self.transcode_720p(source_path, &proxy_tmp).await {
            return Err("720p transcode failed".to_string());
        }

        let head_clip_tmp = tmp_dir.join("head_clip.mp4");
        if !self.extract_head_clip(source_path, &head_clip_tmp).await {
            return Err("head clip extraction failed".to_string());
        }

        let poster_rel = self.store.derivative_rel_path(library_slug, asset_id, Derivative::Thumbnail);
        let proxy_rel = self.store.video_clip_rel_path(library_slug, asset_id, "proxy.mp4");
        let head_clip_rel = self.store.video_clip_rel_path(library_slug, asset_id, "head_clip.mp4");

        self.store
            .move_in(&poster_tmp, &poster_rel)
            .await
            .map_err(|e| format!("poster write failed: {e}"))?;
        self.store
            .move_in(&proxy_tmp, &proxy_rel)
            .await
            .map_err(|e| format!("proxy write failed: {e}"))?;
        self.store
            .move_in(&head_clip_tmp, &head_clip_rel)
            .await
            .map_err(|e| format!("head clip write failed: {e}"))?;

        self.asset_repo
            .set_derivative_paths(asset_id, Some(&poster_rel), Some(&head_clip_rel), Some(segmentation_version()))
            .await
            .map_err(|e| format!("derivative path write failed: {e}"))?;

        logger.log_progress("poster, 720p proxy, and head clip written");
        let _ = proxy_rel; // retained on disk for playback; only poster/head-clip paths are DB-tracked
        Ok(())
    }
}

#[async_trait]
impl WorkerRunner for VideoProxyWorker {
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

/// Paginated repair pass: reset any video asset whose `segmentation_version`
/// is stale or whose derivative files are missing on disk back to `pending`.
pub async fn run_repair_pass(
    asset_repo: &AssetRepository,
    store: &MediaStore,
    library_slug: Option<&str>,
) -> msearch_db::DbResult<u64> {
    const PAGE_SIZE: i64 = 500;
    let current_version = segmentation_version();
    let mut offset = 0i64;
    let mut reset_count = 0u64;
    loop {
        let page = asset_repo.get_video_asset_ids_expecting_proxy(library_slug, PAGE_SIZE, offset).await?;
        if page.is_empty() {
            break;
        }
        for (asset_id, lib_slug) in &page {
            let Some(asset) = asset_repo.get_by_id(*asset_id).await? else { continue };
            let stale_version = asset.segmentation_version.map(|v| v != current_version).unwrap_or(false);
            let head_clip_rel = store.video_clip_rel_path(lib_slug, *asset_id, "head_clip.mp4");
            let missing_head_clip = store.resolve(&head_clip_rel).map(|p| !p.exists()).unwrap_or(true);
            if (stale_version || missing_head_clip) && asset.status() != AssetStatus::Pending {
                asset_repo.update_asset_status(*asset_id, AssetStatus::Pending, None, None).await?;
                reset_count += 1;
            }
        }
        offset += PAGE_SIZE;
    }
    if reset_count > 0 {
        info!(reset_count, "video proxy repair pass reset stale/missing derivatives to pending");
    }
    Ok(reset_count)
}
