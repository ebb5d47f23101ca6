//! Video scene segmentation: composite pHash-drift + temporal-ceiling +
//! debounce trigger, with best-frame selection by Laplacian sharpness.
//!
//! One [`SceneResult`] is emitted per closed scene. Resume is supported by
//! seeding `initial_scene_start_pts`/`initial_anchor_phash` (restored from
//! `video_active_state`) and `discard_until_pts` (frames before this PTS are
//! decoded and thrown away rather than re-processed, so a crash mid-scene
//! doesn't reopen an already-persisted one).

use std::path::Path;

use crate::error::{MediaError, MediaResult};
use crate::phash::{hash_rgb24_frame, Phash, PHASH_THRESHOLD};
use crate::sharpness::{laplacian_variance, rgb24_to_gray};
use crate::video_scanner::VideoScanner;

pub const TEMPORAL_CEILING_SEC: f64 = 30.0;
pub const DEBOUNCE_SEC: f64 = 3.0;
const SKIP_FRAMES_BEST: u32 = 2;

/// `PHASH_THRESHOLD * 10000 + int(DEBOUNCE_SEC * 1000)`, bumped whenever the
/// trigger constants change so already-segmented videos can be detected as
/// stale and re-run.
pub fn segmentation_version() -> i32 {
    PHASH_THRESHOLD as i32 * 10000 + (DEBOUNCE_SEC * 1000.0) as i32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepReason {
    Phash,
    Temporal,
    Forced,
}

impl KeepReason {
    pub fn as_str(self) -> &'static str {
        match self {
            KeepReason::Phash => "phash",
            KeepReason::Temporal => "temporal",
            KeepReason::Forced => "forced",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SceneResult {
    pub best_frame_bytes: Vec<u8>,
    pub best_pts: f64,
    pub scene_start_pts: f64,
    pub scene_end_pts: f64,
    pub keep_reason: KeepReason,
    pub sharpness_score: f64,
}

#[derive(Debug, Clone)]
pub struct ResumeState {
    pub anchor_phash: String,
    pub scene_start_pts: f64,
    pub current_best_pts: f64,
    pub current_best_sharpness: f64,
}

#[derive(Default)]
pub struct SegmenterOptions {
    pub initial_scene_start_pts: Option<f64>,
    pub initial_anchor_phash: Option<String>,
    /// Where to `-ss` seek ffmpeg to on resume: `max(0, max_end_ts - 2.0)`.
    pub seek_pts: Option<f64>,
    /// Decoded frames with `pts < discard_until_pts` are thrown away rather
    /// than reopening an already-persisted scene: `max_end_ts`.
    pub discard_until_pts: Option<f64>,
    /// The source's probed duration. When it exceeds the last observed
    /// frame's pts, the final forced-closed scene's `end_ts` is extended to
    /// it rather than left at the last decoded pts.
    pub duration_hint: Option<f64>,
}

fn trigger_keep_reason(
    anchor: Option<&Phash>,
    scene_start_pts: f64,
    frame_hash: &Phash,
    pts: f64,
) -> Option<KeepReason> {
    let anchor = anchor?;
    let elapsed = pts - scene_start_pts;
    if elapsed >= TEMPORAL_CEILING_SEC {
        return Some(KeepReason::Temporal);
    }
    let hamming = anchor.hamming_distance(frame_hash);
    if hamming <= PHASH_THRESHOLD {
        return None;
    }
    if elapsed < DEBOUNCE_SEC {
        return None;
    }
    Some(KeepReason::Phash)
}

struct OpenScene {
    scene_start_pts: f64,
    anchor_phash: Option<Phash>,
    current_best_pts: f64,
    current_best_sharpness: f64,
    current_best_frame: Vec<u8>,
    skip_count: u32,
    has_eligible_best: bool,
}

impl OpenScene {
    fn reset_at(pts: f64) -> Self {
        Self {
            scene_start_pts: pts,
            anchor_phash: None,
            current_best_pts: pts,
            current_best_sharpness: -1.0,
            current_best_frame: Vec::new(),
            skip_count: SKIP_FRAMES_BEST,
            has_eligible_best: false,
        }
    }
}

/// Runs the segmenter to completion, calling `on_scene` for each closed
/// scene (including the final forced-close at EOF) with the resume state to
/// persist alongside it. `check_interrupt` is polled once per decoded frame;
/// when it returns `true` the segmenter stops with [`MediaError::Cancelled`]
/// so the caller can reset the asset to its predecessor status for re-claim.
pub async fn segment_video<F>(
    input_path: impl AsRef<Path>,
    options: SegmenterOptions,
    mut check_interrupt: impl FnMut() -> bool,
    mut on_scene: F,
) -> MediaResult<()>
where
    F: FnMut(SceneResult, Option<ResumeState>),
{
    let scanner = VideoScanner::new(input_path, options.seek_pts).await?;
    let width = scanner.out_width();
    let height = scanner.out_height();
    let mut stream = scanner.spawn()?;

    let mut scene = OpenScene::reset_at(options.initial_scene_start_pts.unwrap_or(0.0));
    if let Some(hex) = &options.initial_anchor_phash {
        scene.anchor_phash = Phash::from_hex(hex);
    }
    let mut discard_until = options.discard_until_pts;

    let mut last_pts = 0.0;
    let mut last_frame: Vec<u8> = Vec::new();
    let mut last_sharpness = -1.0;
    let mut seen_any_frame = false;

    loop {
        if check_interrupt() {
            stream.finish().await?;
            return Err(MediaError::Cancelled);
        }
        let Some(frame) = stream.next_frame().await else {
            break;
        };
        let frame = frame?;
        seen_any_frame = true;
        last_pts = frame.pts;
        let gray = rgb24_to_gray(&frame.bytes, width, height);
        last_sharpness = laplacian_variance(&gray, width, height);
        last_frame = frame.bytes.clone();

        if let Some(threshold) = discard_until {
            if frame.pts < threshold {
                continue;
            }
            discard_until = None;
        }

        let frame_hash = hash_rgb24_frame(&frame.bytes, width, height);

        if scene.anchor_phash.is_none() {
            scene = OpenScene::reset_at(frame.pts);
            scene.anchor_phash = Some(frame_hash.clone());
        }

        let reason = trigger_keep_reason(
            scene.anchor_phash.as_ref(),
            scene.scene_start_pts,
            &frame_hash,
            frame.pts,
        );
        if let Some(reason) = reason {
            close_scene(&mut scene, frame.pts, reason, Some(frame_hash.clone()), &mut on_scene);
        }

        if scene.skip_count > 0 {
            scene.skip_count -= 1;
        } else {
            let sharpness = laplacian_variance(&gray, width, height);
            if sharpness > scene.current_best_sharpness {
                scene.current_best_sharpness = sharpness;
                scene.current_best_pts = frame.pts;
                scene.current_best_frame = frame.bytes;
                scene.has_eligible_best = true;
            }
        }
    }

    stream.finish().await?;

    if seen_any_frame {
        let _ = last_sharpness;
        let end_pts = match options.duration_hint {
            Some(duration) if duration > last_pts => duration,
            _ => last_pts,
        };
        close_scene_forced(&mut scene, end_pts, &last_frame, last_sharpness, &mut on_scene);
    }
    Ok(())
}

fn close_scene(
    scene: &mut OpenScene,
    end_pts: f64,
    reason: KeepReason,
    next_anchor: Option<Phash>,
    on_scene: &mut impl FnMut(SceneResult, Option<ResumeState>),
) {
    let next_state = next_anchor.as_ref().map(|hash| ResumeState {
        anchor_phash: hash.to_hex(),
        scene_start_pts: end_pts,
        current_best_pts: end_pts,
        current_best_sharpness: -1.0,
    });
    if scene.has_eligible_best && !scene.current_best_frame.is_empty() {
        on_scene(
            SceneResult {
                best_frame_bytes: scene.current_best_frame.clone(),
                best_pts: scene.current_best_pts,
                scene_start_pts: scene.scene_start_pts,
                scene_end_pts: end_pts,
                keep_reason: reason,
                sharpness_score: scene.current_best_sharpness,
            },
            next_state,
        );
    }
    *scene = OpenScene::reset_at(end_pts);
    scene.anchor_phash = next_anchor;
}

fn close_scene_forced(
    scene: &mut OpenScene,
    end_pts: f64,
    last_frame: &[u8],
    last_sharpness: f64,
    on_scene: &mut impl FnMut(SceneResult, Option<ResumeState>),
) {
    if scene.has_eligible_best && !scene.current_best_frame.is_empty() {
        on_scene(
            SceneResult {
                best_frame_bytes: scene.current_best_frame.clone(),
                best_pts: scene.current_best_pts,
                scene_start_pts: scene.scene_start_pts,
                scene_end_pts: end_pts,
                keep_reason: KeepReason::Forced,
                sharpness_score: scene.current_best_sharpness,
            },
            None,
        );
    } else if !last_frame.is_empty() {
        on_scene(
            SceneResult {
                best_frame_bytes: last_frame.to_vec(),
                best_pts: end_pts,
                scene_start_pts: scene.scene_start_pts,
                scene_end_pts: end_pts,
                keep_reason: KeepReason::Forced,
                sharpness_score: last_sharpness,
            },
            None,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segmentation_version_matches_constants() {
        assert_eq!(segmentation_version(), 513000);
    }

    #[test]
    fn trigger_none_when_no_anchor_yet() {
        let hash = Phash::from_hex("00").unwrap();
        assert_eq!(trigger_keep_reason(None, 0.0, &hash, 1.0), None);
    }

    #[test]
    fn trigger_temporal_past_ceiling() {
        let anchor = Phash::from_hex("00").unwrap();
        let frame = Phash::from_hex("00").unwrap();
        let reason = trigger_keep_reason(Some(&anchor), 0.0, &frame, 31.0);
        assert_eq!(reason, Some(KeepReason::Temporal));
    }

    #[test]
    fn trigger_phash_requires_debounce_elapsed() {
        let anchor = Phash::from_hex("ffffffffffffffff").unwrap();
        let frame = Phash::from_hex("0000000000000000").unwrap();
        assert_eq!(trigger_keep_reason(Some(&anchor), 0.0, &frame, 1.0), None);
        assert_eq!(
            trigger_keep_reason(Some(&anchor), 0.0, &frame, 4.0),
            Some(KeepReason::Phash)
        );
    }
}
