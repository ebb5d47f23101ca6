//! Animated WebP preview built from a video's scene representative frames,
//! so a library listing can show motion without re-reading the source.

use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, RgbImage};
use webp::{AnimEncoder, AnimFrame, WebPConfig};

use crate::error::MediaResult;

pub const PREVIEW_FILENAME: &str = "preview.webp";
pub const PREVIEW_WIDTH: u32 = 320;
pub const PREVIEW_HEIGHT: u32 = 320;
pub const PREVIEW_DURATION_MS: i32 = 400;
pub const MAX_FRAMES: usize = 60;

/// Load each rep-frame path, fit it within the preview box (no upscale needed
/// here since scene frames already come from a downscaled decode), pad with
/// black to the exact box size, downsample to at most [`MAX_FRAMES`] by
/// evenly-spaced index, and encode as a looping animated WebP.
///
/// Missing/unreadable frame files are skipped rather than failing the whole
/// preview; returns `Ok(None)` if no frame loaded at all.
pub fn build_preview_webp(rep_frame_paths: &[impl AsRef<Path>]) -> MediaResult<Option<Vec<u8>>> {
    let mut frames: Vec<RgbImage> = Vec::new();
    for path in rep_frame_paths {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!(path = %path.display(), "scene frame missing, skipping from preview");
            continue;
        }
        match image::open(path) {
            Ok(img) => frames.push(fit_and_pad(&img)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "could not load scene frame");
                continue;
            }
        }
    }

    if frames.is_empty() {
        return Ok(None);
    }

    if frames.len() > MAX_FRAMES {
        let step = frames.len() as f64 / MAX_FRAMES as f64;
        let sampled: Vec<RgbImage> = (0..MAX_FRAMES)
            .map(|i| frames[(i as f64 * step) as usize].clone())
            .collect();
        frames = sampled;
    }

    let config = WebPConfig::new().unwrap_or_default();
    let mut encoder = AnimEncoder::new(PREVIEW_WIDTH, PREVIEW_HEIGHT, &config);
    let mut timestamp_ms = 0;
    for frame in &frames {
        encoder.add_frame(AnimFrame::from_rgb(
            frame.as_raw(),
            PREVIEW_WIDTH,
            PREVIEW_HEIGHT,
            timestamp_ms,
        ));
        timestamp_ms += PREVIEW_DURATION_MS;
    }
    let encoded = encoder.encode();
    Ok(Some(encoded.to_vec()))
}

/// Resize to fit within `PREVIEW_WIDTH x PREVIEW_HEIGHT` preserving aspect
/// ratio, then pad to exactly that size with a black border at the
/// bottom/right (matches the top-left paste of the reference implementation
/// rather than centering).
fn fit_and_pad(img: &DynamicImage) -> RgbImage {
    let (width, height) = img.dimensions();
    let scale = (PREVIEW_WIDTH as f64 / width as f64).min(PREVIEW_HEIGHT as f64 / height as f64);
    let resized = if scale < 1.0 {
        img.resize(PREVIEW_WIDTH, PREVIEW_HEIGHT, FilterType::Lanczos3)
    } else {
        img.clone()
    };
    let resized = resized.to_rgb8();
    if resized.width() == PREVIEW_WIDTH && resized.height() == PREVIEW_HEIGHT {
        return resized;
    }
    let mut padded = RgbImage::new(PREVIEW_WIDTH, PREVIEW_HEIGHT);
    image::imageops::overlay(&mut padded, &resized, 0, 0);
    padded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_and_pad_always_returns_exact_box_size() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(640, 200));
        let padded = fit_and_pad(&img);
        assert_eq!(padded.dimensions(), (PREVIEW_WIDTH, PREVIEW_HEIGHT));
    }

    #[test]
    fn build_preview_webp_returns_none_for_no_frames() {
        let paths: Vec<&Path> = Vec::new();
        let result = build_preview_webp(&paths).unwrap();
        assert!(result.is_none());
    }
}
