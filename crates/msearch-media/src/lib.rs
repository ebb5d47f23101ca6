#![deny(unreachable_patterns)]
//! FFmpeg/image pipeline for the media-search worker fleet.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building and progress parsing
//! - Video probing via ffprobe
//! - A downscaled, 1fps video scanner used by scene segmentation
//! - Composite-trigger scene segmentation with crash-safe resume
//! - Image proxy/thumbnail derivation and animated video previews
//! - The sharded on-disk derivative store

pub mod command;
pub mod error;
pub mod fs_utils;
pub mod phash;
pub mod probe;
pub mod progress;
pub mod proxy;
pub mod scene_segmenter;
pub mod sharpness;
pub mod store;
pub mod video_preview;
pub mod video_scanner;

pub use command::{create_ffmpeg_command, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use phash::{hash_rgb24_frame, Phash, PHASH_HASH_SIZE, PHASH_THRESHOLD};
pub use probe::{probe_video, VideoInfo};
pub use progress::{FfmpegProgress, ProgressCallback};
pub use proxy::{generate_proxy_and_thumbnail, ProxyAndThumbnail, PROXY_MAX, THUMBNAIL_MAX};
pub use scene_segmenter::{
    segment_video, segmentation_version, KeepReason, ResumeState, SceneResult, SegmenterOptions,
};
pub use sharpness::{laplacian_variance, rgb24_to_gray};
pub use store::{Derivative, MediaStore};
pub use video_preview::build_preview_webp;
pub use video_scanner::{ScannedFrame, VideoScanner};
