//! Vision-model capability boundary.
//!
//! The vision model itself is out of scope for this system (spec.md treats
//! it as an external black-box collaborator); this crate only defines the
//! interface AI workers call through (`VisionCapability`), an HTTP-backed
//! implementation of it, and a mock used in tests and local development.

pub mod error;
pub mod http;
pub mod mock;

use async_trait::async_trait;
use std::path::Path;

pub use error::{VisionError, VisionResult};
pub use http::HttpVisionCapability;
pub use mock::MockVisionCapability;
use msearch_models::VisualAnalysis;

/// One vision-model call: given an image path, return a description, tag
/// list, and OCR text. Implementations decide how to batch/throttle
/// internally; callers are expected to run a bounded pool of concurrent
/// calls themselves (per spec.md §4.9/§5), not rely on this trait for that.
#[async_trait]
pub trait VisionCapability: Send + Sync {
    /// First-pass ("light") analysis: description, tags, OCR text from a
    /// single image.
    async fn analyze(&self, image_path: &Path) -> VisionResult<VisualAnalysis>;

    /// Second-pass ("full") refinement: merge OCR-centric detail into an
    /// existing analysis. Implementations that have nothing useful to add
    /// beyond `analyze` may implement this by re-running `analyze` and
    /// keeping the richer of the two OCR fields.
    async fn refine(&self, image_path: &Path, existing: &VisualAnalysis) -> VisionResult<VisualAnalysis>;

    /// Name/version of the model currently answering calls. The worker layer
    /// resolves this pair to an `ai_model.id` (get-or-insert) and stores that
    /// id as `asset.analysis_model_id`, so a later config change can be
    /// detected (id no longer matches the library's effective target) and
    /// repaired.
    fn model_name(&self) -> &str;
    fn model_version(&self) -> &str;
}
