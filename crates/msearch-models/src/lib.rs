//! Shared data models for the media-search backend.
//!
//! Table row types mirror the Postgres schema directly. Enum-shaped columns
//! are decoded lazily via `.status()`-style accessors rather than native
//! Postgres enum types, so a worker older than the newest migration still
//! reads rows it doesn't fully understand instead of failing to decode.

pub mod ai_model;
pub mod asset;
pub mod enums;
pub mod file_extensions;
pub mod library;
pub mod project;
pub mod search_result;
pub mod system_metadata;
pub mod video_scene;
pub mod visual_analysis;
pub mod worker_status;

pub use ai_model::AIModel;
pub use asset::{Asset, ScannedAsset};
pub use enums::{
    AssetStatus, AssetType, InvalidEnumValue, ScanStatus, SceneKeepReason, WorkerCommand,
    WorkerState,
};
pub use library::{Library, NewLibrary};
pub use project::{Project, ProjectAsset};
pub use search_result::{SearchHit, SearchQuery};
pub use system_metadata::{keys as system_metadata_keys, SystemMetadata, CURRENT_SCHEMA_VERSION};
pub use video_scene::{VideoActiveState, VideoScene};
pub use visual_analysis::{SceneMetadata, VisualAnalysis};
pub use worker_status::{WorkerStats, WorkerStatus};
