pub mod ai_model;
pub mod asset;
pub mod library;
pub mod project;
pub mod scene;
pub mod search;
pub mod system_metadata;
pub mod worker;

pub use ai_model::AIModelRepository;
pub use asset::{AssetRepository, ClaimRequest, ClaimScope, ClaimedAsset, SortKey};
pub use library::{slugify, LibraryRepository};
pub use project::ProjectRepository;
pub use scene::{ActiveState, NewScene, SceneRepository};
pub use search::SearchRepository;
pub use system_metadata::SystemMetadataRepository;
pub use worker::WorkerRepository;
