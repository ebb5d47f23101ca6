//! Database access for the media-search catalog: connection pooling,
//! migrations, and one repository per aggregate (asset, library, scene,
//! worker, project, system metadata, search).

pub mod error;
pub mod pool;
pub mod repo;

pub use error::{DbError, DbResult};
pub use pool::{connect, DbConfig};
pub use repo::{
    slugify, ActiveState, AIModelRepository, AssetRepository, ClaimRequest, ClaimScope,
    ClaimedAsset, LibraryRepository, NewScene, ProjectRepository, SceneRepository,
    SearchRepository, SortKey, SystemMetadataRepository, WorkerRepository,
};
