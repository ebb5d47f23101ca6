use serde::{Deserialize, Serialize};

/// Standalone key/value row, no foreign keys. Used for process-wide state
/// that doesn't belong to any single entity.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SystemMetadata {
    pub key: String,
    pub value: String,
}

/// Reserved keys a worker reads/writes directly (as opposed to arbitrary
/// operator-set keys it only ever treats as opaque strings).
pub mod keys {
    /// Schema version the running binary expects. A worker refuses to start
    /// if this doesn't match its own compiled-in expectation.
    pub const SCHEMA_VERSION: &str = "schema_version";
    /// `AIModel.id` used when an asset's `tags_model_id`/`analysis_model_id`
    /// isn't already pinned.
    pub const DEFAULT_AI_MODEL_ID: &str = "default_ai_model_id";
}

/// The schema version this binary was built against. Bump alongside any
/// migration that changes a table shape a worker depends on directly.
pub const CURRENT_SCHEMA_VERSION: &str = "1";
