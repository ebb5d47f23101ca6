use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user-defined grouping of assets (e.g. for export), independent of
/// library structure.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub export_path: Option<String>,
}

/// Many-to-many join row between [`Project`] and `Asset`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProjectAsset {
    pub project_id: i64,
    pub asset_id: i64,
}
