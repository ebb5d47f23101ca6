use serde::{Deserialize, Serialize};

/// Identity of a vision model/version pair. Never instantiated by this
/// codebase beyond its id/name/version fields — the model itself is a
/// black-box capability behind `msearch-vision`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AIModel {
    pub id: i32,
    pub name: String,
    pub version: String,
}
