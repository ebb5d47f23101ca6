//! AI model identity: `(name, version)` unique pair, get-or-insert only.
//! Workers resolve a vision capability's `(model_name, model_version)` to an
//! id here before stamping `asset.analysis_model_id`.

use msearch_models::AIModel;
use sqlx::PgPool;

use crate::error::DbResult;

pub struct AIModelRepository {
    pool: PgPool,
}

impl AIModelRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert `(name, version)` if absent, returning its id either way.
    pub async fn get_or_create(&self, name: &str, version: &str) -> DbResult<i32> {
        let row: (i32,) = sqlx::query_as(
            "INSERT INTO ai_model (name, version) VALUES ($1, $2)
             ON CONFLICT (name, version) DO UPDATE SET name = EXCLUDED.name
             RETURNING id",
        )
        .bind(name)
        .bind(version)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    pub async fn get(&self, id: i32) -> DbResult<Option<AIModel>> {
        let row = sqlx::query_as::<_, AIModel>("SELECT * FROM ai_model WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }
}
