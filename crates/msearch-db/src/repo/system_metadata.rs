//! Key/value system metadata: schema-compatibility gate and small singletons
//! like the default AI model to seed new libraries with.

use msearch_models::system_metadata_keys as keys;
use sqlx::PgPool;

use crate::error::DbResult;

pub struct SystemMetadataRepository {
    pool: PgPool,
}

impl SystemMetadataRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, key: &str) -> DbResult<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM system_metadata WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(v,)| v))
    }

    pub async fn set(&self, key: &str, value: &str) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO system_metadata (key, value) VALUES ($1, $2)
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn schema_version(&self) -> DbResult<Option<String>> {
        self.get(keys::SCHEMA_VERSION).await
    }

    pub async fn default_ai_model_id(&self) -> DbResult<Option<i32>> {
        Ok(self
            .get(keys::DEFAULT_AI_MODEL_ID)
            .await?
            .and_then(|v| v.parse().ok()))
    }
}
