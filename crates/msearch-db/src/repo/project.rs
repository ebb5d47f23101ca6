//! Project repository: thin CRUD for asset collections used by export/clip
//! workflows downstream of search. Not part of the core pipeline; kept
//! simple since nothing in the pipeline depends on it.

use msearch_models::Project;
use sqlx::PgPool;

use crate::error::DbResult;

pub struct ProjectRepository {
    pool: PgPool,
}

impl ProjectRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, name: &str) -> DbResult<i64> {
        let (id,): (i64,) =
            sqlx::query_as("INSERT INTO project (name) VALUES ($1) RETURNING id")
                .bind(name)
                .fetch_one(&self.pool)
                .await?;
        Ok(id)
    }

    pub async fn get(&self, project_id: i64) -> DbResult<Option<Project>> {
        let row = sqlx::query_as::<_, Project>("SELECT * FROM project WHERE id = $1")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn list(&self) -> DbResult<Vec<Project>> {
        let rows = sqlx::query_as::<_, Project>("SELECT * FROM project ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn add_asset(&self, project_id: i64, asset_id: i64) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO project_assets (project_id, asset_id) VALUES ($1, $2)
             ON CONFLICT DO NOTHING",
        )
        .bind(project_id)
        .bind(asset_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove_asset(&self, project_id: i64, asset_id: i64) -> DbResult<()> {
        sqlx::query("DELETE FROM project_assets WHERE project_id = $1 AND asset_id = $2")
            .bind(project_id)
            .bind(asset_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_asset_ids(&self, project_id: i64) -> DbResult<Vec<i64>> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT asset_id FROM project_assets WHERE project_id = $1")
                .bind(project_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn delete(&self, project_id: i64) -> DbResult<()> {
        sqlx::query("DELETE FROM project WHERE id = $1")
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
