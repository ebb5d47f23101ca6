//! Scene repository: per-asset scene list plus the resume-state row.
//!
//! `save_scene_and_update_state` is the one operation that must never leave
//! the active-state row stale: insert the closed scene, then in the same
//! transaction either upsert the next active state or delete the row
//! entirely, so an asset always has an open unpersisted scene represented
//! by the active-state row, or none — never both stale.

use msearch_models::VideoScene;
use sqlx::PgPool;

use crate::error::DbResult;

#[derive(Debug, Clone)]
pub struct NewScene {
    pub start_ts: f64,
    pub end_ts: f64,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub sharpness_score: f64,
    pub rep_frame_path: String,
    pub keep_reason: &'static str,
}

#[derive(Debug, Clone)]
pub struct ActiveState {
    pub anchor_phash: String,
    pub scene_start_ts: f64,
    pub current_best_pts: f64,
    pub current_best_sharpness: f64,
}

pub struct SceneRepository {
    pool: PgPool,
}

impl SceneRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_max_end_ts(&self, asset_id: i64) -> DbResult<Option<f64>> {
        let row: (Option<f64>,) =
            sqlx::query_as("SELECT max(end_ts) FROM video_scenes WHERE asset_id = $1")
                .bind(asset_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    pub async fn get_last_scene_description(&self, asset_id: i64) -> DbResult<Option<String>> {
        let row: Option<(Option<String>,)> = sqlx::query_as(
            "SELECT description FROM video_scenes WHERE asset_id = $1 ORDER BY end_ts DESC LIMIT 1",
        )
        .bind(asset_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(|(d,)| d))
    }

    pub async fn get_active_state(&self, asset_id: i64) -> DbResult<Option<ActiveState>> {
        let row = sqlx::query_as::<_, ActiveStateRow>(
            "SELECT anchor_phash, scene_start_ts, current_best_pts, current_best_sharpness
             FROM video_active_state WHERE asset_id = $1",
        )
        .bind(asset_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(ActiveStateRow::into_active_state))
    }

    pub async fn upsert_active_state(&self, asset_id: i64, state: &ActiveState) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO video_active_state
                (asset_id, anchor_phash, scene_start_ts, current_best_pts, current_best_sharpness)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (asset_id) DO UPDATE SET
                anchor_phash = EXCLUDED.anchor_phash,
                scene_start_ts = EXCLUDED.scene_start_ts,
                current_best_pts = EXCLUDED.current_best_pts,
                current_best_sharpness = EXCLUDED.current_best_sharpness",
        )
        .bind(asset_id)
        .bind(&state.anchor_phash)
        .bind(state.scene_start_ts)
        .bind(state.current_best_pts)
        .bind(state.current_best_sharpness)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_active_state(&self, asset_id: i64) -> DbResult<()> {
        sqlx::query("DELETE FROM video_active_state WHERE asset_id = $1")
            .bind(asset_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Insert the closed scene, then upsert-or-delete the active-state row,
    /// all inside one transaction. Returns the new scene's id.
    pub async fn save_scene_and_update_state(
        &self,
        asset_id: i64,
        scene: &NewScene,
        next_active_state: Option<&ActiveState>,
    ) -> DbResult<i64> {
        let mut tx = self.pool.begin().await?;

        let (scene_id,): (i64,) = sqlx::query_as(
            "INSERT INTO video_scenes
                (asset_id, start_ts, end_ts, description, metadata, sharpness_score, rep_frame_path, keep_reason)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING id",
        )
        .bind(asset_id)
        .bind(scene.start_ts)
        .bind(scene.end_ts)
        .bind(&scene.description)
        .bind(&scene.metadata)
        .bind(scene.sharpness_score)
        .bind(&scene.rep_frame_path)
        .bind(scene.keep_reason)
        .fetch_one(&mut *tx)
        .await?;

        match next_active_state {
            Some(state) => {
                sqlx::query(
                    "INSERT INTO video_active_state
                        (asset_id, anchor_phash, scene_start_ts, current_best_pts, current_best_sharpness)
                     VALUES ($1, $2, $3, $4, $5)
                     ON CONFLICT (asset_id) DO UPDATE SET
                        anchor_phash = EXCLUDED.anchor_phash,
                        scene_start_ts = EXCLUDED.scene_start_ts,
                        current_best_pts = EXCLUDED.current_best_pts,
                        current_best_sharpness = EXCLUDED.current_best_sharpness",
                )
                .bind(asset_id)
                .bind(&state.anchor_phash)
                .bind(state.scene_start_ts)
                .bind(state.current_best_pts)
                .bind(state.current_best_sharpness)
                .execute(&mut *tx)
                .await?;
            }
            None => {
                sqlx::query("DELETE FROM video_active_state WHERE asset_id = $1")
                    .bind(asset_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(scene_id)
    }

    pub async fn list_scenes(&self, asset_id: i64) -> DbResult<Vec<VideoScene>> {
        let rows = sqlx::query_as::<_, VideoScene>(
            "SELECT * FROM video_scenes WHERE asset_id = $1 ORDER BY start_ts ASC",
        )
        .bind(asset_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_scene_by_id(&self, scene_id: i64) -> DbResult<Option<VideoScene>> {
        let row = sqlx::query_as::<_, VideoScene>("SELECT * FROM video_scenes WHERE id = $1")
            .bind(scene_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Write a vision pass's result for one scene: `description` is promoted
    /// to its own indexed column (the light-mode claim predicate filters on
    /// it directly), `metadata` carries the full per-backend document
    /// (`{moondream: {...}, semantic_duplicate: bool}`).
    pub async fn update_scene_vision(
        &self,
        scene_id: i64,
        description: &str,
        metadata: &serde_json::Value,
    ) -> DbResult<()> {
        sqlx::query("UPDATE video_scenes SET description = $2, metadata = $3 WHERE id = $1")
            .bind(scene_id)
            .bind(description)
            .bind(metadata)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_scene_metadata_at_timestamp(
        &self,
        asset_id: i64,
        ts: f64,
    ) -> DbResult<Option<VideoScene>> {
        let row = sqlx::query_as::<_, VideoScene>(
            "SELECT * FROM video_scenes WHERE asset_id = $1 AND start_ts <= $2 AND end_ts > $2
             ORDER BY start_ts DESC LIMIT 1",
        )
        .bind(asset_id)
        .bind(ts)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_all_rep_frame_paths_excluding_trash(&self) -> DbResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT s.rep_frame_path FROM video_scenes s
             JOIN asset a ON s.asset_id = a.id
             JOIN library l ON a.library_id = l.slug
             WHERE l.deleted_at IS NULL AND s.rep_frame_path != ''",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(p,)| p).collect())
    }

    pub async fn delete_scenes_for_asset(&self, asset_id: i64) -> DbResult<()> {
        sqlx::query("DELETE FROM video_scenes WHERE asset_id = $1")
            .bind(asset_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct ActiveStateRow {
    anchor_phash: String,
    scene_start_ts: f64,
    current_best_pts: f64,
    current_best_sharpness: f64,
}

impl ActiveStateRow {
    fn into_active_state(self) -> ActiveState {
        ActiveState {
            anchor_phash: self.anchor_phash,
            scene_start_ts: self.scene_start_ts,
            current_best_pts: self.current_best_pts,
            current_best_sharpness: self.current_best_sharpness,
        }
    }
}
