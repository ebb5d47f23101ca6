//! Worker status repository: registration, heartbeat, command channel.

use msearch_models::{WorkerCommand, WorkerState, WorkerStatus};
use sqlx::PgPool;

use crate::error::DbResult;

pub struct WorkerRepository {
    pool: PgPool,
}

impl WorkerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upsert a row: insert with `command = none` on first sight, otherwise
    /// just bump state and last-seen.
    pub async fn register_worker(&self, worker_id: &str, state: WorkerState) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO worker_status (worker_id, last_seen_at, state, command)
             VALUES ($1, now(), $2, 'none')
             ON CONFLICT (worker_id) DO UPDATE SET state = EXCLUDED.state, last_seen_at = now()",
        )
        .bind(worker_id)
        .bind(state.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_heartbeat(&self, worker_id: &str, stats: Option<serde_json::Value>) -> DbResult<()> {
        sqlx::query(
            "UPDATE worker_status SET last_seen_at = now(),
             stats = COALESCE($2, stats) WHERE worker_id = $1",
        )
        .bind(worker_id)
        .bind(stats)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_command(&self, worker_id: &str) -> DbResult<WorkerCommand> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT command FROM worker_status WHERE worker_id = $1")
                .bind(worker_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row
            .and_then(|(c,)| c.parse().ok())
            .unwrap_or(WorkerCommand::None))
    }

    pub async fn set_state(&self, worker_id: &str, state: WorkerState) -> DbResult<()> {
        sqlx::query("UPDATE worker_status SET state = $2 WHERE worker_id = $1")
            .bind(worker_id)
            .bind(state.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn clear_command(&self, worker_id: &str) -> DbResult<()> {
        sqlx::query("UPDATE worker_status SET command = 'none' WHERE worker_id = $1")
            .bind(worker_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get(&self, worker_id: &str) -> DbResult<Option<WorkerStatus>> {
        let row = sqlx::query_as::<_, WorkerStatus>(
            "SELECT * FROM worker_status WHERE worker_id = $1",
        )
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn prune_stale_workers(&self, max_age_hours: i64) -> DbResult<u64> {
        let result = sqlx::query(
            "DELETE FROM worker_status WHERE last_seen_at < now() - ($1 || ' hours')::interval",
        )
        .bind(max_age_hours)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn count_stale_workers(&self, max_age_hours: i64) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM worker_status WHERE last_seen_at < now() - ($1 || ' hours')::interval",
        )
        .bind(max_age_hours)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Workers on `hostname` (the worker-id is expected to embed the
    /// hostname, e.g. `{role}-{hostname}-{pid}`) that are not offline and
    /// have heartbeat-ed within the freshness window. Used to detect local
    /// resource contention (skip temp cleanup, hint vision-model batching).
    pub async fn get_active_local_worker_count(
        &self,
        hostname: &str,
        exclude_id: Option<&str>,
        freshness_seconds: i64,
    ) -> DbResult<i64> {
        let like_pattern = format!("%{hostname}%");
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM worker_status
             WHERE worker_id LIKE $1
               AND state != 'offline'
               AND last_seen_at > now() - ($2 || ' seconds')::interval
               AND ($3::text IS NULL OR worker_id != $3)",
        )
        .bind(like_pattern)
        .bind(freshness_seconds)
        .bind(exclude_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    pub async fn has_active_local_transcodes(&self, hostname: &str) -> DbResult<bool> {
        Ok(self.get_active_local_worker_count(hostname, None, 60).await? > 0)
    }
}
