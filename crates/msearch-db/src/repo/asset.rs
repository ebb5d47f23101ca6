//! Asset repository: the only mutator of asset state and the sole arbiter of
//! contention between workers. Every claim uses `FOR UPDATE SKIP LOCKED`
//! with a bounded `LIMIT`, so concurrent pollers never block each other.

use chrono::Utc;
use msearch_models::{Asset, AssetStatus, AssetType};
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::error::{DbError, DbResult};

pub const DEFAULT_LEASE_SECONDS: i64 = 300;

/// An asset is claimed either within one library or across every
/// non-deleted library — never both, never neither.
#[derive(Debug, Clone)]
pub enum ClaimScope {
    Library(String),
    Global,
}

/// Parameters for [`AssetRepository::claim_asset_by_status`].
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub worker_id: String,
    pub from_status: AssetStatus,
    pub allowed_extensions: Vec<String>,
    pub scope: ClaimScope,
    pub target_model_id: Option<i32>,
    pub system_default_model_id: Option<i32>,
    pub lease_seconds: i64,
    pub limit: i64,
}

impl ClaimRequest {
    pub fn new(worker_id: impl Into<String>, from_status: AssetStatus, scope: ClaimScope) -> Self {
        Self {
            worker_id: worker_id.into(),
            from_status,
            allowed_extensions: Vec::new(),
            scope,
            target_model_id: None,
            system_default_model_id: None,
            lease_seconds: DEFAULT_LEASE_SECONDS,
            limit: 1,
        }
    }
}

/// A row freshly claimed for processing, library joined in so callers don't
/// need a second lookup to resolve the source path.
#[derive(Debug, Clone)]
pub struct ClaimedAsset {
    pub asset: Asset,
    pub library_absolute_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    IdDesc,
    IdAsc,
    MtimeDesc,
}

pub struct AssetRepository {
    pool: PgPool,
}

impl AssetRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a pending row, or update an existing one. Status and
    /// `tags_model_id` only reset when the source actually changed.
    pub async fn upsert_asset(
        &self,
        library_id: &str,
        rel_path: &str,
        asset_type: AssetType,
        mtime: f64,
        size: i64,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO asset (library_id, rel_path, type, mtime, size, status, retry_count)
            VALUES ($1, $2, $3, $4, $5, 'pending', 0)
            ON CONFLICT (library_id, rel_path) DO UPDATE SET
                type = EXCLUDED.type,
                mtime = EXCLUDED.mtime,
                size = EXCLUDED.size,
                status = CASE
                    WHEN asset.mtime IS DISTINCT FROM EXCLUDED.mtime
                         OR asset.size IS DISTINCT FROM EXCLUDED.size
                    THEN 'pending'
                    ELSE asset.status
                END,
                tags_model_id = CASE
                    WHEN asset.mtime IS DISTINCT FROM EXCLUDED.mtime
                         OR asset.size IS DISTINCT FROM EXCLUDED.size
                    THEN NULL
                    ELSE asset.tags_model_id
                END
            "#,
        )
        .bind(library_id)
        .bind(rel_path)
        .bind(asset_type.as_str())
        .bind(mtime)
        .bind(size)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Atomically claim up to `request.limit` eligible rows and transition
    /// them to `processing`. The eligibility predicate also reclaims any
    /// row already `processing` whose lease has expired, in the same
    /// statement as a fresh claim from `from_status` — so a caller never
    /// needs to race [`Self::reclaim_stale_leases`] to make progress.
    pub async fn claim_asset_by_status(&self, request: ClaimRequest) -> DbResult<Vec<ClaimedAsset>> {
        if request.allowed_extensions.is_empty() {
            return Ok(Vec::new());
        }
        let scope_is_library = matches!(request.scope, ClaimScope::Library(_));
        // Exactly one of library_slug/global_scope: the enum already makes
        // this structurally true, but callers building the enum from two
        // Options must enforce it before constructing a ClaimRequest.
        let _ = scope_is_library;

        let pattern = extension_pattern(&request.allowed_extensions);

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "WITH claimed AS (
                SELECT a.id FROM asset a
                JOIN library l ON a.library_id = l.slug
                WHERE l.deleted_at IS NULL
                  AND a.rel_path ~* ",
        );
        qb.push_bind(pattern);
        qb.push(" AND (a.status = ");
        qb.push_bind(request.from_status.as_str());
        qb.push(" OR (a.status = 'processing' AND a.lease_expires_at < now()))");

        match &request.scope {
            ClaimScope::Library(slug) => {
                qb.push(" AND a.library_id = ");
                qb.push_bind(slug.clone());
            }
            ClaimScope::Global => {}
        }

        if let Some(target_model_id) = request.target_model_id {
            qb.push(" AND COALESCE(l.target_tagger_id, ");
            qb.push_bind(request.system_default_model_id);
            qb.push(") = ");
            qb.push_bind(target_model_id);
        }

        qb.push(" ORDER BY a.id LIMIT ");
        qb.push_bind(request.limit);
        qb.push(
            " FOR UPDATE OF a SKIP LOCKED
            )
            UPDATE asset SET status = 'processing', worker_id = ",
        );
        qb.push_bind(request.worker_id.clone());
        qb.push(", lease_expires_at = now() + (");
        qb.push_bind(request.lease_seconds);
        qb.push(" || ' seconds')::interval
            FROM claimed, library l
            WHERE asset.id = claimed.id AND asset.library_id = l.slug
            RETURNING asset.id, asset.library_id, asset.rel_path, asset.type, asset.mtime,
                      asset.size, asset.status, asset.tags_model_id, asset.analysis_model_id,
                      asset.worker_id, asset.lease_expires_at, asset.retry_count,
                      asset.error_message, asset.visual_analysis, asset.preview_path,
                      asset.video_preview_path, asset.segmentation_version,
                      l.absolute_path AS library_absolute_path",
        );

        let rows = qb.build_query_as::<ClaimedAssetRow>().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(ClaimedAssetRow::into_claimed).collect())
    }

    /// Conditional state transition. When `owned_by` is `Some`, the write
    /// only applies while the row is still owned by that worker, so a
    /// lease reclaimed out from under a slow worker silently drops its
    /// late write instead of corrupting a newer worker's progress.
    pub async fn update_asset_status(
        &self,
        id: i64,
        new_status: AssetStatus,
        error_message: Option<&str>,
        owned_by: Option<&str>,
    ) -> DbResult<bool> {
        let retry_clause = match new_status {
            AssetStatus::Failed => "retry_count + 1",
            AssetStatus::Proxied => "0",
            _ => "retry_count",
        };
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE asset SET status = CASE WHEN ");
        qb.push(retry_clause);
        qb.push(" > ");
        qb.push_bind(Asset::MAX_RETRIES);
        qb.push(" THEN 'poisoned' ELSE ");
        qb.push_bind(new_status.as_str());
        qb.push(" END, retry_count = ");
        qb.push(retry_clause);
        qb.push(", worker_id = CASE WHEN ");
        qb.push_bind(new_status.as_str());
        qb.push(" = 'processing' THEN worker_id ELSE NULL END");
        qb.push(", lease_expires_at = CASE WHEN ");
        qb.push_bind(new_status.as_str());
        qb.push(" = 'processing' THEN lease_expires_at ELSE NULL END");
        qb.push(", error_message = ");
        qb.push_bind(error_message);
        qb.push(" WHERE id = ");
        qb.push_bind(id);
        if let Some(owner) = owned_by {
            qb.push(" AND worker_id = ");
            qb.push_bind(owner);
        }
        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Persist the proxy stage's derivative paths ahead of the status
    /// transition that makes them load-bearing. `preview_path` carries the
    /// image proxy path for image assets or the poster-frame path for
    /// video assets; `video_preview_path` and `segmentation_version` only
    /// apply to video assets. `reclaim_stale_leases` infers a stuck row's
    /// predecessor status from whichever of these is still null, so they
    /// must land before the row can safely read as `proxied`.
    pub async fn set_derivative_paths(
        &self,
        id: i64,
        preview_path: Option<&str>,
        video_preview_path: Option<&str>,
        segmentation_version: Option<i32>,
    ) -> DbResult<()> {
        sqlx::query(
            "UPDATE asset SET
                preview_path = COALESCE($2, preview_path),
                video_preview_path = COALESCE($3, video_preview_path),
                segmentation_version = COALESCE($4, segmentation_version)
             WHERE id = $1",
        )
        .bind(id)
        .bind(preview_path)
        .bind(video_preview_path)
        .bind(segmentation_version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Persist a vision pass's result and stamp the model that produced it.
    /// Used by the AI worker alongside `update_asset_status` — written
    /// first so a status transition never advertises analysis that isn't
    /// there yet.
    pub async fn set_visual_analysis(
        &self,
        id: i64,
        visual_analysis: &serde_json::Value,
        analysis_model_id: i32,
    ) -> DbResult<()> {
        sqlx::query("UPDATE asset SET visual_analysis = $2, analysis_model_id = $3 WHERE id = $1")
            .bind(id)
            .bind(visual_analysis)
            .bind(analysis_model_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Extend a lease for a worker that's still actively processing a
    /// long-running asset (video transcode, large-file analysis).
    pub async fn renew_asset_lease(&self, id: i64, lease_seconds: i64) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE asset SET lease_expires_at = now() + ($2 || ' seconds')::interval
             WHERE id = $1 AND status = 'processing'",
        )
        .bind(id)
        .bind(lease_seconds)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Reset rows stuck `processing` with an expired lease back to their
    /// predecessor status, incrementing `retry_count` (promoting to
    /// `poisoned` past the threshold) exactly as a `failed` transition
    /// would. Idempotent; safe to run concurrently with claim since it
    /// only ever touches rows a claim's own reclaim-disjunct would also be
    /// eligible to take.
    ///
    /// The schema doesn't persist which stage a `processing` row was
    /// claimed for, so the predecessor is inferred from what progress
    /// markers already exist: no proxy yet means it was mid-proxying
    /// (`pending`), a proxy but no analysis means mid-light-analysis
    /// (`proxied`), and an existing analysis means mid-full-analysis
    /// (`analyzed_light`). Images key off `preview_path`, videos off
    /// `video_preview_path`.
    pub async fn reclaim_stale_leases(&self, library_slug: Option<&str>) -> DbResult<u64> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "UPDATE asset SET
                status = CASE
                    WHEN retry_count + 1 > ",
        );
        qb.push_bind(Asset::MAX_RETRIES);
        qb.push(
            " THEN 'poisoned'
                    ELSE (CASE
                        WHEN type = 'video' THEN
                            CASE WHEN video_preview_path IS NULL THEN 'pending'
                                 WHEN visual_analysis IS NULL THEN 'proxied'
                                 ELSE 'analyzed_light' END
                        ELSE
                            CASE WHEN preview_path IS NULL THEN 'pending'
                                 WHEN visual_analysis IS NULL THEN 'proxied'
                                 ELSE 'analyzed_light' END
                        END)
                    END,
                retry_count = retry_count + 1,
                worker_id = NULL,
                lease_expires_at = NULL
            WHERE status = 'processing' AND lease_expires_at < now()",
        );
        if let Some(slug) = library_slug {
            qb.push(" AND library_id = ");
            qb.push_bind(slug);
        }
        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    pub async fn count_pending(&self, library_slug: Option<&str>) -> DbResult<i64> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT COUNT(*) FROM asset a JOIN library l ON a.library_id = l.slug
             WHERE l.deleted_at IS NULL AND a.status = 'pending'",
        );
        if let Some(slug) = library_slug {
            qb.push(" AND a.library_id = ");
            qb.push_bind(slug);
        }
        let count: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count)
    }

    pub async fn get_by_id(&self, id: i64) -> DbResult<Option<Asset>> {
        let row = sqlx::query_as::<_, Asset>("SELECT * FROM asset WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn list_for_library(
        &self,
        library_id: &str,
        sort: SortKey,
        asset_types: &[AssetType],
        limit: i64,
        offset: i64,
    ) -> DbResult<Vec<Asset>> {
        let order_by = match sort {
            SortKey::IdDesc => "id DESC",
            SortKey::IdAsc => "id ASC",
            SortKey::MtimeDesc => "mtime DESC",
        };
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT * FROM asset WHERE library_id = ");
        qb.push_bind(library_id);
        if !asset_types.is_empty() {
            let types: Vec<&'static str> = asset_types.iter().map(|t| t.as_str()).collect();
            qb.push(" AND type = ANY(");
            qb.push_bind(types);
            qb.push(")");
        }
        qb.push(format!(" ORDER BY {order_by} LIMIT "));
        qb.push_bind(limit);
        qb.push(" OFFSET ");
        qb.push_bind(offset);
        let rows = qb.build_query_as::<Asset>().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    /// Expected `<shard>/<id>.<ext>` paths for thumbnails+proxies, paginated
    /// so the maintenance service's orphan sweep never holds one giant
    /// result set in memory. `None` scope means all non-deleted libraries.
    pub async fn get_asset_ids_expecting_proxy(
        &self,
        library_slug: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> DbResult<Vec<(i64, String)>> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT a.id, a.library_id FROM asset a JOIN library l ON a.library_id = l.slug
             WHERE l.deleted_at IS NULL AND a.type = 'image'",
        );
        if let Some(slug) = library_slug {
            qb.push(" AND a.library_id = ");
            qb.push_bind(slug);
        }
        qb.push(" ORDER BY a.id LIMIT ");
        qb.push_bind(limit);
        qb.push(" OFFSET ");
        qb.push_bind(offset);
        let rows: Vec<(i64, String)> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    /// Same pagination contract as [`Self::get_asset_ids_expecting_proxy`],
    /// scoped to video assets for the video proxy worker's repair pass.
    pub async fn get_video_asset_ids_expecting_proxy(
        &self,
        library_slug: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> DbResult<Vec<(i64, String)>> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT a.id, a.library_id FROM asset a JOIN library l ON a.library_id = l.slug
             WHERE l.deleted_at IS NULL AND a.type = 'video'",
        );
        if let Some(slug) = library_slug {
            qb.push(" AND a.library_id = ");
            qb.push_bind(slug);
        }
        qb.push(" ORDER BY a.id LIMIT ");
        qb.push_bind(limit);
        qb.push(" OFFSET ");
        qb.push_bind(offset);
        let rows: Vec<(i64, String)> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    pub async fn get_all_video_preview_paths_excluding_trash(&self) -> DbResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT a.video_preview_path FROM asset a JOIN library l ON a.library_id = l.slug
             WHERE l.deleted_at IS NULL AND a.video_preview_path IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(p,)| p).collect())
    }

    /// Assets whose `analysis_model_id` no longer matches the library's
    /// effective target vision model (used by the AI worker's repair mode).
    pub async fn list_model_mismatched(
        &self,
        system_default_model_id: Option<i32>,
    ) -> DbResult<Vec<Asset>> {
        let rows = sqlx::query_as::<_, Asset>(
            "SELECT a.* FROM asset a JOIN library l ON a.library_id = l.slug
             WHERE l.deleted_at IS NULL
               AND a.status IN ('analyzed_light', 'completed')
               AND a.analysis_model_id IS DISTINCT FROM COALESCE(l.target_tagger_id, $1)",
        )
        .bind(system_default_model_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Paginated so the maintenance service's missing-source reaper never
    /// holds the whole catalog in memory at once.
    pub async fn list_missing_source_candidates(&self, limit: i64, offset: i64) -> DbResult<Vec<Asset>> {
        let rows = sqlx::query_as::<_, Asset>(
            "SELECT a.* FROM asset a JOIN library l ON a.library_id = l.slug
             WHERE l.deleted_at IS NULL ORDER BY a.id LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn delete(&self, id: i64) -> DbResult<()> {
        sqlx::query("DELETE FROM asset WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn library_absolute_path(&self, id: i64) -> DbResult<String> {
        let row: (String,) = sqlx::query_as(
            "SELECT l.absolute_path FROM asset a JOIN library l ON a.library_id = l.slug WHERE a.id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::not_found(format!("asset {id}")))?;
        Ok(row.0)
    }
}

fn extension_pattern(extensions: &[String]) -> String {
    let alternatives: Vec<String> = extensions
        .iter()
        .map(|ext| regex_escape(ext.trim_start_matches('.')))
        .collect();
    format!(r"\.({})$", alternatives.join("|"))
}

fn regex_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if "\\.+*?()|[]{}^$".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[derive(sqlx::FromRow)]
struct ClaimedAssetRow {
    id: i64,
    library_id: String,
    rel_path: String,
    #[sqlx(rename = "type")]
    asset_type: String,
    mtime: f64,
    size: i64,
    status: String,
    tags_model_id: Option<i32>,
    analysis_model_id: Option<i32>,
    worker_id: Option<String>,
    lease_expires_at: Option<chrono::DateTime<Utc>>,
    retry_count: i32,
    error_message: Option<String>,
    visual_analysis: Option<serde_json::Value>,
    preview_path: Option<String>,
    video_preview_path: Option<String>,
    segmentation_version: Option<i32>,
    library_absolute_path: String,
}

impl ClaimedAssetRow {
    fn into_claimed(self) -> ClaimedAsset {
        ClaimedAsset {
            asset: Asset {
                id: self.id,
                library_id: self.library_id,
                rel_path: self.rel_path,
                asset_type: self.asset_type,
                mtime: self.mtime,
                size: self.size,
                status: self.status,
                tags_model_id: self.tags_model_id,
                analysis_model_id: self.analysis_model_id,
                worker_id: self.worker_id,
                lease_expires_at: self.lease_expires_at,
                retry_count: self.retry_count,
                error_message: self.error_message,
                visual_analysis: self.visual_analysis,
                preview_path: self.preview_path,
                video_preview_path: self.video_preview_path,
                segmentation_version: self.segmentation_version,
            },
            library_absolute_path: self.library_absolute_path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_pattern_escapes_and_joins() {
        let pattern = extension_pattern(&["jpg".into(), "jpeg".into(), "png".into()]);
        assert_eq!(pattern, r"\.(jpg|jpeg|png)$");
    }

    #[test]
    fn claim_request_defaults_to_single_row_lease() {
        let req = ClaimRequest::new("worker-1", AssetStatus::Pending, ClaimScope::Global);
        assert_eq!(req.limit, 1);
        assert_eq!(req.lease_seconds, DEFAULT_LEASE_SECONDS);
    }
}
