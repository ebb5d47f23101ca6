//! Library repository: CRUD, slug derivation, soft/hard delete, scan claiming.

use msearch_models::{Library, ScanStatus};
use sqlx::PgPool;

use crate::error::{DbError, DbResult};

const HARD_DELETE_CHUNK_SIZE: i64 = 5000;

/// URL-safe slug from a display name: lowercase, non-alphanumeric runs
/// collapse to a single hyphen, leading/trailing hyphens stripped.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_was_sep = false;
    for ch in name.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
            last_was_sep = false;
        } else if !last_was_sep {
            slug.push('-');
            last_was_sep = true;
        }
    }
    let trimmed = slug.trim_matches('-');
    if trimmed.is_empty() {
        "library".to_string()
    } else {
        trimmed.to_string()
    }
}

pub struct LibraryRepository {
    pool: PgPool,
}

impl LibraryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_absolute_path(&self, slug: &str, include_deleted: bool) -> DbResult<Option<String>> {
        let row: Option<(String,)> = if include_deleted {
            sqlx::query_as("SELECT absolute_path FROM library WHERE slug = $1")
                .bind(slug)
                .fetch_optional(&self.pool)
                .await?
        } else {
            sqlx::query_as(
                "SELECT absolute_path FROM library WHERE slug = $1 AND deleted_at IS NULL",
            )
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?
        };
        Ok(row.map(|(p,)| p))
    }

    pub async fn get_by_slug(&self, slug: &str, include_deleted: bool) -> DbResult<Option<Library>> {
        let row = if include_deleted {
            sqlx::query_as::<_, Library>("SELECT * FROM library WHERE slug = $1")
                .bind(slug)
                .fetch_optional(&self.pool)
                .await?
        } else {
            sqlx::query_as::<_, Library>(
                "SELECT * FROM library WHERE slug = $1 AND deleted_at IS NULL",
            )
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?
        };
        Ok(row)
    }

    pub async fn list_libraries(&self, include_deleted: bool) -> DbResult<Vec<Library>> {
        let rows = if include_deleted {
            sqlx::query_as::<_, Library>("SELECT * FROM library ORDER BY slug")
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query_as::<_, Library>(
                "SELECT * FROM library WHERE deleted_at IS NULL ORDER BY slug",
            )
            .fetch_all(&self.pool)
            .await?
        };
        Ok(rows)
    }

    pub async fn list_trashed(&self) -> DbResult<Vec<Library>> {
        let rows = sqlx::query_as::<_, Library>(
            "SELECT * FROM library WHERE deleted_at IS NOT NULL ORDER BY slug",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Insert a new library; the slug is derived from `name`. Fails with a
    /// `Conflict` distinguishing a live collision from a trashed one, per
    /// `add`'s two distinct error messages in the repository it's grounded on.
    pub async fn add(&self, name: &str, absolute_path: &str) -> DbResult<String> {
        let slug = slugify(name);
        let existing: Option<(Option<chrono::DateTime<chrono::Utc>>,)> =
            sqlx::query_as("SELECT deleted_at FROM library WHERE slug = $1")
                .bind(&slug)
                .fetch_optional(&self.pool)
                .await?;
        if let Some((deleted_at,)) = existing {
            return Err(if deleted_at.is_none() {
                DbError::conflict(format!(
                    "An active library with the slug '{slug}' already exists."
                ))
            } else {
                DbError::conflict(format!(
                    "A deleted library with the slug '{slug}' exists in the trash. \
                     Please restore it or use a different name."
                ))
            });
        }
        sqlx::query(
            "INSERT INTO library (slug, name, absolute_path, is_active, scan_status, sampling_limit)
             VALUES ($1, $2, $3, true, 'idle', 100)",
        )
        .bind(&slug)
        .bind(name)
        .bind(absolute_path)
        .execute(&self.pool)
        .await?;
        Ok(slug)
    }

    pub async fn soft_delete(&self, slug: &str) -> DbResult<()> {
        sqlx::query("UPDATE library SET deleted_at = now() WHERE slug = $1")
            .bind(slug)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn restore(&self, slug: &str) -> DbResult<()> {
        sqlx::query("UPDATE library SET deleted_at = NULL WHERE slug = $1")
            .bind(slug)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Claim a library awaiting scan: `full_scan_requested`/`fast_scan_requested`,
    /// active, not trashed. Locks the row with `SKIP LOCKED` so two scanner
    /// instances never pick up the same library, then flips it to `scanning`.
    pub async fn claim_library_for_scanning(&self, slug: Option<&str>) -> DbResult<Option<Library>> {
        let mut tx = self.pool.begin().await?;
        let row = match slug {
            Some(slug) => {
                sqlx::query_as::<_, Library>(
                    "SELECT * FROM library
                     WHERE slug = $1 AND is_active = true AND deleted_at IS NULL
                       AND scan_status IN ('full_scan_requested', 'fast_scan_requested')
                     FOR UPDATE SKIP LOCKED LIMIT 1",
                )
                .bind(slug)
                .fetch_optional(&mut *tx)
                .await?
            }
            None => {
                sqlx::query_as::<_, Library>(
                    "SELECT * FROM library
                     WHERE is_active = true AND deleted_at IS NULL
                       AND scan_status IN ('full_scan_requested', 'fast_scan_requested')
                     FOR UPDATE SKIP LOCKED LIMIT 1",
                )
                .fetch_optional(&mut *tx)
                .await?
            }
        };
        let Some(mut lib) = row else {
            tx.commit().await?;
            return Ok(None);
        };
        sqlx::query("UPDATE library SET scan_status = 'scanning' WHERE slug = $1")
            .bind(&lib.slug)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        lib.scan_status = ScanStatus::Scanning.as_str().to_string();
        Ok(Some(lib))
    }

    pub async fn set_library_scan_status(&self, slug: &str, status: ScanStatus) -> DbResult<()> {
        sqlx::query("UPDATE library SET scan_status = $2 WHERE slug = $1")
            .bind(slug)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Permanently delete a trashed library and all its assets (chunked to
    /// avoid holding long locks on large libraries). Errors if the library
    /// doesn't exist or isn't soft-deleted yet.
    pub async fn hard_delete(&self, slug: &str) -> DbResult<()> {
        let row: Option<(Option<chrono::DateTime<chrono::Utc>>,)> =
            sqlx::query_as("SELECT deleted_at FROM library WHERE slug = $1")
                .bind(slug)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            None => return Err(DbError::not_found(format!("Library not found: '{slug}'."))),
            Some((None,)) => {
                return Err(DbError::conflict(format!(
                    "Library '{slug}' is not in trash (soft-delete it first)."
                )))
            }
            Some((Some(_),)) => {}
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM video_scenes WHERE asset_id IN (SELECT id FROM asset WHERE library_id = $1)",
        )
        .bind(slug)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "DELETE FROM video_active_state WHERE asset_id IN (SELECT id FROM asset WHERE library_id = $1)",
        )
        .bind(slug)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        loop {
            let result = sqlx::query(
                "DELETE FROM asset WHERE id IN (SELECT id FROM asset WHERE library_id = $1 LIMIT $2)",
            )
            .bind(slug)
            .bind(HARD_DELETE_CHUNK_SIZE)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                break;
            }
        }

        sqlx::query("DELETE FROM library WHERE slug = $1")
            .bind(slug)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn hard_delete_all_trashed(&self) -> DbResult<usize> {
        let trashed = self.list_trashed().await?;
        let count = trashed.len();
        for lib in trashed {
            self.hard_delete(&lib.slug).await?;
        }
        Ok(count)
    }

    /// Distinct `library_id` values in `asset` with no matching `library`
    /// row — data left behind by a library row deleted outside this API.
    pub async fn get_orphaned_library_slugs(&self) -> DbResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT a.library_id FROM asset a
             WHERE NOT EXISTS (SELECT 1 FROM library l WHERE l.slug = a.library_id)
             ORDER BY a.library_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(s,)| s).collect())
    }

    pub async fn get_orphaned_asset_count_for_library(&self, library_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM asset WHERE library_id = $1")
            .bind(library_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Whether any of `slugs` (all non-deleted libraries when empty) has an
    /// asset still short of a terminal status — used to flag search results
    /// as possibly incomplete while analysis is ongoing.
    pub async fn any_libraries_analyzing(&self, slugs: &[String]) -> DbResult<bool> {
        let mut qb: sqlx::QueryBuilder<sqlx::Postgres> = sqlx::QueryBuilder::new(
            "SELECT EXISTS (
                SELECT 1 FROM asset a JOIN library l ON a.library_id = l.slug
                WHERE l.deleted_at IS NULL
                  AND a.status NOT IN ('completed', 'failed', 'poisoned')",
        );
        if !slugs.is_empty() {
            qb.push(" AND l.slug = ANY(");
            qb.push_bind(slugs.to_vec());
            qb.push(")");
        }
        qb.push(")");
        let (exists,): (bool,) = qb.build_query_as().fetch_one(&self.pool).await?;
        Ok(exists)
    }

    /// Every non-deleted library paired with whether it currently has any
    /// asset short of a terminal status.
    pub async fn list_libraries_with_status(&self) -> DbResult<Vec<(Library, bool)>> {
        let libraries = self.list_libraries(false).await?;
        let mut out = Vec::with_capacity(libraries.len());
        for lib in libraries {
            let analyzing = self.any_libraries_analyzing(&[lib.slug.clone()]).await?;
            out.push((lib, analyzing));
        }
        Ok(out)
    }

    /// Delete every asset (and child row) whose `library_id` matches no
    /// `library` row. Same cascade order as `hard_delete`. Returns the
    /// number of assets removed.
    pub async fn delete_orphaned_assets_for_library(&self, library_id: &str) -> DbResult<u64> {
        let asset_count = self.get_orphaned_asset_count_for_library(library_id).await?;
        if asset_count == 0 {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM video_scenes WHERE asset_id IN (SELECT id FROM asset WHERE library_id = $1)",
        )
        .bind(library_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "DELETE FROM video_active_state WHERE asset_id IN (SELECT id FROM asset WHERE library_id = $1)",
        )
        .bind(library_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        let mut total_deleted = 0u64;
        loop {
            let result = sqlx::query(
                "DELETE FROM asset WHERE id IN (SELECT id FROM asset WHERE library_id = $1 LIMIT $2)",
            )
            .bind(library_id)
            .bind(HARD_DELETE_CHUNK_SIZE)
            .execute(&self.pool)
            .await?;
            total_deleted += result.rows_affected();
            if result.rows_affected() == 0 {
                break;
            }
        }
        Ok(total_deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_punctuation_and_lowercases() {
        assert_eq!(slugify("My Vacation Photos!!"), "my-vacation-photos");
        assert_eq!(slugify("  --already-- slug "), "already-slug");
    }

    #[test]
    fn slugify_falls_back_to_library_when_empty() {
        assert_eq!(slugify("@@@"), "library");
        assert_eq!(slugify(""), "library");
    }
}
