//! Blended full-text search over image `visual_analysis` and per-scene
//! video metadata.
//!
//! Image ranking mirrors the single-table query this is grounded on almost
//! verbatim (`to_tsvector`/`websearch_to_tsquery`/`ts_rank_cd`, vibe and OCR
//! ranks summed). The video side runs the same two ranks per `video_scenes`
//! row, then folds each asset's scenes down to `final_rank = max(scene_rank)`
//! and `match_ratio = matching_scenes / total_scenes`, with `best_scene_ts`
//! taken from the highest-ranked scene. The two streams are unioned in
//! application code, not SQL, since their per-row shapes differ before the
//! aggregation step.

use msearch_models::{SearchHit, SearchQuery};
use sqlx::{PgPool, QueryBuilder};

use crate::error::DbResult;

const DEFAULT_LIMIT: i64 = 50;

pub struct SearchRepository {
    pool: PgPool,
}

impl SearchRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn search(&self, query: &SearchQuery) -> DbResult<Vec<SearchHit>> {
        let limit = query.limit.unwrap_or(DEFAULT_LIMIT).max(1);
        let has_fts = query.vibe.is_some() || query.ocr.is_some();

        let mut hits = Vec::new();
        if query.asset_types.is_empty() || query.asset_types.iter().any(|t| t == "image") {
            hits.extend(self.search_images(query, has_fts, limit).await?);
        }
        if query.asset_types.is_empty() || query.asset_types.iter().any(|t| t == "video") {
            hits.extend(self.search_videos(query, has_fts, limit).await?);
        }

        // Each stream is already ordered by rank (has_fts) or mtime
        // (!has_fts), but the two streams must still be merged into one
        // ranking rather than concatenated.
        if has_fts {
            hits.sort_by(|(a, _), (b, _)| b.final_rank.partial_cmp(&a.final_rank).unwrap());
        } else {
            hits.sort_by(|(_, a_mtime), (_, b_mtime)| b_mtime.partial_cmp(a_mtime).unwrap());
        }
        hits.truncate(limit as usize);
        Ok(hits.into_iter().map(|(hit, _)| hit).collect())
    }

    async fn search_images(
        &self,
        query: &SearchQuery,
        has_fts: bool,
        limit: i64,
    ) -> DbResult<Vec<(SearchHit, f64)>> {
        let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
            "SELECT a.id, a.status, a.error_message, a.rel_path, a.preview_path,
                    a.video_preview_path, a.mtime, l.slug AS library_slug, l.name AS library_name",
        );

        if let Some(vibe) = &query.vibe {
            qb.push(
                ", ts_rank_cd(to_tsvector('english', a.visual_analysis::text), websearch_to_tsquery('english', ",
            );
            qb.push_bind(vibe.clone());
            qb.push("), 1)");
        } else {
            qb.push(", 0.0::double precision");
        }
        qb.push(" AS vibe_rank");

        if let Some(ocr) = &query.ocr {
            qb.push(
                ", ts_rank_cd(to_tsvector('english', coalesce(a.visual_analysis->>'ocr_text', '')), websearch_to_tsquery('english', ",
            );
            qb.push_bind(ocr.clone());
            qb.push("), 1)");
        } else {
            qb.push(", 0.0::double precision");
        }
        qb.push(" AS ocr_rank");

        qb.push(" FROM asset a JOIN library l ON a.library_id = l.slug WHERE l.deleted_at IS NULL AND a.type = 'image'");

        if has_fts {
            qb.push(" AND a.visual_analysis IS NOT NULL");
        }
        if let Some(vibe) = &query.vibe {
            qb.push(" AND to_tsvector('english', a.visual_analysis::text) @@ websearch_to_tsquery('english', ");
            qb.push_bind(vibe.clone());
            qb.push(")");
        }
        if let Some(ocr) = &query.ocr {
            qb.push(" AND to_tsvector('english', coalesce(a.visual_analysis->>'ocr_text', '')) @@ websearch_to_tsquery('english', ");
            qb.push_bind(ocr.clone());
            qb.push(")");
        }
        if let Some(tag) = &query.tag {
            qb.push(" AND a.visual_analysis->'tags' ? ");
            qb.push_bind(tag.clone());
        }
        if !query.library_slugs.is_empty() {
            qb.push(" AND l.slug = ANY(");
            qb.push_bind(query.library_slugs.clone());
            qb.push(")");
        }

        if has_fts {
            qb.push(" ORDER BY (vibe_rank + ocr_rank) DESC");
        } else {
            qb.push(" ORDER BY a.mtime DESC");
        }
        qb.push(" LIMIT ");
        qb.push_bind(limit);

        let rows = qb.build_query_as::<ImageHitRow>().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|row| { let mtime = row.mtime; (row.into_hit(), mtime) }).collect())
    }

    async fn search_videos(
        &self,
        query: &SearchQuery,
        has_fts: bool,
        limit: i64,
    ) -> DbResult<Vec<(SearchHit, f64)>> {
        let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
            "SELECT a.id, a.status, a.error_message, a.rel_path, a.preview_path,
                    a.video_preview_path, a.mtime, l.slug AS library_slug, l.name AS library_name,
                    s.start_ts",
        );

        if let Some(vibe) = &query.vibe {
            qb.push(
                ", ts_rank_cd(to_tsvector('english', s.metadata::text), websearch_to_tsquery('english', ",
            );
            qb.push_bind(vibe.clone());
            qb.push("), 1)");
        } else {
            qb.push(", 0.0::double precision");
        }
        qb.push(" AS vibe_rank");

        if let Some(ocr) = &query.ocr {
            qb.push(
                ", ts_rank_cd(to_tsvector('english', coalesce(s.metadata->'moondream'->>'ocr_text', '')), websearch_to_tsquery('english', ",
            );
            qb.push_bind(ocr.clone());
            qb.push("), 1)");
        } else {
            qb.push(", 0.0::double precision");
        }
        qb.push(" AS ocr_rank, count(*) OVER (PARTITION BY a.id) AS total_scenes");

        qb.push(
            " FROM video_scenes s JOIN asset a ON s.asset_id = a.id
              JOIN library l ON a.library_id = l.slug
              WHERE l.deleted_at IS NULL AND a.type = 'video'",
        );

        if let Some(tag) = &query.tag {
            qb.push(" AND s.metadata->'moondream'->'tags' ? ");
            qb.push_bind(tag.clone());
        }
        if !query.library_slugs.is_empty() {
            qb.push(" AND l.slug = ANY(");
            qb.push_bind(query.library_slugs.clone());
            qb.push(")");
        }

        // Per-scene matching is filtered during aggregation below, where
        // match_ratio is computed against each asset's full scene set.
        let rows = qb.build_query_as::<VideoSceneHitRow>().fetch_all(&self.pool).await?;

        Ok(Self::aggregate_video_scenes(rows, has_fts, limit))
    }

    fn aggregate_video_scenes(
        rows: Vec<VideoSceneHitRow>,
        has_fts: bool,
        limit: i64,
    ) -> Vec<(SearchHit, f64)> {
        use std::collections::BTreeMap;

        let mut by_asset: BTreeMap<i64, Vec<VideoSceneHitRow>> = BTreeMap::new();
        for row in rows {
            by_asset.entry(row.id).or_default().push(row);
        }

        let mut hits: Vec<(SearchHit, f64)> = by_asset
            .into_values()
            .filter_map(|scenes| {
                let total = scenes.len() as f64;
                let matching = scenes
                    .iter()
                    .filter(|s| s.vibe_rank + s.ocr_rank > 0.0)
                    .count() as f64;
                if has_fts && matching == 0.0 {
                    return None;
                }
                let best = scenes
                    .iter()
                    .max_by(|a, b| {
                        (a.vibe_rank + a.ocr_rank)
                            .partial_cmp(&(b.vibe_rank + b.ocr_rank))
                            .unwrap()
                    })?
                    .clone();
                Some((
                    SearchHit {
                        asset_id: best.id,
                        asset_type: "video".to_string(),
                        status: best.status,
                        error_message: best.error_message,
                        final_rank: best.vibe_rank + best.ocr_rank,
                        match_ratio: if total > 0.0 { matching / total } else { 0.0 },
                        best_scene_ts: Some(best.start_ts),
                        library_slug: best.library_slug,
                        library_name: best.library_name,
                        filename: best.rel_path,
                        thumbnail_path: None,
                        preview_path: best.preview_path,
                        video_preview_path: best.video_preview_path,
                    },
                    best.mtime,
                ))
            })
            .collect();

        if !has_fts {
            hits.truncate(limit as usize);
        }
        hits
    }
}

#[derive(sqlx::FromRow)]
struct ImageHitRow {
    id: i64,
    status: String,
    error_message: Option<String>,
    rel_path: String,
    preview_path: Option<String>,
    video_preview_path: Option<String>,
    mtime: f64,
    library_slug: String,
    library_name: String,
    vibe_rank: f64,
    ocr_rank: f64,
}

impl ImageHitRow {
    fn into_hit(self) -> SearchHit {
        SearchHit {
            asset_id: self.id,
            asset_type: "image".to_string(),
            status: self.status,
            error_message: self.error_message,
            final_rank: self.vibe_rank + self.ocr_rank,
            match_ratio: 1.0,
            best_scene_ts: None,
            library_slug: self.library_slug,
            library_name: self.library_name,
            filename: self.rel_path,
            thumbnail_path: None,
            preview_path: self.preview_path,
            video_preview_path: self.video_preview_path,
        }
    }
}

#[derive(sqlx::FromRow, Clone)]
struct VideoSceneHitRow {
    id: i64,
    status: String,
    error_message: Option<String>,
    rel_path: String,
    preview_path: Option<String>,
    video_preview_path: Option<String>,
    mtime: f64,
    library_slug: String,
    library_name: String,
    start_ts: f64,
    vibe_rank: f64,
    ocr_rank: f64,
    #[allow(dead_code)]
    total_scenes: i64,
}
