//! Lease reclamation, stale-worker pruning, orphan file sweeps, and
//! missing-source reaping. Grounded on `core/maintenance.py`'s
//! `MaintenanceService`; the orphan-sweep "expected paths" computation
//! additionally accounts for derivative files that are written to disk but
//! never recorded in any DB column (the video proxy worker's `proxy.mp4`
//! and the image proxy worker's `.webp` proxy), which the Python original
//! has no equivalent of since it predates that split.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use msearch_db::{AssetRepository, LibraryRepository, SceneRepository, WorkerRepository};
use msearch_media::{Derivative, MediaStore};
use tokio::fs;
use tracing::{info, warn};

use crate::error::WorkerResult;

const PAGE_SIZE: i64 = 1000;

/// Outcome of a sweep, shared between the dry-run preview and the mutating
/// pass so both report in the same shape.
#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct SweepReport {
    pub files_removed: u64,
    pub bytes_removed: u64,
    pub dirs_removed: u64,
}

pub struct MaintenanceService {
    asset_repo: Arc<AssetRepository>,
    library_repo: Arc<LibraryRepository>,
    scene_repo: Arc<SceneRepository>,
    worker_repo: Arc<WorkerRepository>,
    store: Arc<MediaStore>,
    hostname: String,
}

impl MaintenanceService {
    pub fn new(
        asset_repo: Arc<AssetRepository>,
        library_repo: Arc<LibraryRepository>,
        scene_repo: Arc<SceneRepository>,
        worker_repo: Arc<WorkerRepository>,
        store: Arc<MediaStore>,
        hostname: String,
    ) -> Self {
        Self { asset_repo, library_repo, scene_repo, worker_repo, store, hostname }
    }

    /// The three cheap, always-safe tasks, run together on every tick.
    /// `cleanup_data_dir` and `reap_missing_source_files` are heavier and
    /// scoped across the whole data root regardless of `library_slug`, so
    /// callers schedule those separately rather than folding them in here —
    /// mirrors `core/maintenance.py`'s own `run_all`.
    pub async fn run_all(
        &self,
        library_slug: Option<&str>,
        temp_max_age_seconds: i64,
        stale_worker_max_age_hours: i64,
    ) -> WorkerResult<()> {
        let pruned = self.prune_stale_workers(stale_worker_max_age_hours).await?;
        let reclaimed = self.reclaim_stale_leases(library_slug).await?;
        let temp_report = self.cleanup_temp_dir(temp_max_age_seconds, false).await?;
        info!(
            pruned_workers = pruned,
            reclaimed_leases = reclaimed,
            temp_files_removed = temp_report.files_removed,
            temp_bytes_removed = temp_report.bytes_removed,
            "maintenance tick complete"
        );
        Ok(())
    }

    pub async fn prune_stale_workers(&self, max_age_hours: i64) -> WorkerResult<u64> {
        Ok(self.worker_repo.prune_stale_workers(max_age_hours).await?)
    }

    pub async fn reclaim_stale_leases(&self, library_slug: Option<&str>) -> WorkerResult<u64> {
        Ok(self.asset_repo.reclaim_stale_leases(library_slug).await?)
    }

    /// Deletes everything under `data_dir/tmp` older than `max_age_seconds`,
    /// unconditionally (nothing under `tmp/` is ever DB-tracked). Skipped
    /// entirely while this host has a local transcode in flight, since that
    /// worker's scratch files are exactly what would otherwise look stale.
    pub async fn cleanup_temp_dir(&self, max_age_seconds: i64, dry_run: bool) -> WorkerResult<SweepReport> {
        if self.worker_repo.has_active_local_transcodes(&self.hostname).await? {
            info!(hostname = %self.hostname, "skipping temp cleanup: local transcode in progress");
            return Ok(SweepReport::default());
        }
        let root = self.store.tmp_dir(None);
        let cutoff = SystemTime::now() - Duration::from_secs(max_age_seconds.max(0) as u64);
        let mut report = SweepReport::default();
        sweep_old_files(&root, cutoff, dry_run, &mut report).await?;
        if !dry_run {
            prune_empty_dirs(&root, &mut report).await?;
        }
        Ok(report)
    }

    pub async fn preview_temp_cleanup(&self, max_age_seconds: i64) -> WorkerResult<SweepReport> {
        self.cleanup_temp_dir(max_age_seconds, true).await
    }

    /// Walks every non-deleted library's derivative directories and deletes
    /// files older than `min_age_seconds` that aren't in the expected-paths
    /// set built from the DB. The age floor guards against a worker that has
    /// just written a file but not yet committed its path to the asset row.
    pub async fn cleanup_data_dir(&self, min_age_seconds: i64, dry_run: bool) -> WorkerResult<SweepReport> {
        let libraries = self.library_repo.list_libraries(false).await?;
        let expected = self.build_expected_paths().await?;
        let cutoff = SystemTime::now() - Duration::from_secs(min_age_seconds.max(0) as u64);
        let mut report = SweepReport::default();

        let mut swept_dirs = Vec::new();
        for lib in &libraries {
            swept_dirs.push(self.store.data_dir().join(&lib.slug).join("thumbnails"));
            swept_dirs.push(self.store.data_dir().join(&lib.slug).join("proxies"));
            swept_dirs.push(self.store.data_dir().join("video_clips").join(&lib.slug));
            swept_dirs.push(self.store.data_dir().join("video_scenes").join(&lib.slug));
        }
        for dir in &swept_dirs {
            sweep_unexpected(dir, self.store.data_dir(), &expected, cutoff, dry_run, &mut report).await?;
        }
        if !dry_run {
            for dir in &swept_dirs {
                prune_empty_dirs(dir, &mut report).await?;
            }
        }
        Ok(report)
    }

    pub async fn preview_data_dir_cleanup(&self, min_age_seconds: i64) -> WorkerResult<SweepReport> {
        self.cleanup_data_dir(min_age_seconds, true).await
    }

    /// Paths derivative-generating workers have written or are entitled to
    /// write, keyed the same way the derivatives are: relative to
    /// `data_dir`. Two entries here (`proxy.mp4` and the image `.webp`
    /// proxy) have no backing DB column — see module docs.
    async fn build_expected_paths(&self) -> WorkerResult<HashSet<String>> {
        let mut expected = HashSet::new();

        let mut offset = 0;
        loop {
            let rows = self.asset_repo.get_asset_ids_expecting_proxy(None, PAGE_SIZE, offset).await?;
            let len = rows.len();
            for (id, slug) in rows {
                expected.insert(self.store.derivative_rel_path(&slug, id, Derivative::Thumbnail));
                expected.insert(self.store.derivative_rel_path(&slug, id, Derivative::Proxy));
            }
            if (len as i64) < PAGE_SIZE {
                break;
            }
            offset += PAGE_SIZE;
        }

        let mut offset = 0;
        loop {
            let rows = self.asset_repo.get_video_asset_ids_expecting_proxy(None, PAGE_SIZE, offset).await?;
            let len = rows.len();
            for (id, slug) in rows {
                expected.insert(self.store.derivative_rel_path(&slug, id, Derivative::Thumbnail));
                expected.insert(self.store.video_clip_rel_path(&slug, id, "proxy.mp4"));
            }
            if (len as i64) < PAGE_SIZE {
                break;
            }
            offset += PAGE_SIZE;
        }

        for path in self.asset_repo.get_all_video_preview_paths_excluding_trash().await? {
            expected.insert(path);
        }
        for path in self.scene_repo.get_all_rep_frame_paths_excluding_trash().await? {
            expected.insert(path);
        }

        Ok(expected)
    }

    /// Assets whose source file no longer exists on disk (moved, deleted
    /// outside the tool, or the library root itself went away without a
    /// rescan). Not grounded in `original_source/` — no Python equivalent
    /// was present in the filtered pack — built from spec.md's description
    /// of the task alone. `dry_run` reports what would be reaped without
    /// mutating anything.
    pub async fn reap_missing_source_files(&self, dry_run: bool) -> WorkerResult<SweepReport> {
        let mut report = SweepReport::default();
        let mut offset = 0;
        loop {
            let candidates = self.asset_repo.list_missing_source_candidates(PAGE_SIZE, offset).await?;
            let len = candidates.len();
            for asset in candidates {
                let library_path = match self.asset_repo.library_absolute_path(asset.id).await {
                    Ok(p) => p,
                    Err(_) => continue,
                };
                let source_path = Path::new(&library_path).join(&asset.rel_path);
                if source_path.exists() {
                    continue;
                }
                warn!(asset_id = asset.id, path = %source_path.display(), "source file missing, reaping asset");
                report.files_removed += 1;

                let mut derivative_rels = vec![
                    self.store.derivative_rel_path(&asset.library_id, asset.id, Derivative::Thumbnail),
                    self.store.derivative_rel_path(&asset.library_id, asset.id, Derivative::Proxy),
                ];
                if asset.asset_type() == msearch_models::AssetType::Video {
                    derivative_rels.push(self.store.video_clip_rel_path(&asset.library_id, asset.id, "proxy.mp4"));
                    if let Some(head_clip) = &asset.video_preview_path {
                        derivative_rels.push(head_clip.clone());
                    }
                    if let Ok(scenes) = self.scene_repo.list_scenes(asset.id).await {
                        derivative_rels.extend(scenes.into_iter().map(|s| s.rep_frame_path));
                    }
                    derivative_rels.push(self.store.scene_preview_rel_path(&asset.library_id, asset.id));
                }

                for rel in &derivative_rels {
                    if let Ok(path) = self.store.resolve(rel) {
                        if let Ok(meta) = fs::metadata(&path).await {
                            report.bytes_removed += meta.len();
                        }
                    }
                }

                if dry_run {
                    continue;
                }

                for rel in &derivative_rels {
                    let _ = self.store.delete(rel).await;
                }
                let _ = self.scene_repo.delete_scenes_for_asset(asset.id).await;
                let _ = self.scene_repo.delete_active_state(asset.id).await;
                let _ = self.asset_repo.delete(asset.id).await;
            }
            if (len as i64) < PAGE_SIZE {
                break;
            }
            offset += PAGE_SIZE;
        }
        Ok(report)
    }
}

async fn sweep_old_files(dir: &Path, cutoff: SystemTime, dry_run: bool, report: &mut SweepReport) -> WorkerResult<()> {
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let mut entries = match fs::read_dir(&current).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let metadata = entry.metadata().await?;
            if metadata.is_dir() {
                stack.push(path);
                continue;
            }
            let modified = metadata.modified().unwrap_or_else(|_| SystemTime::now());
            if modified > cutoff {
                continue;
            }
            report.files_removed += 1;
            report.bytes_removed += metadata.len();
            if !dry_run {
                let _ = fs::remove_file(&path).await;
            }
        }
    }
    Ok(())
}

async fn sweep_unexpected(
    dir: &Path,
    data_dir: &Path,
    expected: &HashSet<String>,
    cutoff: SystemTime,
    dry_run: bool,
    report: &mut SweepReport,
) -> WorkerResult<()> {
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let mut entries = match fs::read_dir(&current).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let metadata = entry.metadata().await?;
            if metadata.is_dir() {
                stack.push(path);
                continue;
            }
            let rel = path
                .strip_prefix(data_dir)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            if expected.contains(rel.as_str()) {
                continue;
            }
            let modified = metadata.modified().unwrap_or_else(|_| SystemTime::now());
            if modified > cutoff {
                continue;
            }
            report.files_removed += 1;
            report.bytes_removed += metadata.len();
            if !dry_run {
                let _ = fs::remove_file(&path).await;
            }
        }
    }
    Ok(())
}

/// Post-order directory collection so children are always removed before
/// their parents; `remove_dir` on a non-empty directory is left to fail
/// silently (it means a file under the age floor is still there).
fn collect_dirs_postorder<'a>(
    dir: PathBuf,
    out: &'a mut Vec<PathBuf>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = WorkerResult<()>> + Send + 'a>> {
    Box::pin(async move {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let mut subdirs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                subdirs.push(entry.path());
            }
        }
        for sub in subdirs {
            collect_dirs_postorder(sub, out).await?;
        }
        out.push(dir);
        Ok(())
    })
}

async fn prune_empty_dirs(root: &Path, report: &mut SweepReport) -> WorkerResult<()> {
    let mut dirs = Vec::new();
    collect_dirs_postorder(root.to_path_buf(), &mut dirs).await?;
    for dir in dirs {
        if dir == root {
            continue;
        }
        if fs::remove_dir(&dir).await.is_ok() {
            report.dirs_removed += 1;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn sweep_old_files_keeps_files_newer_than_cutoff() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("fresh.txt"), b"x").await.unwrap();
        let cutoff = SystemTime::now() - Duration::from_secs(3600);

        let mut report = SweepReport::default();
        sweep_old_files(dir.path(), cutoff, false, &mut report).await.unwrap();

        assert_eq!(report.files_removed, 0);
        assert!(dir.path().join("fresh.txt").exists());
    }

    #[tokio::test]
    async fn sweep_old_files_deletes_files_older_than_cutoff() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("stale.txt"), b"x").await.unwrap();
        let cutoff = SystemTime::now() + Duration::from_secs(3600);

        let mut report = SweepReport::default();
        sweep_old_files(dir.path(), cutoff, false, &mut report).await.unwrap();

        assert_eq!(report.files_removed, 1);
        assert!(!dir.path().join("stale.txt").exists());
    }

    #[tokio::test]
    async fn sweep_old_files_dry_run_counts_without_deleting() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("stale.txt"), b"x").await.unwrap();
        let cutoff = SystemTime::now() + Duration::from_secs(3600);

        let mut report = SweepReport::default();
        sweep_old_files(dir.path(), cutoff, true, &mut report).await.unwrap();

        assert_eq!(report.files_removed, 1);
        assert!(dir.path().join("stale.txt").exists());
    }

    #[tokio::test]
    async fn sweep_unexpected_spares_paths_in_the_expected_set() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("lib").join("thumbnails")).await.unwrap();
        let file = dir.path().join("lib").join("thumbnails").join("1.jpg");
        fs::write(&file, b"x").await.unwrap();
        let cutoff = SystemTime::now() + Duration::from_secs(3600);

        let mut expected = HashSet::new();
        expected.insert("lib/thumbnails/1.jpg".to_string());

        let mut report = SweepReport::default();
        sweep_unexpected(&dir.path().join("lib"), dir.path(), &expected, cutoff, false, &mut report)
            .await
            .unwrap();

        assert_eq!(report.files_removed, 0);
        assert!(file.exists());
    }

    #[tokio::test]
    async fn sweep_unexpected_deletes_orphans_not_in_the_expected_set() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("lib").join("thumbnails")).await.unwrap();
        let file = dir.path().join("lib").join("thumbnails").join("2.jpg");
        fs::write(&file, b"x").await.unwrap();
        let cutoff = SystemTime::now() + Duration::from_secs(3600);

        let mut report = SweepReport::default();
        sweep_unexpected(&dir.path().join("lib"), dir.path(), &HashSet::new(), cutoff, false, &mut report)
            .await
            .unwrap();

        assert_eq!(report.files_removed, 1);
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn prune_empty_dirs_removes_nested_dirs_but_keeps_root() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        fs::create_dir_all(&nested).await.unwrap();

        let mut report = SweepReport::default();
        prune_empty_dirs(dir.path(), &mut report).await.unwrap();

        assert_eq!(report.dirs_removed, 2);
        assert!(dir.path().exists());
        assert!(!dir.path().join("a").exists());
    }

    #[tokio::test]
    async fn prune_empty_dirs_leaves_non_empty_dirs_in_place() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a");
        fs::create_dir_all(&nested).await.unwrap();
        fs::write(nested.join("keep.txt"), b"x").await.unwrap();

        let mut report = SweepReport::default();
        prune_empty_dirs(dir.path(), &mut report).await.unwrap();

        assert_eq!(report.dirs_removed, 0);
        assert!(nested.exists());
    }
}
