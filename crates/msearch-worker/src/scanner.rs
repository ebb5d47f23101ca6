//! Scanner: claims a library queued for scan and walks its root, upserting
//! one asset row per supported file.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use msearch_db::{AssetRepository, LibraryRepository};
use msearch_models::{file_extensions, AssetType, ScanStatus};
use tracing::{error, info, warn};

use crate::worker_base::WorkerRunner;

const STATS_INTERVAL: u64 = 1_000;
const MTIME_DECIMALS: i32 = 3;

pub struct Scanner {
    asset_repo: Arc<AssetRepository>,
    library_repo: Arc<LibraryRepository>,
    library_slug: Option<String>,
    should_pause_or_exit: Arc<dyn Fn() -> bool + Send + Sync>,
    files_processed: AtomicU64,
}

impl Scanner {
    pub fn new(
        asset_repo: Arc<AssetRepository>,
        library_repo: Arc<LibraryRepository>,
        library_slug: Option<String>,
        should_pause_or_exit: Arc<dyn Fn() -> bool + Send + Sync>,
    ) -> Self {
        Self {
            asset_repo,
            library_repo,
            library_slug,
            should_pause_or_exit,
            files_processed: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl WorkerRunner for Scanner {
    async fn process_task(&self) -> bool {
        let library = match self
            .library_repo
            .claim_library_for_scanning(self.library_slug.as_deref())
            .await
        {
            Ok(Some(lib)) => lib,
            Ok(None) => return false,
            Err(err) => {
                error!(error = %err, "failed to claim library for scanning");
                return false;
            }
        };

        let root = PathBuf::from(&library.absolute_path);
        if !root.exists() {
            warn!(library = %library.slug, root = %root.display(), "library root does not exist; resetting to idle");
            let _ = self.library_repo.set_library_scan_status(&library.slug, ScanStatus::Idle).await;
            return true;
        }

        let count = Arc::new(AtomicU64::new(0));
        let stop = self.should_pause_or_exit.clone();
        let asset_repo = self.asset_repo.clone();
        let library_slug = library.slug.clone();
        let root_for_walk = root.clone();
        let count_for_walk = count.clone();

        let result = tokio::task::spawn_blocking(move || {
            scan_dir_blocking(&root_for_walk, &root_for_walk, &library_slug, &asset_repo, &stop, &count_for_walk)
        })
        .await;

        if let Err(err) = result {
            error!(error = %err, "scanner task panicked");
        }

        let processed = count.load(Ordering::Relaxed);
        self.files_processed.store(processed, Ordering::Relaxed);
        info!(library = %library.slug, files_processed = processed, "scan pass complete");

        let _ = self.library_repo.set_library_scan_status(&library.slug, ScanStatus::Idle).await;
        true
    }

    async fn heartbeat_stats(&self) -> Option<serde_json::Value> {
        Some(serde_json::json!({ "files_processed": self.files_processed.load(Ordering::Relaxed) }))
    }
}

/// Synchronous recursive walk. Upserts are synchronous round-trips through
/// a blocking `tokio` handle, matching the original's per-file call pattern
/// rather than batching — simplicity over throughput, since the scanner
/// isn't the pipeline's bottleneck.
fn scan_dir_blocking(
    current_dir: &Path,
    library_root: &Path,
    library_id: &str,
    asset_repo: &AssetRepository,
    should_stop: &Arc<dyn Fn() -> bool + Send + Sync>,
    count: &AtomicU64,
) {
    let entries = match std::fs::read_dir(current_dir) {
        Ok(entries) => entries,
        Err(err) => {
            error!(dir = %current_dir.display(), error = %err, "scanner: directory read failed");
            return;
        }
    };

    for entry in entries {
        if should_stop() {
            return;
        }
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                warn!(dir = %current_dir.display(), error = %err, "scanner: entry read failed");
                continue;
            }
        };
        let path = entry.path();
        let file_type = match entry.file_type() {
            Ok(ft) => ft,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "scanner: file_type read failed");
                continue;
            }
        };

        if file_type.is_dir() {
            scan_dir_blocking(&path, library_root, library_id, asset_repo, should_stop, count);
            continue;
        }
        if !file_type.is_file() {
            continue;
        }

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if !file_extensions::is_image_extension(ext) && !file_extensions::is_video_extension(ext) {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "scanner: stat failed");
                continue;
            }
        };
        let rel_path = match path.strip_prefix(library_root) {
            Ok(p) => p.to_string_lossy().replace('\\', "/"),
            Err(_) => continue,
        };
        let mtime = round_to(
            metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
            MTIME_DECIMALS,
        );
        let size = metadata.len() as i64;
        let asset_type = if file_extensions::is_video_extension(ext) {
            AssetType::Video
        } else {
            AssetType::Image
        };

        let handle = tokio::runtime::Handle::current();
        let result = handle.block_on(asset_repo.upsert_asset(library_id, &rel_path, asset_type, mtime, size));
        if let Err(err) = result {
            error!(rel_path = %rel_path, error = %err, "scanner: upsert failed");
            continue;
        }

        let processed = count.fetch_add(1, Ordering::Relaxed) + 1;
        if processed % STATS_INTERVAL == 0 {
            info!(files_processed = processed, "scanner progress");
            if should_stop() {
                return;
            }
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_to_three_decimals() {
        assert_eq!(round_to(1.23456, 3), 1.235);
    }
}
