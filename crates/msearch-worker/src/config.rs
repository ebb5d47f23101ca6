//! Worker configuration.

use std::time::Duration;

/// Worker configuration, assembled from the environment at startup.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Role this process runs: `scanner`, `image-proxy`, `video-proxy`,
    /// `ai-light`, `ai-full`, `maintenance`, `search-api`, or `all-in-one`.
    pub role: String,
    /// Identity stamped into `worker_status.worker_id` and every lease this
    /// process takes out. Defaults to `{role}-{hostname}-{pid}`.
    pub worker_id: String,
    /// Root directory the media store derives/asset proxies live under.
    pub data_dir: String,
    /// How often a running worker renews its own `worker_status` row.
    pub heartbeat_interval: Duration,
    /// Lease duration a claim grants before another worker may reclaim it.
    pub lease_seconds: i64,
    /// Assets processed per AI-worker claim batch.
    pub ai_batch_size: i64,
    /// Whether the AI worker runs a repair pass (reset mismatched-model
    /// assets back to `proxied`) before its normal claim loop.
    pub ai_repair: bool,
    /// Restrict this worker to a single library, by slug.
    pub library_slug: Option<String>,
    /// Window within which a worker counts as "locally active" for
    /// resource-contention checks (temp cleanup gating, batch sizing hints).
    pub local_worker_freshness_seconds: i64,
    /// Age past which an unresponsive `worker_status` row is pruned.
    pub stale_worker_max_age_hours: i64,
    /// Minimum file age before the orphan sweep in `cleanup_data_dir` will
    /// delete it — guards against deleting a file a worker just wrote but
    /// hasn't yet committed to the database.
    pub data_dir_cleanup_min_age_seconds: i64,
    /// Age past which files under `data_dir/tmp` are deleted outright.
    pub temp_max_age_seconds: i64,
    /// Bind address for the search/library-listing HTTP surface.
    pub http_bind_addr: String,
}

impl WorkerConfig {
    pub fn from_env() -> WorkerResult<Self> {
        let role = std::env::var("WORKER_ROLE").unwrap_or_else(|_| "all-in-one".to_string());
        let hostname = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .unwrap_or_else(|_| "localhost".to_string());
        let worker_id = std::env::var("WORKER_ID")
            .unwrap_or_else(|_| format!("{role}-{hostname}-{}", std::process::id()));

        let data_dir =
            std::env::var("MEDIA_SEARCH_DATA_DIR").unwrap_or_else(|_| "/data/mediasearch".to_string());
        reject_unsafe_data_dir(&data_dir)?;

        Ok(Self {
            role,
            worker_id,
            data_dir,
            heartbeat_interval: Duration::from_secs_f64(env_f64("WORKER_HEARTBEAT_SECS", 15.0)),
            lease_seconds: env_i64("WORKER_LEASE_SECONDS", 300),
            ai_batch_size: env_i64("WORKER_AI_BATCH_SIZE", 1),
            ai_repair: std::env::var("WORKER_AI_REPAIR")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            library_slug: std::env::var("WORKER_LIBRARY_SLUG").ok(),
            local_worker_freshness_seconds: env_i64("WORKER_LOCAL_FRESHNESS_SECONDS", 60),
            stale_worker_max_age_hours: env_i64("WORKER_STALE_MAX_AGE_HOURS", 24),
            data_dir_cleanup_min_age_seconds: env_i64("WORKER_DATA_DIR_MIN_AGE_SECONDS", 15 * 60),
            temp_max_age_seconds: env_i64("WORKER_TEMP_MAX_AGE_SECONDS", 4 * 3600),
            http_bind_addr: std::env::var("WORKER_HTTP_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
        })
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

use crate::error::WorkerResult;

/// A `data_dir` of `/` or the process's own current directory would make
/// the maintenance service's orphan sweep and temp cleanup a slow-motion
/// `rm -rf` of whatever happens to be there. Reject both outright.
fn reject_unsafe_data_dir(data_dir: &str) -> WorkerResult<()> {
    let path = std::path::Path::new(data_dir);
    if path == std::path::Path::new("/") {
        return Err(crate::error::WorkerError::config_error(
            "DATA_DIR must not be the filesystem root",
        ));
    }
    if let Ok(cwd) = std::env::current_dir() {
        if let Ok(canonical) = path.canonicalize() {
            if canonical == cwd {
                return Err(crate::error::WorkerError::config_error(
                    "DATA_DIR must not be the worker's current working directory",
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_filesystem_root() {
        assert!(reject_unsafe_data_dir("/").is_err());
    }

    #[test]
    fn accepts_ordinary_path() {
        assert!(reject_unsafe_data_dir("/data/mediasearch").is_ok());
    }
}
