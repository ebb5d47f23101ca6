//! Preflight check run before a worker process joins the fleet: confirms
//! `ffmpeg` is on `PATH`, `MEDIA_SEARCH_DATA_DIR` is writable, and the database is
//! reachable, so a misconfigured deployment fails fast instead of leasing
//! an asset it can never finish.

use std::path::Path;
use std::process::Command;

use msearch_db::DbConfig;
use msearch_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env()?;

    println!("worker-selfcheck: starting with data_dir={}", config.data_dir);
    ensure_data_dir_writable(&config.data_dir).await?;
    ensure_ffmpeg()?;
    ensure_database_reachable().await?;

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_data_dir_writable<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path).await?;
    let probe = path.join(".selfcheck");
    tokio::fs::write(&probe, b"ok").await?;
    tokio::fs::remove_file(&probe).await?;
    Ok(())
}

fn ensure_ffmpeg() -> anyhow::Result<()> {
    let output = Command::new("ffmpeg")
        .arg("-version")
        .output()
        .map_err(|e| anyhow::anyhow!("ffmpeg not available: {}", e))?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("ffmpeg -version failed: {:?}", output.status));
    }
    Ok(())
}

async fn ensure_database_reachable() -> anyhow::Result<()> {
    let config = DbConfig::from_env();
    msearch_db::connect(&config)
        .await
        .map_err(|e| anyhow::anyhow!("database connection failed: {}", e))?;
    Ok(())
}
