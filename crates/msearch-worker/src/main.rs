//! Media-search worker binary. `WORKER_ROLE` (see [`WorkerConfig`]) selects
//! which of the pipeline stages this process runs; `all-in-one` runs every
//! stage concurrently in a single process, for small deployments.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use msearch_db::{
    AIModelRepository, AssetRepository, DbConfig, LibraryRepository, SceneRepository,
    SearchRepository, SystemMetadataRepository, WorkerRepository,
};
use msearch_media::MediaStore;
use msearch_vision::{HttpVisionCapability, MockVisionCapability, VisionCapability};
use msearch_worker::{
    AiMode, ImageAiWorker, ImageProxyWorker, MaintenanceService, Scanner, SearchAppState, VideoAiWorker,
    VideoProxyWorker, WorkerBase, WorkerConfig, WorkerRunner,
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Shared handles every role wires into its own runner(s).
#[derive(Clone)]
struct Ctx {
    config: Arc<WorkerConfig>,
    asset_repo: Arc<AssetRepository>,
    library_repo: Arc<LibraryRepository>,
    scene_repo: Arc<SceneRepository>,
    worker_repo: Arc<WorkerRepository>,
    model_repo: Arc<AIModelRepository>,
    search_repo: Arc<SearchRepository>,
    store: Arc<MediaStore>,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive("msearch=info".parse().unwrap()))
        .init();

    let config = match WorkerConfig::from_env() {
        Ok(c) => c,
        Err(err) => {
            tracing::error!(error = %err, "invalid worker configuration");
            std::process::exit(1);
        }
    };
    tracing::info!(role = %config.role, worker_id = %config.worker_id, "starting msearch-worker");

    let db_config = DbConfig::from_env();
    let pool = match msearch_db::connect(&db_config).await {
        Ok(p) => p,
        Err(err) => {
            tracing::error!(error = %err, "database connection failed");
            std::process::exit(1);
        }
    };

    let system_metadata_repo = SystemMetadataRepository::new(pool.clone());
    match system_metadata_repo.schema_version().await {
        Ok(Some(version)) if version == msearch_models::CURRENT_SCHEMA_VERSION => {}
        Ok(Some(version)) => {
            tracing::error!(
                found = %version,
                expected = %msearch_models::CURRENT_SCHEMA_VERSION,
                "schema_version mismatch; refusing to start"
            );
            std::process::exit(1);
        }
        Ok(None) => {
            tracing::error!("system_metadata.schema_version is missing; refusing to start");
            std::process::exit(1);
        }
        Err(err) => {
            tracing::error!(error = %err, "failed to read schema_version");
            std::process::exit(1);
        }
    }

    let ctx = Ctx {
        asset_repo: Arc::new(AssetRepository::new(pool.clone())),
        library_repo: Arc::new(LibraryRepository::new(pool.clone())),
        scene_repo: Arc::new(SceneRepository::new(pool.clone())),
        worker_repo: Arc::new(WorkerRepository::new(pool.clone())),
        model_repo: Arc::new(AIModelRepository::new(pool.clone())),
        search_repo: Arc::new(SearchRepository::new(pool.clone())),
        store: Arc::new(MediaStore::new(config.data_dir.clone())),
        config: Arc::new(config),
    };

    let role = ctx.config.role.clone();
    match role.as_str() {
        "scanner" => {
            let worker_id = ctx_worker_id(&ctx, "scanner");
            run_scanner(ctx, worker_id).await;
        }
        "image-proxy" => {
            let worker_id = ctx_worker_id(&ctx, "image-proxy");
            run_image_proxy(ctx, worker_id).await;
        }
        "video-proxy" => {
            let worker_id = ctx_worker_id(&ctx, "video-proxy");
            run_video_proxy(ctx, worker_id).await;
        }
        "ai-light" => run_ai_pair(ctx, AiMode::Light, "ai-light").await,
        "ai-full" => run_ai_pair(ctx, AiMode::Full, "ai-full").await,
        "maintenance" => {
            let worker_id = ctx_worker_id(&ctx, "maintenance");
            run_maintenance(ctx, worker_id).await;
        }
        "search-api" => run_search_api(ctx).await,
        "all-in-one" => {
            tokio::join!(
                run_scanner(ctx.clone(), ctx_worker_id(&ctx, "scanner")),
                run_image_proxy(ctx.clone(), ctx_worker_id(&ctx, "image-proxy")),
                run_video_proxy(ctx.clone(), ctx_worker_id(&ctx, "video-proxy")),
                run_ai_pair(ctx.clone(), AiMode::Light, "ai-light"),
                run_ai_pair(ctx.clone(), AiMode::Full, "ai-full"),
                run_maintenance(ctx.clone(), ctx_worker_id(&ctx, "maintenance")),
                run_search_api(ctx.clone()),
            );
        }
        other => {
            tracing::error!(role = %other, "unknown WORKER_ROLE");
            std::process::exit(1);
        }
    }
}

fn ctx_worker_id(ctx: &Ctx, suffix: &str) -> String {
    format!("{}-{suffix}", ctx.config.worker_id)
}

async fn run_scanner(ctx: Ctx, worker_id: String) {
    let base = WorkerBase::new(worker_id, ctx.worker_repo.clone(), ctx.config.heartbeat_interval);
    let exit_check = base.clone();
    let scanner = Scanner::new(
        ctx.asset_repo.clone(),
        ctx.library_repo.clone(),
        ctx.config.library_slug.clone(),
        Arc::new(move || exit_check.should_exit()),
    );
    base.run(Arc::new(scanner), None).await;
}

async fn run_image_proxy(ctx: Ctx, worker_id: String) {
    let base = WorkerBase::new(worker_id.clone(), ctx.worker_repo.clone(), ctx.config.heartbeat_interval);
    let runner = ImageProxyWorker::new(
        worker_id,
        ctx.asset_repo.clone(),
        ctx.store.clone(),
        ctx.config.library_slug.clone(),
        ctx.config.lease_seconds,
    );
    base.run(Arc::new(runner), None).await;
}

async fn run_video_proxy(ctx: Ctx, worker_id: String) {
    let base = WorkerBase::new(worker_id.clone(), ctx.worker_repo.clone(), ctx.config.heartbeat_interval);
    let runner = VideoProxyWorker::new(
        worker_id,
        ctx.asset_repo.clone(),
        ctx.scene_repo.clone(),
        ctx.store.clone(),
        ctx.config.library_slug.clone(),
        ctx.config.lease_seconds,
    );
    base.run(Arc::new(runner), None).await;
}

/// Runs the image- and video-AI workers for one mode (light or full)
/// concurrently under their own worker-status rows, mirroring how
/// `ai_worker.py` dispatches by media type within a single mode pass.
async fn run_ai_pair(ctx: Ctx, mode: AiMode, role_suffix: &str) {
    let (vision, model_id) = build_vision(&ctx).await;
    let system_default_model_id = Some(model_id);

    let image_worker_id = ctx_worker_id(&ctx, &format!("{role_suffix}-image"));
    let image_base = WorkerBase::new(image_worker_id.clone(), ctx.worker_repo.clone(), ctx.config.heartbeat_interval);
    let image_runner = ImageAiWorker::new(
        image_worker_id,
        ctx.asset_repo.clone(),
        ctx.store.clone(),
        vision.clone(),
        model_id,
        mode,
        ctx.config.library_slug.clone(),
        system_default_model_id,
        ctx.config.ai_batch_size,
        ctx.config.lease_seconds,
    );

    let video_worker_id = ctx_worker_id(&ctx, &format!("{role_suffix}-video"));
    let video_base = WorkerBase::new(video_worker_id.clone(), ctx.worker_repo.clone(), ctx.config.heartbeat_interval);
    let video_runner = VideoAiWorker::new(
        video_worker_id,
        ctx.asset_repo.clone(),
        ctx.scene_repo.clone(),
        ctx.store.clone(),
        vision,
        model_id,
        mode,
        ctx.config.library_slug.clone(),
        ctx.config.lease_seconds,
    );

    tokio::join!(
        image_base.run(Arc::new(image_runner), None),
        video_base.run(Arc::new(video_runner), None),
    );
}

async fn build_vision(ctx: &Ctx) -> (Arc<dyn VisionCapability>, i32) {
    let model_name = std::env::var("VISION_MODEL_NAME").unwrap_or_else(|_| "default-vision-model".to_string());
    let model_version = std::env::var("VISION_MODEL_VERSION").unwrap_or_else(|_| "v1".to_string());
    let model_id = match ctx.model_repo.get_or_create(&model_name, &model_version).await {
        Ok(id) => id,
        Err(err) => {
            tracing::error!(error = %err, "failed to register vision model, defaulting to id 0");
            0
        }
    };
    let vision: Arc<dyn VisionCapability> = match std::env::var("VISION_HTTP_ENDPOINT") {
        Ok(endpoint) => Arc::new(HttpVisionCapability::new(endpoint, model_name, model_version)),
        Err(_) => {
            tracing::warn!("VISION_HTTP_ENDPOINT not set, falling back to MockVisionCapability");
            Arc::new(MockVisionCapability::new())
        }
    };
    (vision, model_id)
}

/// Adapts [`MaintenanceService`]'s tick-based API (several independently
/// scheduled tasks, not one claim-and-process unit) to [`WorkerRunner`] so
/// the maintenance role still gets registration, heartbeat, and command
/// handling for free like every other role.
struct MaintenanceRunner {
    service: MaintenanceService,
    library_slug: Option<String>,
    temp_max_age_seconds: i64,
    stale_worker_max_age_hours: i64,
    data_dir_min_age_seconds: i64,
    tick: AtomicU64,
}

/// Number of `run_all` ticks (roughly one a minute) between the heavier
/// data-dir orphan sweep and missing-source reap passes.
const HEAVY_SWEEP_EVERY_N_TICKS: u64 = 60;

#[async_trait]
impl WorkerRunner for MaintenanceRunner {
    async fn process_task(&self) -> bool {
        if let Err(err) = self
            .service
            .run_all(self.library_slug.as_deref(), self.temp_max_age_seconds, self.stale_worker_max_age_hours)
            .await
        {
            tracing::error!(error = %err, "maintenance run_all failed");
        }

        if self.tick.fetch_add(1, Ordering::SeqCst) % HEAVY_SWEEP_EVERY_N_TICKS == 0 {
            if let Err(err) = self.service.cleanup_data_dir(self.data_dir_min_age_seconds, false).await {
                tracing::error!(error = %err, "data dir cleanup failed");
            }
            if let Err(err) = self.service.reap_missing_source_files(false).await {
                tracing::error!(error = %err, "missing-source reap failed");
            }
        }

        tokio::time::sleep(Duration::from_secs(60)).await;
        true
    }
}

async fn run_maintenance(ctx: Ctx, worker_id: String) {
    let base = WorkerBase::new(worker_id, ctx.worker_repo.clone(), ctx.config.heartbeat_interval);
    let hostname = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_string());
    let service = MaintenanceService::new(
        ctx.asset_repo.clone(),
        ctx.library_repo.clone(),
        ctx.scene_repo.clone(),
        ctx.worker_repo.clone(),
        ctx.store.clone(),
        hostname,
    );
    let runner = MaintenanceRunner {
        service,
        library_slug: ctx.config.library_slug.clone(),
        temp_max_age_seconds: ctx.config.temp_max_age_seconds,
        stale_worker_max_age_hours: ctx.config.stale_worker_max_age_hours,
        data_dir_min_age_seconds: ctx.config.data_dir_cleanup_min_age_seconds,
        tick: AtomicU64::new(0),
    };
    base.run(Arc::new(runner), None).await;
}

async fn run_search_api(ctx: Ctx) {
    let state = SearchAppState {
        search_repo: ctx.search_repo.clone(),
        asset_repo: ctx.asset_repo.clone(),
        library_repo: ctx.library_repo.clone(),
        store: ctx.store.clone(),
    };
    let app = msearch_worker::create_search_router(state);
    let listener = match tokio::net::TcpListener::bind(&ctx.config.http_bind_addr).await {
        Ok(l) => l,
        Err(err) => {
            tracing::error!(error = %err, addr = %ctx.config.http_bind_addr, "failed to bind search API");
            std::process::exit(1);
        }
    };
    tracing::info!(addr = %ctx.config.http_bind_addr, "search API listening");
    if let Err(err) = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await {
        tracing::error!(error = %err, "search API server error");
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.expect("failed to install CTRL+C handler");
    tracing::info!("search API received shutdown signal");
}
