#![deny(unreachable_patterns)]
//! Media-search worker: library scanning, image/video proxy generation,
//! video scene segmentation, vision-model analysis, maintenance sweeps, and
//! the search/library-listing HTTP surface. One binary, many roles — see
//! `config::WorkerConfig` for the role list `main.rs` dispatches on.

pub mod ai_worker;
pub mod config;
pub mod error;
pub mod flight_log;
pub mod image_proxy_worker;
pub mod logging;
pub mod maintenance_service;
pub mod scanner;
pub mod search_service;
pub mod semantic_dedup;
pub mod video_proxy_worker;
pub mod worker_base;

pub use ai_worker::{AiMode, ImageAiWorker, VideoAiWorker};
pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use flight_log::FlightRecorder;
pub use image_proxy_worker::ImageProxyWorker;
pub use logging::AssetLogger;
pub use maintenance_service::{MaintenanceService, SweepReport};
pub use scanner::Scanner;
pub use search_service::{create_router as create_search_router, AppState as SearchAppState};
pub use video_proxy_worker::VideoProxyWorker;
pub use worker_base::{WorkerBase, WorkerRunner};
