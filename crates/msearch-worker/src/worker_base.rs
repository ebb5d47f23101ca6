//! Shared worker lifecycle: registration, heartbeat, command polling,
//! graceful shutdown. Every role (scanner, proxy worker, AI worker,
//! maintenance, search API) drives its loop through [`run`].

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use msearch_db::WorkerRepository;
use msearch_models::{WorkerCommand, WorkerState};
use tracing::error;

use crate::flight_log::FlightRecorder;

/// One unit of role-specific work, plumbed through the shared run loop.
#[async_trait]
pub trait WorkerRunner: Send + Sync {
    /// Do one unit of work. Returns `true` if something was actually
    /// processed (so the loop can skip its idle backoff), `false` if there
    /// was nothing to do.
    async fn process_task(&self) -> bool;

    /// Optional stats blob attached to the next heartbeat.
    async fn heartbeat_stats(&self) -> Option<serde_json::Value> {
        None
    }
}

/// Shared state every worker role registers under and polls commands
/// through. Cheap to clone — everything behind it is an `Arc`.
#[derive(Clone)]
pub struct WorkerBase {
    pub worker_id: String,
    repo: Arc<WorkerRepository>,
    heartbeat_interval: Duration,
    should_exit: Arc<AtomicBool>,
    state: Arc<std::sync::Mutex<WorkerState>>,
    flight_recorder: Arc<FlightRecorder>,
}

impl WorkerBase {
    pub fn new(worker_id: impl Into<String>, repo: Arc<WorkerRepository>, heartbeat_interval: Duration) -> Self {
        let worker_id = worker_id.into();
        Self {
            flight_recorder: Arc::new(FlightRecorder::new(worker_id.clone())),
            worker_id,
            repo,
            heartbeat_interval,
            should_exit: Arc::new(AtomicBool::new(false)),
            state: Arc::new(std::sync::Mutex::new(WorkerState::Idle)),
        }
    }

    pub fn flight_recorder(&self) -> &Arc<FlightRecorder> {
        &self.flight_recorder
    }

    pub fn should_exit(&self) -> bool {
        self.should_exit.load(Ordering::SeqCst)
    }

    fn set_in_memory_state(&self, state: WorkerState) {
        *self.state.lock().expect("worker state mutex poisoned") = state;
    }

    async fn set_state(&self, state: WorkerState) {
        self.set_in_memory_state(state);
        if let Err(err) = self.repo.set_state(&self.worker_id, state).await {
            error!(worker_id = %self.worker_id, error = %err, "failed to persist worker state");
        }
    }

    fn is_paused(&self) -> bool {
        *self.state.lock().expect("worker state mutex poisoned") == WorkerState::Paused
    }

    fn request_shutdown(&self) {
        self.should_exit.store(true, Ordering::SeqCst);
    }

    async fn handle_command(&self, command: WorkerCommand, forensics_dir: Option<&Path>) {
        match command {
            WorkerCommand::Pause => self.set_state(WorkerState::Paused).await,
            WorkerCommand::Resume => self.set_state(WorkerState::Idle).await,
            WorkerCommand::Shutdown => {
                self.request_shutdown();
                self.set_state(WorkerState::Offline).await;
            }
            WorkerCommand::ForensicDump => match self.flight_recorder.dump_forensics(forensics_dir) {
                Ok(path) => self.flight_recorder.append(
                    "info",
                    format!("forensic dump written to {}", path.display()),
                    Default::default(),
                ),
                Err(err) => error!(worker_id = %self.worker_id, error = %err, "forensic dump failed"),
            },
            WorkerCommand::None => {}
        }
    }

    fn install_signal_handlers(&self) {
        let should_exit = self.should_exit.clone();
        tokio::spawn(async move {
            let ctrl_c = tokio::signal::ctrl_c();
            #[cfg(unix)]
            {
                let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(s) => s,
                    Err(_) => return,
                };
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                let _ = ctrl_c.await;
            }
            should_exit.store(true, Ordering::SeqCst);
        });
    }

    fn spawn_heartbeat(&self, runner: Arc<dyn WorkerRunner>) -> tokio::task::JoinHandle<()> {
        let repo = self.repo.clone();
        let worker_id = self.worker_id.clone();
        let interval = self.heartbeat_interval;
        let should_exit = self.should_exit.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if should_exit.load(Ordering::SeqCst) {
                    break;
                }
                let stats = runner.heartbeat_stats().await;
                if let Err(err) = repo.update_heartbeat(&worker_id, stats).await {
                    error!(worker_id = %worker_id, error = %err, "heartbeat failed");
                }
            }
        })
    }

    /// Register, spawn the heartbeat sidecar, then loop:
    /// poll command -> handle it -> break if shutting down -> sleep if
    /// paused, otherwise `process_task()`. Always leaves the worker marked
    /// `offline` on the way out, however the loop ended.
    pub async fn run(self, runner: Arc<dyn WorkerRunner>, forensics_dir: Option<&Path>) {
        self.install_signal_handlers();
        if let Err(err) = self.repo.register_worker(&self.worker_id, WorkerState::Idle).await {
            error!(worker_id = %self.worker_id, error = %err, "worker registration failed");
        }
        self.set_in_memory_state(WorkerState::Idle);

        let heartbeat = self.spawn_heartbeat(runner.clone());

        loop {
            match self.repo.get_command(&self.worker_id).await {
                Ok(command) if command != WorkerCommand::None => {
                    self.handle_command(command, forensics_dir).await;
                    if let Err(err) = self.repo.clear_command(&self.worker_id).await {
                        error!(worker_id = %self.worker_id, error = %err, "failed to clear worker command");
                    }
                }
                Ok(_) => {}
                Err(err) => error!(worker_id = %self.worker_id, error = %err, "failed to poll worker command"),
            }

            if self.should_exit() {
                break;
            }

            if self.is_paused() {
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }

            runner.process_task().await;
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        self.should_exit.store(true, Ordering::SeqCst);
        self.set_state(WorkerState::Offline).await;
        let _ = tokio::time::timeout(Duration::from_secs(2), heartbeat).await;
    }
}
