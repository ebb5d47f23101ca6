use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::{WorkerCommand, WorkerState};

/// Heartbeat row for one running worker process. `worker_id` is a
/// process-unique string (typically `{role}-{hostname}-{pid}`), not a
/// database identity — the row is created on first heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WorkerStatus {
    pub worker_id: String,
    pub last_seen_at: DateTime<Utc>,
    pub state: String,
    pub command: String,
    pub stats: Option<serde_json::Value>,
}

impl WorkerStatus {
    pub fn state(&self) -> WorkerState {
        self.state.parse().unwrap_or(WorkerState::Offline)
    }

    pub fn command(&self) -> WorkerCommand {
        self.command.parse().unwrap_or(WorkerCommand::None)
    }
}

/// Opaque bag of per-worker counters reported alongside each heartbeat
/// (assets processed, current asset id, uptime). Not interpreted by the
/// database layer beyond storage as JSONB.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerStats {
    #[serde(default)]
    pub assets_processed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_asset_id: Option<i64>,
    #[serde(default)]
    pub role: String,
}
