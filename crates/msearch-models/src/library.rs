use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::ScanStatus;

/// A root directory tree that assets are discovered under. `slug` is the
/// primary key and doubles as the on-disk shard prefix in the media store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Library {
    pub slug: String,
    pub name: String,
    pub absolute_path: String,
    pub is_active: bool,
    pub scan_status: String,
    pub target_tagger_id: Option<i32>,
    pub sampling_limit: i32,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Library {
    pub fn scan_status(&self) -> ScanStatus {
        self.scan_status.parse().unwrap_or(ScanStatus::Idle)
    }

    pub fn is_trashed(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Fields accepted when registering a new library; everything else takes a
/// server-assigned default.
#[derive(Debug, Clone, Deserialize)]
pub struct NewLibrary {
    pub name: String,
    pub absolute_path: String,
    pub sampling_limit: Option<i32>,
    pub target_tagger_id: Option<i32>,
}
