//! In-memory flight recorder: a bounded ring buffer of recent log entries,
//! dumped to disk on a `forensic_dump` worker command or an unhandled panic
//! so a post-mortem doesn't depend on whatever got scrolled off stdout.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde_json::{Map, Value};

pub const FLIGHT_LOG_CAPACITY: usize = 50_000;
const DEFAULT_FORENSICS_DIR: &str = "/logs/forensics";

#[derive(Debug, Clone, serde::Serialize)]
struct Entry {
    ts: String,
    level: String,
    message: String,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// Thread-safe ring buffer; cheap to clone a handle (it's an `Arc` in
/// spirit — callers are expected to hold this behind their own `Arc`).
pub struct FlightRecorder {
    worker_id: String,
    buffer: Mutex<VecDeque<Entry>>,
    capacity: usize,
}

impl FlightRecorder {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self::with_capacity(worker_id, FLIGHT_LOG_CAPACITY)
    }

    pub fn with_capacity(worker_id: impl Into<String>, capacity: usize) -> Self {
        Self {
            worker_id: worker_id.into(),
            buffer: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    pub fn append(&self, level: &str, message: impl Into<String>, extra: Map<String, Value>) {
        let entry = Entry {
            ts: format!("{}Z", Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)),
            level: level.to_string(),
            message: message.into(),
            extra,
        };
        let mut buffer = self.buffer.lock().expect("flight log mutex poisoned");
        if buffer.len() == self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().expect("flight log mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the whole buffer, one line per entry, to
    /// `{base_dir or /logs/forensics}/{worker_id}_{timestamp}.log`. Returns
    /// the path written.
    pub fn dump_forensics(&self, base_dir: Option<&Path>) -> std::io::Result<PathBuf> {
        let base_dir = base_dir.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(DEFAULT_FORENSICS_DIR));
        std::fs::create_dir_all(&base_dir)?;
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let filepath = base_dir.join(format!("{}_{}.log", self.worker_id, timestamp));

        let mut out = String::new();
        let buffer = self.buffer.lock().expect("flight log mutex poisoned");
        for entry in buffer.iter() {
            out.push_str(&entry.ts);
            out.push_str(" [");
            out.push_str(&entry.level);
            out.push_str("] ");
            out.push_str(&entry.message);
            if !entry.extra.is_empty() {
                out.push(' ');
                out.push_str(&Value::Object(entry.extra.clone()).to_string());
            }
            out.push('\n');
        }
        drop(buffer);
        std::fs::write(&filepath, out)?;
        Ok(filepath)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_entry_past_capacity() {
        let recorder = FlightRecorder::with_capacity("w1", 3);
        for i in 0..5 {
            recorder.append("info", format!("entry {i}"), Map::new());
        }
        assert_eq!(recorder.len(), 3);
    }

    #[test]
    fn dump_forensics_writes_one_line_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = FlightRecorder::new("w1");
        recorder.append("info", "hello", Map::new());
        let mut extra = Map::new();
        extra.insert("asset_id".to_string(), Value::from(7));
        recorder.append("error", "boom", extra);

        let path = recorder.dump_forensics(Some(dir.path())).unwrap();
        let contents = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("[info] hello"));
        assert!(lines[1].contains("[error] boom"));
        assert!(lines[1].contains("asset_id"));
    }
}
