//! Status telemetry: one record per LLM-driven step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// One telemetry record for an LLM-driven step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRecord {
    /// Record timestamp
    pub time: DateTime<Utc>,
    /// Question instance identifier
    pub question_id: String,
    /// Step label (e.g. "Exploration Stage", "Initial SQL Generation Stage")
    pub step: String,
    /// Whether the step ran inside a repair loop
    pub in_repair: bool,
    /// Prompt token count for the call
    pub input_tokens: u64,
    /// Completion token count for the call
    pub output_tokens: u64,
    /// The parsed structured status, when one exists
    pub status: Option<Value>,
}

impl StatusRecord {
    /// Create a record timestamped now.
    pub fn new(
        question_id: impl Into<String>,
        step: impl Into<String>,
        in_repair: bool,
        input_tokens: u64,
        output_tokens: u64,
        status: Option<Value>,
    ) -> Self {
        Self {
            time: Utc::now(),
            question_id: question_id.into(),
            step: step.into(),
            in_repair,
            input_tokens,
            output_tokens,
            status,
        }
    }
}

/// Sink for status records.
pub trait StatusSink: Send + Sync {
    /// Record one step. Telemetry failures must never fail the workflow.
    fn log(&self, record: StatusRecord);
}

/// JSON Lines file sink, one record per line.
pub struct JsonlStatusSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlStatusSink {
    /// Create a sink writing to the given file, creating parent
    /// directories as needed.
    pub fn create(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }
}

impl StatusSink for JsonlStatusSink {
    fn log(&self, record: StatusRecord) {
        let Ok(line) = serde_json::to_string(&record) else {
            warn!("failed to serialize status record");
            return;
        };
        let _guard = self.lock.lock().expect("status sink lock poisoned");
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| writeln!(f, "{line}"));
        if let Err(e) = result {
            warn!(path = %self.path.display(), error = %e, "failed to write status record");
        }
    }
}

/// In-memory sink for inspection and tests.
#[derive(Default)]
pub struct MemoryStatusSink {
    records: Mutex<Vec<StatusRecord>>,
}

impl MemoryStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the recorded entries.
    pub fn records(&self) -> Vec<StatusRecord> {
        self.records.lock().expect("sink lock poisoned").clone()
    }
}

impl StatusSink for MemoryStatusSink {
    fn log(&self, record: StatusRecord) {
        self.records.lock().expect("sink lock poisoned").push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_jsonl_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("status.jsonl");
        let sink = JsonlStatusSink::create(&path).unwrap();

        sink.log(StatusRecord::new("q1", "Exploration Stage", false, 10, 20, None));
        sink.log(StatusRecord::new(
            "q1",
            "Exploration Stage Repair Stage",
            true,
            5,
            7,
            Some(serde_json::json!({"triggering_error": "no such table"})),
        ));

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: StatusRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.question_id, "q1");
        assert!(!first.in_repair);

        let second: StatusRecord = serde_json::from_str(lines[1]).unwrap();
        assert!(second.in_repair);
        assert!(second.status.is_some());
    }

    #[test]
    fn test_memory_sink() {
        let sink = MemoryStatusSink::new();
        sink.log(StatusRecord::new("q2", "step", false, 1, 2, None));
        assert_eq!(sink.records().len(), 1);
        assert_eq!(sink.records()[0].step, "step");
    }
}
