// src/ports/events.rs

//! Append-only event sink.
//!
//! Every engine decision is recorded as one JSON object per line:
//! `{"type": ..., "ts": ..., "run_id": ..., "task_id"?: ..., ...payload}`.
//! Production uses [`JsonlEventLog`]; tests use an in-memory sink from the
//! test-utils crate.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::warn;

/// Sink for orchestrator events.
///
/// `log` must not fail the caller: event loss is logged and swallowed so an
/// unwritable log never aborts a run mid-batch.
pub trait EventSink: Send + Sync {
    fn log(&self, event_type: &str, task_id: Option<&str>, payload: Value);
    fn close(&self);
}

/// JSON-lines file sink (`orchestrator.jsonl`).
pub struct JsonlEventLog {
    run_id: String,
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl JsonlEventLog {
    pub fn open(path: impl Into<PathBuf>, run_id: impl Into<String>) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            run_id: run_id.into(),
            path,
            writer: Mutex::new(Some(BufWriter::new(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSink for JsonlEventLog {
    fn log(&self, event_type: &str, task_id: Option<&str>, payload: Value) {
        let mut event = json!({
            "type": event_type,
            "ts": Utc::now().to_rfc3339(),
            "run_id": self.run_id,
        });

        if let Some(id) = task_id {
            event["task_id"] = Value::String(id.to_string());
        }
        if let (Value::Object(obj), Value::Object(extra)) = (&mut event, payload) {
            for (key, value) in extra {
                obj.insert(key, value);
            }
        }

        let mut guard = self.writer.lock().unwrap();
        if let Some(writer) = guard.as_mut() {
            let line = event.to_string();
            if writeln!(writer, "{line}").and_then(|_| writer.flush()).is_err() {
                warn!(event = %event_type, "failed to append event to log");
            }
        }
    }

    fn close(&self) {
        let mut guard = self.writer.lock().unwrap();
        if let Some(mut writer) = guard.take() {
            let _ = writer.flush();
        }
    }
}

impl Drop for JsonlEventLog {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_appended_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orchestrator.jsonl");
        let log = JsonlEventLog::open(&path, "run-1").unwrap();

        log.log("run.start", None, json!({"project": "demo"}));
        log.log("task.complete", Some("t1"), json!({}));
        log.close();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["type"], "run.start");
        assert_eq!(first["run_id"], "run-1");
        assert_eq!(first["project"], "demo");

        let second: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["task_id"], "t1");
    }
}
