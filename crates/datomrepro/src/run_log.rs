use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::error::ReproError;
use crate::jsonl::append_jsonl_line;
use crate::models::RunLogEntry;

/// Append-only JSONL record of tester operations. Writes are best-effort.
#[derive(Debug, Clone, Default)]
pub struct RunLog {
    path: Option<PathBuf>,
}

impl RunLog {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn new_run_id() -> String {
        Uuid::new_v4().to_string()
    }

    fn try_append(&self, entry: &RunLogEntry) {
        let Some(path) = self.path.as_deref() else {
            return;
        };
        if let Err(err) = append_jsonl_line(path, entry) {
            warn!(path = %path.display(), error = %err, "run log append failed");
        }
    }

    pub fn record_status(
        &self,
        run_id: &str,
        operation: &str,
        status: &str,
        size: Option<u64>,
        started: Instant,
        details: Option<serde_json::Value>,
    ) {
        self.try_append(&RunLogEntry {
            run_id: run_id.to_string(),
            operation: operation.to_string(),
            status: status.to_string(),
            latency_ms: started.elapsed().as_millis(),
            created_at: Utc::now().to_rfc3339(),
            size,
            trace_id: None,
            error_code: None,
            error_message: None,
            details,
        });
    }

    pub fn record_error(
        &self,
        run_id: &str,
        operation: &str,
        size: Option<u64>,
        started: Instant,
        err: &ReproError,
    ) {
        let payload = err.to_payload(operation, size);
        self.try_append(&RunLogEntry {
            run_id: run_id.to_string(),
            operation: operation.to_string(),
            status: "error".to_string(),
            latency_ms: started.elapsed().as_millis(),
            created_at: Utc::now().to_rfc3339(),
            size,
            trace_id: Some(payload.trace_id),
            error_code: Some(payload.code),
            error_message: Some(payload.message),
            details: None,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_entries(path: &Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .expect("read run log")
            .lines()
            .map(|line| serde_json::from_str(line).expect("parse entry"))
            .collect()
    }

    #[test]
    fn status_and_error_entries_are_appended_in_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("runs.jsonl");
        let log = RunLog::new(Some(path.clone()));
        let run_id = RunLog::new_run_id();

        log.record_status(
            &run_id,
            "test_size",
            "clean",
            Some(4),
            Instant::now(),
            Some(serde_json::json!({"error1": false})),
        );
        log.record_error(
            &run_id,
            "test_size",
            Some(5),
            Instant::now(),
            &ReproError::Setup("schema transact: disk full".to_string()),
        );

        let entries = read_entries(&path);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["status"], "clean");
        assert_eq!(entries[0]["size"], 4);
        assert!(entries[0].get("error_code").is_none());
        assert_eq!(entries[1]["status"], "error");
        assert_eq!(entries[1]["error_code"], "SETUP_FAILED");
        assert_eq!(entries[1]["run_id"], run_id.as_str());
    }

    #[test]
    fn disabled_log_writes_nothing() {
        let log = RunLog::default();
        assert!(log.path().is_none());
        log.record_status("r", "test_size", "clean", None, Instant::now(), None);
    }
}
