//! Execution records and the observers that receive them.
//!
//! Every `execute` call yields one [`ExecutionRecord`]. An executor built with
//! an [`ExecutionObserver`] hands each record to it after the call resolves,
//! which is how an agent loop keeps its trajectory of code steps.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Terminal state of one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Completed,
    /// The script raised; `kind` is e.g. `ValueError` or `PolicyViolation`.
    Faulted { kind: String },
    TimedOut { timeout_ms: u64 },
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Completed)
    }
}

impl std::fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionOutcome::Completed => write!(f, "completed"),
            ExecutionOutcome::Faulted { kind } => write!(f, "faulted({kind})"),
            ExecutionOutcome::TimedOut { timeout_ms } => write!(f, "timed_out({timeout_ms}ms)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub trace_id: String,
    pub code: String,
    /// Hex SHA-256 of `code`.
    pub code_digest: String,
    pub output: String,
    pub outcome: ExecutionOutcome,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ExecutionRecord {
    /// A record for `code` whose output and outcome are filled in later.
    pub fn begin(trace_id: impl Into<String>, code: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            id: Uuid::new_v4(),
            trace_id: trace_id.into(),
            code_digest: code_digest(&code),
            code,
            output: String::new(),
            outcome: ExecutionOutcome::Completed,
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }
}

/// Hex-encoded SHA-256 of a code string.
pub fn code_digest(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}

/// Receives each finished execution.
#[async_trait]
pub trait ExecutionObserver: Send + Sync {
    async fn on_execution(&self, record: &ExecutionRecord);
}

/// Observer that keeps every record in memory, in completion order.
#[derive(Debug, Default)]
pub struct TrajectoryLog {
    records: Mutex<Vec<ExecutionRecord>>,
}

impl TrajectoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ExecutionRecord> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Records as newline-delimited JSON.
    pub fn to_jsonl(&self) -> serde_json::Result<String> {
        let mut out = String::new();
        for record in self.lock().iter() {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        Ok(out)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ExecutionRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ExecutionObserver for TrajectoryLog {
    async fn on_execution(&self, record: &ExecutionRecord) {
        self.lock().push(record.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_sha256_hex() {
        assert_eq!(
            code_digest(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(code_digest("print(1)").len(), 64);
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let json = serde_json::to_string(&ExecutionOutcome::Faulted {
            kind: "ValueError".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"status":"faulted","kind":"ValueError"}"#);
        let json = serde_json::to_string(&ExecutionOutcome::Completed).unwrap();
        assert_eq!(json, r#"{"status":"completed"}"#);
    }

    #[test]
    fn outcome_display() {
        assert_eq!(ExecutionOutcome::Completed.to_string(), "completed");
        assert_eq!(
            ExecutionOutcome::TimedOut { timeout_ms: 200 }.to_string(),
            "timed_out(200ms)"
        );
    }

    #[tokio::test]
    async fn trajectory_log_keeps_order() {
        let log = TrajectoryLog::new();
        let first = ExecutionRecord::begin("t", "a = 1");
        let second = ExecutionRecord::begin("t", "print(a)");
        log.on_execution(&first).await;
        log.on_execution(&second).await;
        let records = log.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].code, "a = 1");
        assert_eq!(records[1].id, second.id);
        assert_eq!(log.to_jsonl().unwrap().lines().count(), 2);
    }
}
