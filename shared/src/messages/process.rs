//! Process lifecycle and health monitoring types
//!
//! Types describing the supervised workload: one record per lifetime of the
//! child process, the health probe results gathered against it, and the rows
//! read back from the external execution-history store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Process status for monitoring
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Running,
    Terminating,
    Exited,
    SpawnFailed,
}

/// One lifetime of the supervised child process
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ProcessRecord {
    pub id: Uuid,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub status: ProcessStatus,
    pub exit_code: Option<i32>,
    pub exit_signal: Option<i32>,
    pub exited_at: Option<DateTime<Utc>>,
    pub restart_count: u32,
    /// Known-error markers seen in this lifetime's output
    pub markers: Vec<String>,
    pub hung_detected: bool,
    pub spawn_error: Option<String>,
}

impl ProcessRecord {
    /// Record for a freshly spawned process
    pub fn started(id: Uuid, pid: Option<u32>, restart_count: u32) -> Self {
        Self {
            id,
            pid,
            started_at: Utc::now(),
            status: ProcessStatus::Running,
            exit_code: None,
            exit_signal: None,
            exited_at: None,
            restart_count,
            markers: Vec::new(),
            hung_detected: false,
            spawn_error: None,
        }
    }

    /// Record for a restart attempt whose spawn never succeeded
    pub fn spawn_failed(restart_count: u32, error: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            pid: None,
            started_at: now,
            status: ProcessStatus::SpawnFailed,
            exit_code: None,
            exit_signal: None,
            exited_at: Some(now),
            restart_count,
            markers: Vec::new(),
            hung_detected: false,
            spawn_error: Some(error.into()),
        }
    }

    /// Still alive from the supervisor's point of view (includes terminating)
    pub fn is_running(&self) -> bool {
        matches!(self.status, ProcessStatus::Running | ProcessStatus::Terminating)
    }

    /// Whether this lifetime ended (or will end) for a reason other than a clean exit
    pub fn unexpected_exit(&self) -> bool {
        self.hung_detected || !self.markers.is_empty() || self.spawn_error.is_some()
    }

    pub fn record_exit(&mut self, code: Option<i32>, signal: Option<i32>) {
        self.status = ProcessStatus::Exited;
        self.exit_code = code;
        self.exit_signal = signal;
        self.exited_at = Some(Utc::now());
    }
}

/// Classification of a single health probe
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HealthOutcome {
    Healthy,
    Degraded { reason: String },
    Unreachable { error: String },
}

impl HealthOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthOutcome::Healthy)
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, HealthOutcome::Unreachable { .. })
    }
}

/// Result of one probe against the workload's health endpoint
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct HealthProbeResult {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: HealthOutcome,
    pub latency_ms: u64,
}

impl HealthProbeResult {
    pub fn new(outcome: HealthOutcome, latency_ms: u64) -> Self {
        Self {
            timestamp: Utc::now(),
            outcome,
            latency_ms,
        }
    }
}

/// Row from the external execution-history table
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ExecutionRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(alias = "created_at")]
    pub timestamp: DateTime<Utc>,
}

/// Summary of one staged workflow definition file
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DefinitionSummary {
    pub name: String,
    pub exists: bool,
    pub active: bool,
    pub nodes: usize,
    pub triggers: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// Primary keys come back as integers or uuids depending on the table.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("unsupported id: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_outcome_wire_shape() {
        let result = HealthProbeResult::new(
            HealthOutcome::Degraded {
                reason: "HTTP 502".to_string(),
            },
            12,
        );
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["outcome"], "degraded");
        assert_eq!(json["reason"], "HTTP 502");
        assert_eq!(json["latency_ms"], 12);
    }

    #[test]
    fn test_execution_record_accepts_numeric_ids() {
        let row = serde_json::json!({
            "id": 42,
            "status": "success",
            "duration_ms": 1500,
            "created_at": "2024-05-01T10:00:00Z"
        });
        let record: ExecutionRecord = serde_json::from_value(row).unwrap();

        assert_eq!(record.id, "42");
        assert_eq!(record.duration_ms, Some(1500));
    }

    #[test]
    fn test_unexpected_exit_flags() {
        let mut record = ProcessRecord::started(Uuid::new_v4(), Some(10), 0);
        assert!(!record.unexpected_exit());

        record.markers.push("X-Forwarded-For".to_string());
        assert!(record.unexpected_exit());

        let failed = ProcessRecord::spawn_failed(1, "no such file");
        assert!(failed.unexpected_exit());
        assert!(!failed.is_running());
    }
}
