//! Status API types
//!
//! The JSON document served on `GET /status`, plus the startup sequencer
//! state it embeds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::process::{DefinitionSummary, ExecutionRecord, HealthProbeResult, ProcessRecord};

/// Progress of the phased startup sequencer
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SequencerState {
    #[default]
    Pending,
    Running { phase_index: usize, phase: String },
    Completed,
    Failed { phase_index: usize, phase: String, reason: String },
}

impl SequencerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SequencerState::Completed | SequencerState::Failed { .. })
    }
}

/// What the supervisor loop is currently doing with the workload
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorLifecycle {
    Starting,
    Running,
    Restarting,
    /// Workload exited cleanly and will not be restarted
    Exited,
    GaveUp,
    Stopping,
}

/// Single-word verdict for dashboards and uptime checkers
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Healthy,
    Degraded,
    Down,
    Failed,
}

/// Execution history as fetched for this report
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ExecutionsView {
    Available {
        records: Vec<ExecutionRecord>,
        stats: ExecutionStats,
    },
    Unavailable { reason: String },
}

/// Aggregates over the fetched execution rows
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct ExecutionStats {
    pub total_runs: usize,
    pub successful: usize,
    pub failed: usize,
    pub running: usize,
    /// Rows without a duration count as zero
    pub avg_duration_ms: f64,
}

/// Rollup of the staged definition summaries
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct DefinitionsSummary {
    pub total: usize,
    pub active: usize,
    pub missing: usize,
    pub total_nodes: usize,
    pub total_triggers: usize,
}

/// Health probe section of the status report
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct HealthView {
    pub consecutive_unreachable: usize,
    pub recent: Vec<HealthProbeResult>,
}

impl HealthView {
    pub fn latest(&self) -> Option<&HealthProbeResult> {
        self.recent.last()
    }
}

/// Consolidated status report returned by `GET /status`
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StatusSnapshot {
    pub generated_at: DateTime<Utc>,
    pub overall: OverallStatus,
    pub lifecycle: SupervisorLifecycle,
    pub uptime_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub give_up_reason: Option<String>,
    pub startup: SequencerState,
    pub process: Option<ProcessRecord>,
    pub previous_processes: Vec<ProcessRecord>,
    pub health: HealthView,
    pub definitions: Vec<DefinitionSummary>,
    pub definitions_summary: DefinitionsSummary,
    pub executions: ExecutionsView,
}

impl StatusSnapshot {
    /// Restart policy has given up on the workload
    pub fn gave_up(&self) -> bool {
        self.lifecycle == SupervisorLifecycle::GaveUp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_executions_are_explicit() {
        let view = ExecutionsView::Unavailable {
            reason: "connection refused".to_string(),
        };
        let json = serde_json::to_value(&view).unwrap();

        assert_eq!(json["state"], "unavailable");
        assert_eq!(json["reason"], "connection refused");
    }

    #[test]
    fn test_sequencer_state_serialization() {
        let state = SequencerState::Failed {
            phase_index: 3,
            phase: "start-workload".to_string(),
            reason: "spawn failed".to_string(),
        };
        let json = serde_json::to_value(&state).unwrap();

        assert_eq!(json["state"], "failed");
        assert_eq!(json["phase_index"], 3);
        assert!(state.is_terminal());
        assert!(!SequencerState::Pending.is_terminal());
    }
}
