//! Status reporting
//!
//! Combines a view of the supervisor loop with the staged definitions and the
//! external execution history into one [`StatusSnapshot`]. Nothing is cached;
//! every report is built fresh.

use std::sync::Arc;

use chrono::Utc;
use shared::{
    DefinitionSummary, DefinitionsSummary, ExecutionRecord, ExecutionStats, ExecutionsView, OverallStatus,
    StatusSnapshot, SupervisorLifecycle,
};

use super::state::SupervisorView;
use crate::error::SupervisorResult;
use crate::supervisor::SupervisorHandle;
use crate::traits::{ExecutionHistory, FileStager, StagingPlan, StatusSource};

pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Single-word verdict derived from the loop view
pub fn overall_status(view: &SupervisorView) -> OverallStatus {
    let running = view.process.as_ref().map(|record| record.is_running()).unwrap_or(false);

    match view.lifecycle {
        SupervisorLifecycle::GaveUp => OverallStatus::Failed,
        SupervisorLifecycle::Starting | SupervisorLifecycle::Restarting => OverallStatus::Degraded,
        SupervisorLifecycle::Running if running => match view.health.latest() {
            None => OverallStatus::Healthy,
            Some(result) if result.outcome.is_healthy() => OverallStatus::Healthy,
            Some(_) => OverallStatus::Degraded,
        },
        SupervisorLifecycle::Running | SupervisorLifecycle::Exited | SupervisorLifecycle::Stopping => {
            OverallStatus::Down
        }
    }
}

/// Run counts by status and the mean duration over `records`
pub fn execution_stats(records: &[ExecutionRecord]) -> ExecutionStats {
    let count = |status: &str| records.iter().filter(|record| record.status == status).count();
    let total_duration: u64 = records.iter().filter_map(|record| record.duration_ms).sum();

    ExecutionStats {
        total_runs: records.len(),
        successful: count("success"),
        failed: count("failed"),
        running: count("running"),
        avg_duration_ms: if records.is_empty() {
            0.0
        } else {
            total_duration as f64 / records.len() as f64
        },
    }
}

pub fn summarize_definitions(definitions: &[DefinitionSummary]) -> DefinitionsSummary {
    DefinitionsSummary {
        total: definitions.len(),
        active: definitions.iter().filter(|d| d.active).count(),
        missing: definitions.iter().filter(|d| !d.exists).count(),
        total_nodes: definitions.iter().map(|d| d.nodes).sum(),
        total_triggers: definitions.iter().map(|d| d.triggers).sum(),
    }
}

pub fn compose_snapshot(
    view: SupervisorView,
    definitions: Vec<DefinitionSummary>,
    executions: SupervisorResult<Vec<ExecutionRecord>>,
) -> StatusSnapshot {
    let executions = match executions {
        Ok(records) => ExecutionsView::Available {
            stats: execution_stats(&records),
            records,
        },
        Err(e) => ExecutionsView::Unavailable { reason: e.to_string() },
    };

    StatusSnapshot {
        generated_at: Utc::now(),
        overall: overall_status(&view),
        lifecycle: view.lifecycle,
        uptime_seconds: view.uptime_seconds,
        give_up_reason: view.give_up_reason,
        startup: view.startup,
        process: view.process,
        previous_processes: view.previous_processes,
        health: view.health,
        definitions_summary: summarize_definitions(&definitions),
        definitions,
        executions,
    }
}

/// Builds status snapshots on demand for the HTTP layer
pub struct StatusReporter<H, S>
where
    H: ExecutionHistory + 'static,
    S: FileStager + 'static,
{
    handle: SupervisorHandle,
    history: Arc<H>,
    stager: Arc<S>,
    plan: StagingPlan,
    history_limit: usize,
}

impl<H, S> StatusReporter<H, S>
where
    H: ExecutionHistory + 'static,
    S: FileStager + 'static,
{
    pub fn new(handle: SupervisorHandle, history: Arc<H>, stager: Arc<S>, plan: StagingPlan) -> Self {
        Self {
            handle,
            history,
            stager,
            plan,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    /// Configure how many execution rows each report carries (fluent API)
    pub fn with_history_limit(mut self, history_limit: usize) -> Self {
        self.history_limit = history_limit;
        self
    }
}

#[async_trait::async_trait]
impl<H, S> StatusSource for StatusReporter<H, S>
where
    H: ExecutionHistory + 'static,
    S: FileStager + 'static,
{
    async fn report(&self) -> SupervisorResult<StatusSnapshot> {
        let view = self.handle.view().await?;

        let (definitions, executions) = tokio::join!(
            self.stager.inspect(&self.plan),
            self.history.recent_executions(self.history_limit, 0)
        );

        Ok(compose_snapshot(view, definitions, executions))
    }

    async fn is_alive(&self) -> bool {
        self.handle.is_alive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SupervisorError;
    use shared::{HealthOutcome, HealthProbeResult, HealthView, ProcessRecord, SequencerState};
    use uuid::Uuid;

    fn view(lifecycle: SupervisorLifecycle, running: bool, probes: Vec<HealthProbeResult>) -> SupervisorView {
        let mut record = ProcessRecord::started(Uuid::new_v4(), Some(42), 0);
        if !running {
            record.record_exit(Some(1), None);
        }
        SupervisorView {
            lifecycle,
            uptime_seconds: 12,
            give_up_reason: None,
            startup: SequencerState::Completed,
            process: Some(record),
            previous_processes: Vec::new(),
            health: HealthView {
                consecutive_unreachable: 0,
                recent: probes,
            },
        }
    }

    fn probe(outcome: HealthOutcome) -> HealthProbeResult {
        HealthProbeResult::new(outcome, 3)
    }

    #[test]
    fn test_overall_status_derivation() {
        assert_eq!(
            overall_status(&view(SupervisorLifecycle::Running, true, vec![])),
            OverallStatus::Healthy
        );
        assert_eq!(
            overall_status(&view(
                SupervisorLifecycle::Running,
                true,
                vec![probe(HealthOutcome::Healthy)]
            )),
            OverallStatus::Healthy
        );
        assert_eq!(
            overall_status(&view(
                SupervisorLifecycle::Running,
                true,
                vec![probe(HealthOutcome::Degraded {
                    reason: "HTTP 500".to_string()
                })]
            )),
            OverallStatus::Degraded
        );
        assert_eq!(
            overall_status(&view(SupervisorLifecycle::Restarting, false, vec![])),
            OverallStatus::Degraded
        );
        assert_eq!(
            overall_status(&view(SupervisorLifecycle::Exited, false, vec![])),
            OverallStatus::Down
        );
        assert_eq!(
            overall_status(&view(SupervisorLifecycle::GaveUp, false, vec![])),
            OverallStatus::Failed
        );
    }

    #[test]
    fn test_compose_snapshot_carries_view() {
        let snapshot = compose_snapshot(
            view(SupervisorLifecycle::Running, true, vec![]),
            vec![],
            Err(SupervisorError::external("offline")),
        );

        assert_eq!(snapshot.uptime_seconds, 12);
        assert_eq!(snapshot.startup, SequencerState::Completed);
        assert!(!snapshot.gave_up());
        assert_eq!(snapshot.process.and_then(|p| p.pid), Some(42));
        assert!(matches!(snapshot.executions, ExecutionsView::Unavailable { ref reason } if reason.contains("offline")));
        assert_eq!(snapshot.definitions_summary, DefinitionsSummary::default());
    }

    fn execution(status: &str, duration_ms: Option<u64>) -> ExecutionRecord {
        ExecutionRecord {
            id: Uuid::new_v4().to_string(),
            status: status.to_string(),
            duration_ms,
            timestamp: Utc::now(),
        }
    }

    fn definition(name: &str, exists: bool, active: bool, nodes: usize, triggers: usize) -> DefinitionSummary {
        DefinitionSummary {
            name: name.to_string(),
            exists,
            active,
            nodes,
            triggers,
            error: None,
        }
    }

    #[test]
    fn test_execution_stats() {
        let stats = execution_stats(&[
            execution("success", Some(1200)),
            execution("success", Some(800)),
            execution("failed", None),
            execution("running", Some(400)),
        ]);

        assert_eq!(stats.total_runs, 4);
        assert_eq!(stats.successful, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.running, 1);
        assert_eq!(stats.avg_duration_ms, 600.0);
    }

    #[test]
    fn test_execution_stats_without_rows() {
        assert_eq!(execution_stats(&[]), ExecutionStats::default());
        assert_eq!(execution_stats(&[]).avg_duration_ms, 0.0);
    }

    #[test]
    fn test_compose_snapshot_aggregates() {
        let snapshot = compose_snapshot(
            view(SupervisorLifecycle::Running, true, vec![]),
            vec![
                definition("a.json", true, true, 5, 1),
                definition("b.json", true, false, 3, 2),
                definition("c.json", false, false, 0, 0),
            ],
            Ok(vec![execution("success", Some(100)), execution("failed", Some(300))]),
        );

        assert_eq!(
            snapshot.definitions_summary,
            DefinitionsSummary {
                total: 3,
                active: 1,
                missing: 1,
                total_nodes: 8,
                total_triggers: 3,
            }
        );
        match snapshot.executions {
            ExecutionsView::Available { records, stats } => {
                assert_eq!(records.len(), 2);
                assert_eq!(stats.successful, 1);
                assert_eq!(stats.failed, 1);
                assert_eq!(stats.avg_duration_ms, 200.0);
            }
            other => panic!("expected executions, got {other:?}"),
        }
    }
}
