//! Supervisor state management
//!
//! Everything the event loop owns about the workload: the current process
//! record, bounded history of previous records and probe results, the restart
//! counter and the lifecycle phase. No I/O happens here.

use std::collections::VecDeque;
use std::time::Instant;

use shared::{
    HealthProbeResult, HealthView, ProcessRecord, ProcessStatus, SequencerState, SupervisorLifecycle,
};
use uuid::Uuid;

use super::restart_policy::consecutive_unreachable;

/// Previous process records kept for the status report
pub const PROCESS_HISTORY_LIMIT: usize = 20;
/// Probe results kept for the current process record
pub const PROBE_HISTORY_LIMIT: usize = 50;

/// Point-in-time copy of the loop state, as handed to the status reporter
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorView {
    pub lifecycle: SupervisorLifecycle,
    pub uptime_seconds: u64,
    pub give_up_reason: Option<String>,
    pub startup: SequencerState,
    pub process: Option<ProcessRecord>,
    /// Newest first
    pub previous_processes: Vec<ProcessRecord>,
    pub health: HealthView,
}

#[derive(Debug)]
pub struct SupervisorState {
    lifecycle: SupervisorLifecycle,
    started_at: Instant,
    current: Option<ProcessRecord>,
    previous: VecDeque<ProcessRecord>,
    probes: VecDeque<HealthProbeResult>,
    restarts: u32,
    give_up_reason: Option<String>,
}

impl Default for SupervisorState {
    fn default() -> Self {
        Self::new()
    }
}

impl SupervisorState {
    pub fn new() -> Self {
        Self {
            lifecycle: SupervisorLifecycle::Starting,
            started_at: Instant::now(),
            current: None,
            previous: VecDeque::with_capacity(PROCESS_HISTORY_LIMIT),
            probes: VecDeque::with_capacity(PROBE_HISTORY_LIMIT),
            restarts: 0,
            give_up_reason: None,
        }
    }

    pub fn lifecycle(&self) -> SupervisorLifecycle {
        self.lifecycle
    }

    pub fn set_lifecycle(&mut self, lifecycle: SupervisorLifecycle) {
        self.lifecycle = lifecycle;
    }

    pub fn current(&self) -> Option<&ProcessRecord> {
        self.current.as_ref()
    }

    /// Current record only if it is the given lifetime
    pub fn current_if(&mut self, record_id: Uuid) -> Option<&mut ProcessRecord> {
        self.current.as_mut().filter(|record| record.id == record_id)
    }

    pub fn previous_processes(&self) -> Vec<ProcessRecord> {
        self.previous.iter().cloned().collect()
    }

    /// Make `record` current, retiring the old one and clearing probe history
    pub fn begin_process(&mut self, record: ProcessRecord) {
        if let Some(old) = self.current.replace(record) {
            self.previous.push_front(old);
            self.previous.truncate(PROCESS_HISTORY_LIMIT);
        }
        self.probes.clear();
    }

    /// Returns the updated record when `record_id` is current
    /// Returns None for retired records and for a second exit of the same record
    pub fn record_exit(&mut self, record_id: Uuid, code: Option<i32>, signal: Option<i32>) -> Option<&ProcessRecord> {
        let record = self.current_if(record_id).filter(|record| record.is_running())?;
        record.record_exit(code, signal);
        Some(&*record)
    }

    /// Returns false when the marker belongs to a retired record or was already seen
    pub fn record_marker(&mut self, record_id: Uuid, marker: &str) -> bool {
        match self.current_if(record_id) {
            Some(record) if !record.markers.iter().any(|seen| seen == marker) => {
                record.markers.push(marker.to_string());
                true
            }
            _ => false,
        }
    }

    pub fn record_probe(&mut self, result: HealthProbeResult) {
        if self.probes.len() == PROBE_HISTORY_LIMIT {
            self.probes.pop_front();
        }
        self.probes.push_back(result);
    }

    /// Oldest first
    pub fn recent_probes(&self) -> Vec<HealthProbeResult> {
        self.probes.iter().cloned().collect()
    }

    pub fn consecutive_unreachable(&self) -> usize {
        consecutive_unreachable(&self.recent_probes())
    }

    /// Flag the running process as hung and being stopped
    pub fn mark_hung(&mut self) -> Option<&ProcessRecord> {
        let record = self.current.as_mut().filter(|record| record.status == ProcessStatus::Running)?;
        record.hung_detected = true;
        record.status = ProcessStatus::Terminating;
        Some(&*record)
    }

    pub fn is_process_running(&self) -> bool {
        self.current.as_ref().map(ProcessRecord::is_running).unwrap_or(false)
    }

    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    /// Count one more restart and return the new total
    pub fn next_restart(&mut self) -> u32 {
        self.restarts = self.restarts.saturating_add(1);
        self.restarts
    }

    pub fn give_up(&mut self, reason: impl Into<String>) {
        self.lifecycle = SupervisorLifecycle::GaveUp;
        self.give_up_reason = Some(reason.into());
    }

    pub fn give_up_reason(&self) -> Option<&str> {
        self.give_up_reason.as_deref()
    }

    pub fn view(&self, startup: SequencerState, probe_limit: usize) -> SupervisorView {
        let skip = self.probes.len().saturating_sub(probe_limit);
        SupervisorView {
            lifecycle: self.lifecycle,
            uptime_seconds: self.started_at.elapsed().as_secs(),
            give_up_reason: self.give_up_reason.clone(),
            startup,
            process: self.current.clone(),
            previous_processes: self.previous_processes(),
            health: HealthView {
                consecutive_unreachable: self.consecutive_unreachable(),
                recent: self.probes.iter().skip(skip).cloned().collect(),
            },
        }
    }
}
