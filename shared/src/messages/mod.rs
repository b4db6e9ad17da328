//! Message types exchanged between the supervisor and its observers
//!
//! - `process`: workload lifecycle records, health probes, execution rows
//! - `status`: the consolidated status report and startup progress

pub mod process;
pub mod status;

pub use process::{
    DefinitionSummary, ExecutionRecord, HealthOutcome, HealthProbeResult, ProcessRecord, ProcessStatus,
};

pub use status::{
    DefinitionsSummary, ExecutionStats, ExecutionsView, HealthView, OverallStatus, SequencerState, StatusSnapshot, SupervisorLifecycle,
};
