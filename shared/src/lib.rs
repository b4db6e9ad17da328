//! Shared types for the workflow host supervisor
//!
//! Contains the identity, logging and wire types used by both the supervisor
//! library and the status API it serves.

pub mod errors;
pub mod logging;
pub mod messages;
pub mod types;

pub use errors::*;
pub use types::*;

pub use messages::{
    // Workload lifecycle
    DefinitionSummary, ExecutionRecord, HealthOutcome, HealthProbeResult, ProcessRecord, ProcessStatus,

    // Status reporting
    DefinitionsSummary, ExecutionStats, ExecutionsView, HealthView, OverallStatus, SequencerState, StatusSnapshot, SupervisorLifecycle,
};
