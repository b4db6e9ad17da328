//! Core supervisor logic
//!
//! Restart decisions, startup sequencing, loop state and status composition.
//! Apart from the sequencer's timers these modules do no I/O.

pub mod restart_policy;
pub mod sequencer;
pub mod state;
pub mod status;

pub use restart_policy::{RestartDecision, RestartPolicy, RestartReason};
pub use sequencer::{
    Phase, PhaseAction, PhaseKind, PhaseOutcome, PhaseReport, PhasedSequencer, RetryPolicy, RunScope, SequenceOutcome,
};
pub use state::{SupervisorState, SupervisorView};
pub use status::{StatusReporter, DEFAULT_HISTORY_LIMIT};
