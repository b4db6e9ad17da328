//! Supervisor library for running the workflow host
//!
//! This library provides a testable supervisor that resolves configuration,
//! walks a phased startup sequence, keeps the workflow runtime alive as a child
//! process with health-gated restarts, and reports on all of it over HTTP.

pub mod config;
pub mod core;
pub mod error;
pub mod services;
pub mod supervisor;
pub mod traits;
pub mod web;

// Re-export commonly used types
pub use config::{ConfigError, ConfigSchema, ConfigSnapshot, SupervisorSettings};
pub use core::{PhasedSequencer, RestartDecision, RestartPolicy, StatusReporter, SupervisorState};
pub use error::{SupervisorError, SupervisorResult};
pub use supervisor::{Supervisor, SupervisorExit, SupervisorHandle};
pub use traits::{ExecutionHistory, FileStager, HealthProber, ProcessManager, StatusSource};
