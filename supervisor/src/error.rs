//! Supervisor-specific error types

use shared::SharedError;
use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to spawn workload `{command}`: {message}")]
    ProcessSpawn { command: String, message: String },

    #[error("Workload already running (pid {pid:?})")]
    ProcessAlreadyRunning { pid: Option<u32> },

    #[error("Workload exit handling failed: {message}")]
    ProcessExit { message: String },

    #[error("Health probe setup failed: {message}")]
    HealthProbe { message: String },

    #[error("Staging failed: {operation} on {path}: {message}")]
    Staging {
        operation: String,
        path: String,
        message: String,
    },

    #[error("External query failed: {message}")]
    ExternalQuery { message: String },

    #[error("Phase `{phase}` timed out after {timeout:?}")]
    PhaseTimeout { phase: String, timeout: Duration },

    #[error("Startup sequence failed at `{phase}`: {reason}")]
    SequenceFailed { phase: String, reason: String },

    #[error("Supervisor loop is not running")]
    LoopUnavailable,

    #[error("Shared component error: {0}")]
    Shared(#[from] SharedError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SupervisorError {
    pub fn staging(operation: impl Into<String>, path: impl AsRef<std::path::Path>, err: impl std::fmt::Display) -> Self {
        SupervisorError::Staging {
            operation: operation.into(),
            path: path.as_ref().display().to_string(),
            message: err.to_string(),
        }
    }

    pub fn external(message: impl Into<String>) -> Self {
        SupervisorError::ExternalQuery {
            message: message.into(),
        }
    }
}

pub type SupervisorResult<T> = Result<T, SupervisorError>;
