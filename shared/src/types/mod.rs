//! Core types used throughout the supervisor system

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::errors::SharedError;

/// Global component identity - set once at startup
static COMPONENT_ID: OnceLock<ComponentId> = OnceLock::new();

/// Identifies which part of the deployment emitted a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentId {
    /// The supervisor process itself (singleton)
    Supervisor,
    /// Output forwarded from the supervised workload
    Workload,
}

impl ComponentId {
    /// Initialize the global component identity for the supervisor binary
    pub fn init_supervisor() -> &'static ComponentId {
        COMPONENT_ID.get_or_init(|| ComponentId::Supervisor)
    }

    /// Get the global component identity, defaulting to the supervisor
    pub fn current() -> &'static ComponentId {
        COMPONENT_ID.get_or_init(|| ComponentId::Supervisor)
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentId::Supervisor => write!(f, "supervisor"),
            ComponentId::Workload => write!(f, "workload"),
        }
    }
}

/// How the supervised process's stdout/stderr are wired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StdioPolicy {
    /// Pipe output through the supervisor so it can be logged and scanned for markers
    #[default]
    Capture,
    /// Child writes straight to the supervisor's terminal; no marker scanning
    Inherit,
}

impl fmt::Display for StdioPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StdioPolicy::Capture => write!(f, "capture"),
            StdioPolicy::Inherit => write!(f, "inherit"),
        }
    }
}

impl FromStr for StdioPolicy {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "capture" | "pipe" => Ok(StdioPolicy::Capture),
            "inherit" => Ok(StdioPolicy::Inherit),
            _ => Err(SharedError::InvalidValue {
                field: "stdio policy".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Signal used to ask the supervised process to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationSignal {
    /// SIGTERM on unix
    Terminate,
    /// SIGINT on unix
    Interrupt,
    /// Immediate kill, no grace period
    Kill,
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationSignal::Terminate => write!(f, "SIGTERM"),
            TerminationSignal::Interrupt => write!(f, "SIGINT"),
            TerminationSignal::Kill => write!(f, "SIGKILL"),
        }
    }
}
