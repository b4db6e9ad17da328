//! Trait definitions with mockall annotations for testing
//!
//! Every collaborator the supervisor loop talks to sits behind one of these
//! traits so the loop, the sequencer and the status reporter can be driven
//! with mocks in tests and with the real services in the binary.

use std::path::PathBuf;
use std::time::Duration;

use shared::{DefinitionSummary, ExecutionRecord, HealthProbeResult, StatusSnapshot, StdioPolicy, TerminationSignal};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::SupervisorResult;

/// Everything needed to start the workload process
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    pub command: String,
    pub args: Vec<String>,
    /// Applied on top of the inherited environment
    pub env: Vec<(String, String)>,
    pub stdio: StdioPolicy,
    /// Output substrings that flag a known configuration error
    pub markers: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl LaunchSpec {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: Vec::new(),
            stdio: StdioPolicy::Capture,
            markers: Vec::new(),
            working_dir: None,
        }
    }

    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    pub fn with_stdio(mut self, stdio: StdioPolicy) -> Self {
        self.stdio = stdio;
        self
    }

    pub fn with_markers(mut self, markers: Vec<String>) -> Self {
        self.markers = markers;
        self
    }

    /// Command line as it would be typed, for logs and errors
    pub fn display_command(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Identity of a freshly spawned workload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessInfo {
    pub record_id: Uuid,
    pub pid: Option<u32>,
}

/// Lifecycle events published by the process manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// Emitted once per spawn, after the output scanners have drained
    Exited {
        record_id: Uuid,
        code: Option<i32>,
        signal: Option<i32>,
    },
    MarkerDetected {
        record_id: Uuid,
        marker: String,
        line: String,
    },
}

/// Result of asking the workload to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationOutcome {
    /// Exited within the grace period
    Exited { code: Option<i32>, signal: Option<i32> },
    /// Grace period elapsed and the process was killed
    ForceKilled,
    NotRunning,
}

/// Where and how to probe the workload's health
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub url: String,
    pub timeout: Duration,
    /// Require a JSON body for a probe to count as healthy
    pub expect_json: bool,
}

/// Which definition files to copy where
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingPlan {
    pub source_dir: PathBuf,
    pub dest_dir: PathBuf,
    pub files: Vec<String>,
}

/// Outcome of one staging pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagingReport {
    pub copied: Vec<String>,
    pub missing: Vec<String>,
}

impl StagingReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Process management abstraction for the single workload slot
///
/// Exactly one process may be active at a time. Exit and marker events are
/// delivered on the channel handed to `spawn`.
#[mockall::automock]
#[async_trait::async_trait]
pub trait ProcessManager: Send + Sync {
    /// Spawn the workload
    ///
    /// # Parameters
    /// - `spec`: command, environment and stdio policy
    /// - `record_id`: id of the process record this lifetime belongs to
    /// - `events`: channel for exit and marker events
    ///
    /// # Returns
    /// ProcessInfo for the new process, or `ProcessAlreadyRunning`/`ProcessSpawn`
    async fn spawn(
        &self,
        spec: &LaunchSpec,
        record_id: Uuid,
        events: mpsc::Sender<ProcessEvent>,
    ) -> SupervisorResult<ProcessInfo>;

    /// Ask the workload to stop, force-killing it after `grace`
    async fn terminate(&self, signal: TerminationSignal, grace: Duration) -> SupervisorResult<TerminationOutcome>;

    /// Whether the slot currently holds a live process
    async fn is_running(&self) -> bool;
}

/// Single-shot health probe
#[mockall::automock]
#[async_trait::async_trait]
pub trait HealthProber: Send + Sync {
    /// Probe the target once; never fails, failures are classified in the result
    async fn probe(&self, target: &ProbeTarget) -> HealthProbeResult;
}

/// Workflow definition staging
#[mockall::automock]
#[async_trait::async_trait]
pub trait FileStager: Send + Sync {
    /// Copy the plan's files into the destination directory, overwriting
    async fn stage(&self, plan: &StagingPlan) -> SupervisorResult<StagingReport>;

    /// Summarise the staged definitions
    async fn inspect(&self, plan: &StagingPlan) -> Vec<DefinitionSummary>;
}

/// Read access to the external execution-history table
#[mockall::automock]
#[async_trait::async_trait]
pub trait ExecutionHistory: Send + Sync {
    /// Most recent executions first
    async fn recent_executions(&self, limit: usize, offset: usize) -> SupervisorResult<Vec<ExecutionRecord>>;

    /// Cheap reachability query
    async fn ping(&self) -> SupervisorResult<()>;
}

/// Source of status reports for the HTTP handlers
#[mockall::automock]
#[async_trait::async_trait]
pub trait StatusSource: Send + Sync {
    async fn report(&self) -> SupervisorResult<StatusSnapshot>;

    /// Whether the supervisor loop is still accepting commands
    async fn is_alive(&self) -> bool;
}
