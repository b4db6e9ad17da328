//! Phased startup sequencing
//!
//! Runs an ordered list of phases, each with its own retry policy and optional
//! timeout. Progress is published on a watch channel so status reports can
//! show where startup is.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use shared::{component_debug, component_warn, logging, ComponentId, SequencerState};
use tokio::sync::watch;

use crate::error::{SupervisorError, SupervisorResult};

/// The async work a phase performs
#[async_trait::async_trait]
pub trait PhaseAction: Send + Sync {
    async fn run(&self) -> SupervisorResult<()>;
}

#[async_trait::async_trait]
impl<F, Fut> PhaseAction for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = SupervisorResult<()>> + Send + 'static,
{
    async fn run(&self) -> SupervisorResult<()> {
        (self)().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseKind {
    /// Runs once, on the first pass only
    Setup,
    /// Runs on the first pass and again on every restart
    Repeatable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    pub fn attempts(max_attempts: u32, backoff: Duration) -> Self {
        Self { max_attempts, backoff }
    }
}

pub struct Phase {
    pub name: String,
    pub kind: PhaseKind,
    pub retry: RetryPolicy,
    pub required: bool,
    pub timeout: Option<Duration>,
    action: Arc<dyn PhaseAction>,
}

impl fmt::Debug for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Phase")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("retry", &self.retry)
            .field("required", &self.required)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Phase {
    /// Required phase with a single attempt and no timeout
    pub fn new(name: impl Into<String>, kind: PhaseKind, action: impl PhaseAction + 'static) -> Self {
        Self {
            name: name.into(),
            kind,
            retry: RetryPolicy::once(),
            required: true,
            timeout: None,
            action: Arc::new(action),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    async fn attempt(&self) -> SupervisorResult<()> {
        match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, self.action.run()).await {
                Ok(result) => result,
                Err(_) => Err(SupervisorError::PhaseTimeout {
                    phase: self.name.clone(),
                    timeout,
                }),
            },
            None => self.action.run().await,
        }
    }
}

/// Which phases a run covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunScope {
    /// Every phase, in order
    Full,
    /// Only repeatable phases, for restarts
    RepeatableOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    Succeeded,
    Skipped { reason: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseReport {
    pub name: String,
    pub attempts: u32,
    pub outcome: PhaseOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceOutcome {
    Completed {
        reports: Vec<PhaseReport>,
    },
    Failed {
        phase_index: usize,
        phase: String,
        reason: String,
        reports: Vec<PhaseReport>,
    },
}

impl SequenceOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, SequenceOutcome::Completed { .. })
    }

    pub fn reports(&self) -> &[PhaseReport] {
        match self {
            SequenceOutcome::Completed { reports } | SequenceOutcome::Failed { reports, .. } => reports,
        }
    }
}

/// Ordered startup phases plus the published sequencer state
pub struct PhasedSequencer {
    phases: Vec<Phase>,
    state_tx: watch::Sender<SequencerState>,
}

impl PhasedSequencer {
    pub fn new(phases: Vec<Phase>) -> Self {
        let (state_tx, _) = watch::channel(SequencerState::Pending);
        Self { phases, state_tx }
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn subscribe(&self) -> watch::Receiver<SequencerState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> SequencerState {
        self.state_tx.borrow().clone()
    }

    /// Mark a run that was cancelled mid-phase as failed at that phase
    pub fn abandon(&self, reason: &str) {
        self.state_tx.send_if_modified(|state| {
            let (phase_index, phase) = match state {
                SequencerState::Running { phase_index, phase } => (*phase_index, phase.clone()),
                _ => return false,
            };
            *state = SequencerState::Failed {
                phase_index,
                phase,
                reason: reason.to_string(),
            };
            true
        });
    }

    /// Run the phases in scope, strictly in declared order
    pub async fn run(&self, scope: RunScope) -> SequenceOutcome {
        let component = ComponentId::current();
        let mut reports = Vec::new();

        for (index, phase) in self.phases.iter().enumerate() {
            if scope == RunScope::RepeatableOnly && phase.kind != PhaseKind::Repeatable {
                continue;
            }

            self.state_tx.send_replace(SequencerState::Running {
                phase_index: index,
                phase: phase.name.clone(),
            });
            logging::log_progress(component, "Startup phase", &phase.name);

            let max_attempts = phase.retry.max_attempts.max(1);
            let mut attempts = 0;
            let failure = loop {
                attempts += 1;
                match phase.attempt().await {
                    Ok(()) => break None,
                    Err(e) if attempts >= max_attempts => break Some(e.to_string()),
                    Err(e) => {
                        component_debug!(
                            component,
                            "🔁 Phase {} attempt {}/{} failed: {}",
                            phase.name,
                            attempts,
                            max_attempts,
                            e
                        );
                        tokio::time::sleep(phase.retry.backoff).await;
                    }
                }
            };

            match failure {
                None => reports.push(PhaseReport {
                    name: phase.name.clone(),
                    attempts,
                    outcome: PhaseOutcome::Succeeded,
                }),
                Some(reason) if phase.required => {
                    logging::log_error(component, &format!("Phase {}", phase.name), &reason);
                    reports.push(PhaseReport {
                        name: phase.name.clone(),
                        attempts,
                        outcome: PhaseOutcome::Failed { reason: reason.clone() },
                    });
                    self.state_tx.send_replace(SequencerState::Failed {
                        phase_index: index,
                        phase: phase.name.clone(),
                        reason: reason.clone(),
                    });
                    return SequenceOutcome::Failed {
                        phase_index: index,
                        phase: phase.name.clone(),
                        reason,
                        reports,
                    };
                }
                Some(reason) => {
                    component_warn!(component, "⏭️  Skipping optional phase {}: {}", phase.name, reason);
                    reports.push(PhaseReport {
                        name: phase.name.clone(),
                        attempts,
                        outcome: PhaseOutcome::Skipped { reason },
                    });
                }
            }
        }

        self.state_tx.send_replace(SequencerState::Completed);
        SequenceOutcome::Completed { reports }
    }
}
