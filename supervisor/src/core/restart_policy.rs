//! Restart decisions for the workload
//!
//! Pure logic: given the current process record and its recent probe history,
//! decide whether to restart, after what delay, or to give up.

use std::fmt;
use std::time::Duration;

use shared::{HealthProbeResult, ProcessRecord, ProcessStatus};

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5_000);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(300_000);
pub const DEFAULT_MAX_RESTARTS: u32 = 10;
pub const DEFAULT_HUNG_THRESHOLD: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_restarts: u32,
    /// Consecutive unreachable probes that mark a running process as hung
    pub hung_threshold: usize,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_restarts: DEFAULT_MAX_RESTARTS,
            hung_threshold: DEFAULT_HUNG_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartReason {
    /// Running and answering probes
    Healthy,
    /// Already being stopped, nothing to decide yet
    Terminating,
    CleanExit,
    ExitFailure { code: Option<i32>, signal: Option<i32> },
    Hung { consecutive_unreachable: usize },
    KnownErrorMarker { marker: String },
    SpawnFailure { error: String },
    RestartLimitReached { restarts: u32 },
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartReason::Healthy => write!(f, "running"),
            RestartReason::Terminating => write!(f, "terminating"),
            RestartReason::CleanExit => write!(f, "exited cleanly"),
            RestartReason::ExitFailure { code, signal } => match (code, signal) {
                (Some(code), _) => write!(f, "exited with code {code}"),
                (None, Some(signal)) => write!(f, "killed by signal {signal}"),
                (None, None) => write!(f, "exited without status"),
            },
            RestartReason::Hung {
                consecutive_unreachable,
            } => write!(f, "hung after {consecutive_unreachable} unreachable probes"),
            RestartReason::KnownErrorMarker { marker } => write!(f, "known error marker `{marker}` in output"),
            RestartReason::SpawnFailure { error } => write!(f, "spawn failed: {error}"),
            RestartReason::RestartLimitReached { restarts } => write!(f, "gave up after {restarts} restarts"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartDecision {
    pub restart: bool,
    pub delay: Duration,
    pub give_up: bool,
    pub reason: RestartReason,
}

impl RestartDecision {
    fn no_action(reason: RestartReason) -> Self {
        Self {
            restart: false,
            delay: Duration::ZERO,
            give_up: false,
            reason,
        }
    }

    fn restart_after(delay: Duration, reason: RestartReason) -> Self {
        Self {
            restart: true,
            delay,
            give_up: false,
            reason,
        }
    }

    fn give_up(restarts: u32) -> Self {
        Self {
            restart: false,
            delay: Duration::ZERO,
            give_up: true,
            reason: RestartReason::RestartLimitReached { restarts },
        }
    }
}

/// Trailing run of unreachable probes, newest last
pub fn consecutive_unreachable(recent: &[HealthProbeResult]) -> usize {
    recent
        .iter()
        .rev()
        .take_while(|result| result.outcome.is_unreachable())
        .count()
}

impl RestartPolicy {
    /// `min(base * 2^restart_count, max)`, saturating
    pub fn backoff_delay(&self, restart_count: u32) -> Duration {
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        let factor = 2u64.checked_pow(restart_count).unwrap_or(u64::MAX);

        Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
    }

    pub fn decide(&self, record: &ProcessRecord, recent: &[HealthProbeResult]) -> RestartDecision {
        match record.status {
            ProcessStatus::Terminating => RestartDecision::no_action(RestartReason::Terminating),
            ProcessStatus::Running => {
                let unreachable = consecutive_unreachable(recent);
                if unreachable >= self.hung_threshold {
                    RestartDecision::restart_after(
                        self.backoff_delay(record.restart_count),
                        RestartReason::Hung {
                            consecutive_unreachable: unreachable,
                        },
                    )
                } else {
                    RestartDecision::no_action(RestartReason::Healthy)
                }
            }
            ProcessStatus::Exited | ProcessStatus::SpawnFailed => self.decide_after_exit(record, recent),
        }
    }

    fn decide_after_exit(&self, record: &ProcessRecord, recent: &[HealthProbeResult]) -> RestartDecision {
        if record.status == ProcessStatus::Exited && record.exit_code == Some(0) && !record.unexpected_exit() {
            return RestartDecision::no_action(RestartReason::CleanExit);
        }

        if record.restart_count >= self.max_restarts {
            return RestartDecision::give_up(record.restart_count);
        }

        if let Some(marker) = record.markers.first() {
            return RestartDecision::restart_after(
                Duration::ZERO,
                RestartReason::KnownErrorMarker { marker: marker.clone() },
            );
        }

        let reason = if let Some(error) = &record.spawn_error {
            RestartReason::SpawnFailure { error: error.clone() }
        } else if record.hung_detected {
            RestartReason::Hung {
                consecutive_unreachable: consecutive_unreachable(recent).max(self.hung_threshold),
            }
        } else {
            RestartReason::ExitFailure {
                code: record.exit_code,
                signal: record.exit_signal,
            }
        };

        RestartDecision::restart_after(self.backoff_delay(record.restart_count), reason)
    }
}
