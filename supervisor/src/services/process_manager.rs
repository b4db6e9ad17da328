//! Real process management service implementation
//!
//! Owns the single workload slot: spawns the child, watches it until exit and
//! handles graceful termination with a forced kill after the grace period.

use std::time::Duration;

use async_trait::async_trait;
use shared::{component_debug, component_warn, logging, ComponentId, TerminationSignal};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{SupervisorError, SupervisorResult};
use crate::services::process_output_handler::{configure_child_stdio, spawn_output_scanners};
use crate::traits::{LaunchSpec, ProcessEvent, ProcessInfo, ProcessManager, TerminationOutcome};

/// How long the exit event waits for the output scanners to finish
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// How long to wait for the exit to be observed after a forced kill
const FORCE_KILL_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ExitInfo {
    code: Option<i32>,
    signal: Option<i32>,
}

/// Handle for the managed workload
struct ActiveProcess {
    record_id: Uuid,
    pid: Option<u32>,
    exit_rx: watch::Receiver<Option<ExitInfo>>,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl ActiveProcess {
    fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }
}

/// Real process manager implementation
pub struct RealProcessManager {
    active: Mutex<Option<ActiveProcess>>,
    drain_timeout: Duration,
}

impl Default for RealProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RealProcessManager {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(None),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// Configure the output drain bound (fluent API)
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    async fn force_kill(&self, record_id: Uuid) {
        let mut active = self.active.lock().await;
        if let Some(process) = active.as_mut().filter(|p| p.record_id == record_id) {
            if let Some(kill_tx) = process.kill_tx.take() {
                let _ = kill_tx.send(());
            }
        }
    }
}

#[async_trait]
impl ProcessManager for RealProcessManager {
    async fn spawn(
        &self,
        spec: &LaunchSpec,
        record_id: Uuid,
        events: mpsc::Sender<ProcessEvent>,
    ) -> SupervisorResult<ProcessInfo> {
        let mut active = self.active.lock().await;
        if let Some(current) = active.as_ref().filter(|p| !p.has_exited()) {
            return Err(SupervisorError::ProcessAlreadyRunning { pid: current.pid });
        }

        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(key, value)| (key.as_str(), value.as_str())))
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }
        configure_child_stdio(&mut cmd, spec.stdio);

        let mut child = cmd.spawn().map_err(|e| SupervisorError::ProcessSpawn {
            command: spec.display_command(),
            message: e.to_string(),
        })?;
        let pid = child.id();

        let scanners = spawn_output_scanners(&mut child, record_id, spec.markers.clone(), events.clone());
        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel();

        tokio::spawn(watch_child(
            child,
            record_id,
            scanners,
            kill_rx,
            exit_tx,
            events,
            self.drain_timeout,
        ));

        *active = Some(ActiveProcess {
            record_id,
            pid,
            exit_rx,
            kill_tx: Some(kill_tx),
        });

        component_debug!(
            ComponentId::current(),
            "🏭 Spawned `{}` (PID: {:?}) for record {}",
            spec.display_command(),
            pid,
            record_id
        );

        Ok(ProcessInfo { record_id, pid })
    }

    async fn terminate(&self, signal: TerminationSignal, grace: Duration) -> SupervisorResult<TerminationOutcome> {
        let (record_id, pid, mut exit_rx) = {
            let active = self.active.lock().await;
            match active.as_ref().filter(|p| !p.has_exited()) {
                Some(process) => (process.record_id, process.pid, process.exit_rx.clone()),
                None => return Ok(TerminationOutcome::NotRunning),
            }
        };

        match (signal, pid) {
            (TerminationSignal::Kill, _) | (_, None) => {
                self.force_kill(record_id).await;
                let _ = tokio::time::timeout(FORCE_KILL_WAIT, exit_rx.wait_for(Option::is_some)).await;
                return Ok(TerminationOutcome::ForceKilled);
            }
            (_, Some(pid)) => send_signal(pid, signal)?,
        }

        let waited = tokio::time::timeout(grace, async {
            exit_rx.wait_for(Option::is_some).await.map(|exit| *exit)
        })
        .await;

        match waited {
            Ok(Ok(Some(exit))) => Ok(TerminationOutcome::Exited {
                code: exit.code,
                signal: exit.signal,
            }),
            Ok(_) => Ok(TerminationOutcome::NotRunning),
            Err(_) => {
                component_warn!(
                    ComponentId::current(),
                    "⏱️ Workload ignored {} for {:?}, killing it",
                    signal,
                    grace
                );
                self.force_kill(record_id).await;
                let _ = tokio::time::timeout(FORCE_KILL_WAIT, exit_rx.wait_for(Option::is_some)).await;
                Ok(TerminationOutcome::ForceKilled)
            }
        }
    }

    async fn is_running(&self) -> bool {
        let active = self.active.lock().await;
        active.as_ref().map(|p| !p.has_exited()).unwrap_or(false)
    }
}

/// Wait for the child, drain its output, then publish the exit
async fn watch_child(
    mut child: Child,
    record_id: Uuid,
    scanners: Vec<JoinHandle<()>>,
    mut kill_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<Option<ExitInfo>>,
    events: mpsc::Sender<ProcessEvent>,
    drain_timeout: Duration,
) {
    let waited = tokio::select! {
        status = child.wait() => Some(status),
        Ok(()) = &mut kill_rx => None,
    };

    let status = match waited {
        Some(status) => status,
        None => {
            if let Err(e) = child.start_kill() {
                logging::log_error(ComponentId::current(), "Force kill", &e);
            }
            child.wait().await
        }
    };

    let exit = match status {
        Ok(status) => ExitInfo {
            code: status.code(),
            signal: exit_signal(&status),
        },
        Err(e) => {
            logging::log_error(ComponentId::current(), "Waiting for workload", &e);
            ExitInfo {
                code: None,
                signal: None,
            }
        }
    };

    let drained = tokio::time::timeout(drain_timeout, async {
        for scanner in scanners {
            let _ = scanner.await;
        }
    })
    .await;
    if drained.is_err() {
        component_debug!(ComponentId::current(), "Output still open after exit, not waiting further");
    }

    exit_tx.send_replace(Some(exit));
    let _ = events
        .send(ProcessEvent::Exited {
            record_id,
            code: exit.code,
            signal: exit.signal,
        })
        .await;
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: TerminationSignal) -> SupervisorResult<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let unix_signal = match signal {
        TerminationSignal::Terminate => Signal::SIGTERM,
        TerminationSignal::Interrupt => Signal::SIGINT,
        TerminationSignal::Kill => Signal::SIGKILL,
    };

    match kill(Pid::from_raw(pid as i32), unix_signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(SupervisorError::ProcessExit {
            message: format!("failed to send {signal} to {pid}: {e}"),
        }),
    }
}

#[cfg(not(unix))]
fn send_signal(_pid: u32, _signal: TerminationSignal) -> SupervisorResult<()> {
    Err(SupervisorError::ProcessExit {
        message: "graceful termination signals are only supported on unix".to_string(),
    })
}
