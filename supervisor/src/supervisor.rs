//! Main supervisor implementation
//!
//! A single event loop owns all supervisor state. The startup sequencer, the
//! probe loop, restart timers and the process watcher run as separate tasks
//! that only talk to the loop through channels.

use std::sync::Arc;
use std::time::Duration;

use shared::{
    component_debug, component_error, component_info, component_warn, logging, ComponentId, ProcessRecord,
    SupervisorLifecycle, TerminationSignal,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::SupervisorSettings;
use crate::core::{
    Phase, PhaseKind, PhasedSequencer, RestartReason, RetryPolicy, RunScope, SequenceOutcome, SupervisorState,
    SupervisorView,
};
use crate::error::{SupervisorError, SupervisorResult};
use crate::services::health_prober::{self, ProbeEvent, ProbeSubscription};
use crate::services::keepalive::{self, KeepaliveHandle};
use crate::traits::{ExecutionHistory, FileStager, HealthProber, ProcessEvent, ProcessInfo, ProcessManager};

const CHANNEL_CAPACITY: usize = 64;

/// Why `Supervisor::run` returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorExit {
    /// Shutdown was requested
    Graceful,
    /// A required phase failed on the first run
    StartupFailed { phase: String, reason: String },
    /// Restart policy gave up and exit-on-give-up is set
    GaveUp { reason: String },
}

impl SupervisorExit {
    /// Process exit code for the binary
    pub fn exit_code(&self) -> u8 {
        match self {
            SupervisorExit::Graceful => 0,
            SupervisorExit::StartupFailed { .. } => 1,
            SupervisorExit::GaveUp { .. } => 2,
        }
    }
}

enum Command {
    StartWorkload {
        reply: oneshot::Sender<SupervisorResult<ProcessInfo>>,
    },
    StartMonitoring {
        reply: oneshot::Sender<SupervisorResult<()>>,
    },
    StartKeepalive {
        reply: oneshot::Sender<bool>,
    },
    View {
        reply: oneshot::Sender<SupervisorView>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunKind {
    Initial,
    Restart,
}

enum InternalEvent {
    SequenceFinished {
        run: u64,
        kind: RunKind,
        outcome: SequenceOutcome,
    },
    RestartDue,
    /// Neither SIGTERM nor SIGKILL could stop a hung workload
    TerminationFailed { record_id: Uuid, reason: String },
}

/// Cloneable handle for talking to a running supervisor loop
#[derive(Clone, Debug)]
pub struct SupervisorHandle {
    commands: mpsc::Sender<Command>,
    shutdown: mpsc::Sender<()>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Command::StartWorkload { .. } => "StartWorkload",
            Command::StartMonitoring { .. } => "StartMonitoring",
            Command::StartKeepalive { .. } => "StartKeepalive",
            Command::View { .. } => "View",
        };
        f.write_str(name)
    }
}

impl SupervisorHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> SupervisorResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| SupervisorError::LoopUnavailable)?;
        response.await.map_err(|_| SupervisorError::LoopUnavailable)
    }

    /// Spawn the workload and make it the current process record
    pub async fn start_workload(&self) -> SupervisorResult<ProcessInfo> {
        self.request(|reply| Command::StartWorkload { reply }).await?
    }

    /// Start probing the current workload, replacing any existing probe loop
    pub async fn start_monitoring(&self) -> SupervisorResult<()> {
        self.request(|reply| Command::StartMonitoring { reply }).await?
    }

    /// Arm the keepalive pinger; false when no keepalive URL is configured
    pub async fn start_keepalive(&self) -> SupervisorResult<bool> {
        self.request(|reply| Command::StartKeepalive { reply }).await
    }

    pub async fn view(&self) -> SupervisorResult<SupervisorView> {
        self.request(|reply| Command::View { reply }).await
    }

    /// Ask the loop to stop; returns once the request is queued
    pub async fn shutdown(&self) -> SupervisorResult<()> {
        self.shutdown.send(()).await.map_err(|_| SupervisorError::LoopUnavailable)
    }

    pub fn is_alive(&self) -> bool {
        !self.commands.is_closed()
    }
}

/// Supervisor that keeps the workflow runtime alive
pub struct Supervisor<P, H, F, E>
where
    P: ProcessManager + 'static,
    H: HealthProber + 'static,
    F: FileStager + 'static,
    E: ExecutionHistory + 'static,
{
    settings: SupervisorSettings,

    /// Injected services
    process_manager: Arc<P>,
    prober: Arc<H>,
    stager: Arc<F>,
    history: Arc<E>,
    http: reqwest::Client,

    /// Loop-owned state
    state: SupervisorState,
    sequencer: Arc<PhasedSequencer>,
    subscription: Option<ProbeSubscription>,
    keepalive: Option<KeepaliveHandle>,
    sequence_task: Option<JoinHandle<()>>,
    sequence_run: u64,
    restart_timer: Option<JoinHandle<()>>,

    handle: SupervisorHandle,
    commands_rx: mpsc::Receiver<Command>,
    shutdown_rx: mpsc::Receiver<()>,
    process_tx: mpsc::Sender<ProcessEvent>,
    process_rx: mpsc::Receiver<ProcessEvent>,
    probe_tx: mpsc::Sender<ProbeEvent>,
    probe_rx: mpsc::Receiver<ProbeEvent>,
    internal_tx: mpsc::Sender<InternalEvent>,
    internal_rx: mpsc::Receiver<InternalEvent>,
}

impl<P, H, F, E> Supervisor<P, H, F, E>
where
    P: ProcessManager + 'static,
    H: HealthProber + 'static,
    F: FileStager + 'static,
    E: ExecutionHistory + 'static,
{
    /// Create a supervisor with injected dependencies and the default phases
    pub fn new(settings: SupervisorSettings, process_manager: P, prober: H, stager: F, history: E) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (process_tx, process_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (probe_tx, probe_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (internal_tx, internal_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let handle = SupervisorHandle {
            commands: commands_tx,
            shutdown: shutdown_tx,
        };
        let stager = Arc::new(stager);
        let history = Arc::new(history);
        let sequencer = Arc::new(PhasedSequencer::new(default_phases(
            &settings,
            &handle,
            stager.clone(),
            history.clone(),
        )));

        Self {
            settings,
            process_manager: Arc::new(process_manager),
            prober: Arc::new(prober),
            stager,
            history,
            http: reqwest::Client::new(),
            state: SupervisorState::new(),
            sequencer,
            subscription: None,
            keepalive: None,
            sequence_task: None,
            sequence_run: 0,
            restart_timer: None,
            handle,
            commands_rx,
            shutdown_rx,
            process_tx,
            process_rx,
            probe_tx,
            probe_rx,
            internal_tx,
            internal_rx,
        }
    }

    /// Replace the startup phases (fluent API)
    pub fn with_phases(mut self, phases: Vec<Phase>) -> Self {
        self.sequencer = Arc::new(PhasedSequencer::new(phases));
        self
    }

    /// Configure the HTTP client used by the keepalive pinger (fluent API)
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn handle(&self) -> SupervisorHandle {
        self.handle.clone()
    }

    pub fn stager(&self) -> Arc<F> {
        self.stager.clone()
    }

    pub fn history(&self) -> Arc<E> {
        self.history.clone()
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    /// Main event loop: runs startup, then supervises until shutdown or give-up
    pub async fn run(mut self) -> SupervisorExit {
        logging::log_startup(
            ComponentId::current(),
            &format!("supervising `{}`", self.settings.launch.display_command()),
        );
        self.spawn_sequence(RunKind::Initial);

        loop {
            let exit = tokio::select! {
                biased;

                Some(()) = self.shutdown_rx.recv() => {
                    self.shutdown("shutdown requested").await;
                    Some(SupervisorExit::Graceful)
                }
                Some(event) = self.internal_rx.recv() => self.handle_internal_event(event).await,
                Some(event) = self.process_rx.recv() => self.handle_process_event(event).await,
                Some(event) = self.probe_rx.recv() => {
                    self.handle_probe_event(event);
                    None
                }
                Some(command) = self.commands_rx.recv() => {
                    self.handle_command(command).await;
                    None
                }
            };

            if let Some(exit) = exit {
                return exit;
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartWorkload { reply } => {
                let result = self.start_workload().await;
                let _ = reply.send(result);
            }
            Command::StartMonitoring { reply } => {
                let _ = reply.send(self.start_monitoring());
            }
            Command::StartKeepalive { reply } => {
                let _ = reply.send(self.start_keepalive());
            }
            Command::View { reply } => {
                let view = self.state.view(self.sequencer.state(), self.settings.history_limit);
                let _ = reply.send(view);
            }
        }
    }

    async fn start_workload(&mut self) -> SupervisorResult<ProcessInfo> {
        let record_id = Uuid::new_v4();
        let info = self
            .process_manager
            .spawn(&self.settings.launch, record_id, self.process_tx.clone())
            .await?;

        self.state
            .begin_process(ProcessRecord::started(record_id, info.pid, self.state.restarts()));
        logging::log_success(
            ComponentId::current(),
            &format!("Workload started (PID: {:?}, restarts: {})", info.pid, self.state.restarts()),
        );
        Ok(info)
    }

    fn start_monitoring(&mut self) -> SupervisorResult<()> {
        self.cancel_monitoring();
        if !self.state.is_process_running() {
            return Err(SupervisorError::ProcessExit {
                message: "workload is not running, nothing to monitor".to_string(),
            });
        }

        let subscription = health_prober::start_loop(
            self.prober.clone(),
            self.settings.health_target.clone(),
            self.settings.health_interval,
            self.probe_tx.clone(),
        );
        component_info!(
            ComponentId::current(),
            "🩺 Monitoring {} every {:?}",
            self.settings.health_target.url,
            self.settings.health_interval
        );
        self.subscription = Some(subscription);
        Ok(())
    }

    fn start_keepalive(&mut self) -> bool {
        if self.keepalive.as_ref().map(KeepaliveHandle::is_running).unwrap_or(false) {
            return true;
        }

        match &self.settings.keepalive {
            Some(settings) => {
                component_info!(ComponentId::current(), "🔔 Setting up sleep prevention for: {}", settings.url);
                self.keepalive = Some(keepalive::start(self.http.clone(), settings.clone()));
                true
            }
            None => {
                component_debug!(ComponentId::current(), "No keepalive URL configured");
                false
            }
        }
    }

    async fn handle_process_event(&mut self, event: ProcessEvent) -> Option<SupervisorExit> {
        match event {
            ProcessEvent::MarkerDetected { record_id, marker, line } => {
                if self.state.record_marker(record_id, &marker) {
                    component_warn!(ComponentId::current(), "🚩 Known error marker `{}` in output: {}", marker, line);
                }
                None
            }
            ProcessEvent::Exited {
                record_id,
                code,
                signal,
            } => {
                let record = self.state.record_exit(record_id, code, signal)?.clone();
                component_warn!(
                    ComponentId::current(),
                    "💀 Workload exited (code: {:?}, signal: {:?})",
                    code,
                    signal
                );

                self.cancel_monitoring();
                if self.state.lifecycle() == SupervisorLifecycle::Stopping {
                    return None;
                }
                if let Some(task) = self.sequence_task.take() {
                    task.abort();
                    self.sequencer.abandon("workload exited during startup");
                }

                self.apply_decision(&record).await
            }
        }
    }

    fn handle_probe_event(&mut self, event: ProbeEvent) {
        let active = self.subscription.as_ref().map(ProbeSubscription::id);
        if active != Some(event.subscription) {
            component_debug!(
                ComponentId::current(),
                "Discarding probe result from cancelled loop {}",
                event.subscription
            );
            return;
        }

        self.state.record_probe(event.result);
        let Some(record) = self.state.current() else {
            return;
        };

        let decision = self.settings.restart.decide(record, &self.state.recent_probes());
        if let RestartReason::Hung {
            consecutive_unreachable,
        } = decision.reason
        {
            component_error!(
                ComponentId::current(),
                "🧊 Workload hung after {} unreachable probes, terminating",
                consecutive_unreachable
            );
            let record_id = record.id;
            self.state.mark_hung();
            self.state.set_lifecycle(SupervisorLifecycle::Restarting);
            self.cancel_monitoring();

            let process_manager = self.process_manager.clone();
            let internal = self.internal_tx.clone();
            let grace = self.settings.terminate_grace;
            tokio::spawn(async move {
                let result = match process_manager.terminate(TerminationSignal::Terminate, grace).await {
                    Err(e) => {
                        logging::log_error(ComponentId::current(), "Terminating hung workload", &e);
                        process_manager.terminate(TerminationSignal::Kill, grace).await
                    }
                    ok => ok,
                };
                match result {
                    Ok(outcome) => {
                        component_debug!(ComponentId::current(), "Hung workload: {:?}", outcome);
                    }
                    Err(e) => {
                        logging::log_error(ComponentId::current(), "Killing hung workload", &e);
                        let _ = internal
                            .send(InternalEvent::TerminationFailed {
                                record_id,
                                reason: e.to_string(),
                            })
                            .await;
                    }
                }
            });
        }
    }

    async fn handle_internal_event(&mut self, event: InternalEvent) -> Option<SupervisorExit> {
        match event {
            InternalEvent::RestartDue => {
                self.restart_timer = None;
                if self.state.lifecycle() != SupervisorLifecycle::Restarting {
                    return None;
                }
                let restarts = self.state.next_restart();
                component_info!(ComponentId::current(), "🔄 Restarting workload (restart {})", restarts);
                self.spawn_sequence(RunKind::Restart);
                None
            }
            InternalEvent::TerminationFailed { record_id, reason } => {
                // Give up on this lifetime so the restart policy can act
                let record = self.state.record_exit(record_id, None, None)?.clone();
                component_warn!(
                    ComponentId::current(),
                    "Abandoning hung workload that could not be stopped: {}",
                    reason
                );
                if self.state.lifecycle() == SupervisorLifecycle::Stopping {
                    return None;
                }
                self.apply_decision(&record).await
            }
            InternalEvent::SequenceFinished { run, kind, outcome } => {
                if run != self.sequence_run || self.sequence_task.take().is_none() {
                    component_debug!(ComponentId::current(), "Ignoring result of abandoned sequence run {}", run);
                    return None;
                }
                match (kind, outcome) {
                    (_, SequenceOutcome::Completed { .. }) => {
                        if self.state.is_process_running() {
                            self.state.set_lifecycle(SupervisorLifecycle::Running);
                            logging::log_success(ComponentId::current(), "Startup sequence completed");
                        }
                        None
                    }
                    (RunKind::Initial, SequenceOutcome::Failed { phase, reason, .. }) => {
                        self.shutdown("startup failed").await;
                        Some(SupervisorExit::StartupFailed { phase, reason })
                    }
                    (RunKind::Restart, SequenceOutcome::Failed { reason, .. }) => {
                        let record = ProcessRecord::spawn_failed(self.state.restarts(), reason);
                        self.state.begin_process(record.clone());
                        self.apply_decision(&record).await
                    }
                }
            }
        }
    }

    async fn apply_decision(&mut self, record: &ProcessRecord) -> Option<SupervisorExit> {
        let decision = self.settings.restart.decide(record, &self.state.recent_probes());

        if decision.give_up {
            let reason = decision.reason.to_string();
            logging::log_error(ComponentId::current(), "Restart policy", &reason);
            self.state.give_up(reason.clone());
            if self.settings.exit_on_give_up {
                self.shutdown("restart policy gave up").await;
                return Some(SupervisorExit::GaveUp { reason });
            }
            return None;
        }

        if decision.restart {
            component_info!(
                ComponentId::current(),
                "⏳ Restarting in {:?}: {}",
                decision.delay,
                decision.reason
            );
            self.state.set_lifecycle(SupervisorLifecycle::Restarting);
            self.schedule_restart(decision.delay);
        } else {
            component_info!(ComponentId::current(), "Workload {}, not restarting", decision.reason);
            self.state.set_lifecycle(SupervisorLifecycle::Exited);
        }
        None
    }

    fn schedule_restart(&mut self, delay: Duration) {
        if let Some(timer) = self.restart_timer.take() {
            timer.abort();
        }
        let internal = self.internal_tx.clone();
        self.restart_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = internal.send(InternalEvent::RestartDue).await;
        }));
    }

    fn spawn_sequence(&mut self, kind: RunKind) {
        let scope = match kind {
            RunKind::Initial => RunScope::Full,
            RunKind::Restart => RunScope::RepeatableOnly,
        };
        let sequencer = self.sequencer.clone();
        let internal = self.internal_tx.clone();
        self.sequence_run += 1;
        let run = self.sequence_run;

        self.sequence_task = Some(tokio::spawn(async move {
            let outcome = sequencer.run(scope).await;
            let _ = internal.send(InternalEvent::SequenceFinished { run, kind, outcome }).await;
        }));
    }

    fn cancel_monitoring(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
        }
    }

    async fn shutdown(&mut self, reason: &str) {
        logging::log_shutdown(ComponentId::current(), reason);
        self.state.set_lifecycle(SupervisorLifecycle::Stopping);

        self.cancel_monitoring();
        if let Some(keepalive) = self.keepalive.take() {
            keepalive.stop();
        }
        if let Some(task) = self.sequence_task.take() {
            task.abort();
        }
        if let Some(timer) = self.restart_timer.take() {
            timer.abort();
        }

        if self.process_manager.is_running().await {
            match self
                .process_manager
                .terminate(TerminationSignal::Terminate, self.settings.terminate_grace)
                .await
            {
                Ok(outcome) => {
                    component_info!(ComponentId::current(), "Workload stopped: {:?}", outcome);
                }
                Err(e) => logging::log_error(ComponentId::current(), "Stopping workload", &e),
            }
        }
    }
}

/// The standard startup phases for the workflow host
pub fn default_phases<F, E>(
    settings: &SupervisorSettings,
    handle: &SupervisorHandle,
    stager: Arc<F>,
    history: Arc<E>,
) -> Vec<Phase>
where
    F: FileStager + 'static,
    E: ExecutionHistory + 'static,
{
    let startup = &settings.startup;

    let datastore = move || {
        let history = history.clone();
        async move { history.ping().await }
    };

    let plan = settings.staging.clone();
    let stage = move || {
        let stager = stager.clone();
        let plan = plan.clone();
        async move {
            let report = stager.stage(&plan).await?;
            if report.is_complete() {
                Ok(())
            } else {
                Err(SupervisorError::staging(
                    "stage",
                    &plan.source_dir,
                    format!("missing {}", report.missing.join(", ")),
                ))
            }
        }
    };

    let keepalive_handle = handle.clone();
    let keepalive = move || {
        let handle = keepalive_handle.clone();
        async move { handle.start_keepalive().await.map(|_| ()) }
    };

    let start_handle = handle.clone();
    let start = move || {
        let handle = start_handle.clone();
        async move { handle.start_workload().await.map(|_| ()) }
    };

    let warmup = startup.warmup;
    let warm_up = move || async move {
        tokio::time::sleep(warmup).await;
        Ok::<(), SupervisorError>(())
    };

    let monitor_handle = handle.clone();
    let monitor = move || {
        let handle = monitor_handle.clone();
        async move { handle.start_monitoring().await }
    };

    vec![
        Phase::new("datastore", PhaseKind::Setup, datastore)
            .required(startup.datastore_required)
            .with_retry(RetryPolicy::attempts(startup.datastore_attempts, startup.datastore_backoff))
            .with_timeout(startup.datastore_timeout),
        Phase::new("stage-workflows", PhaseKind::Setup, stage).required(startup.workflows_required),
        Phase::new("keepalive", PhaseKind::Setup, keepalive).required(false),
        Phase::new("start-workload", PhaseKind::Repeatable, start)
            .with_retry(RetryPolicy::attempts(startup.start_attempts, startup.start_backoff)),
        Phase::new("warm-up", PhaseKind::Repeatable, warm_up),
        Phase::new("start-monitor", PhaseKind::Repeatable, monitor).required(false),
    ]
}
