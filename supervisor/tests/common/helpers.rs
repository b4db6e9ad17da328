//! Test helpers and builder patterns for supervisor tests
//!
//! `ScriptedProcessManager` plays back a list of process lifetimes so the
//! supervisor loop can be driven deterministically on a paused clock.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use shared::TerminationSignal;
use supervisor::core::SupervisorView;
use supervisor::traits::{
    LaunchSpec, MockExecutionHistory, MockFileStager, MockHealthProber, ProcessEvent, ProcessInfo, ProcessManager,
    TerminationOutcome,
};
use supervisor::{Supervisor, SupervisorError, SupervisorExit, SupervisorHandle, SupervisorResult, SupervisorSettings};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use super::fixtures::TestFixtures;

/// One scripted process lifetime
#[derive(Debug, Clone)]
pub enum Step {
    /// Exit with `code` after running for `after`
    Exit { after: Duration, code: i32 },
    /// Print `marker`, then exit with code 1 after `after`
    Marker { after: Duration, marker: String },
    /// Run until terminated
    Run,
    /// `spawn` itself fails
    FailSpawn,
}

#[derive(Default)]
struct Script {
    steps: VecDeque<Step>,
    fallback: Option<Step>,
    spawns: Vec<Instant>,
    exits: Vec<Instant>,
    terminations: usize,
    running: Option<(Uuid, mpsc::Sender<ProcessEvent>)>,
    next_pid: u32,
    /// Signals whose delivery fails, leaving the process running
    refused: Vec<TerminationSignal>,
}

/// Process manager that plays back scripted lifetimes
#[derive(Clone)]
pub struct ScriptedProcessManager {
    script: Arc<Mutex<Script>>,
}

impl ScriptedProcessManager {
    /// Once `steps` run out every further spawn uses `fallback`
    pub fn new(steps: Vec<Step>, fallback: Step) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                steps: steps.into(),
                fallback: Some(fallback),
                next_pid: 1000,
                ..Script::default()
            })),
        }
    }

    /// Make `terminate` fail for each of `signals`
    pub fn refusing(self, signals: &[TerminationSignal]) -> Self {
        self.script.lock().unwrap().refused = signals.to_vec();
        self
    }

    pub fn spawn_count(&self) -> usize {
        self.script.lock().unwrap().spawns.len()
    }

    pub fn terminations(&self) -> usize {
        self.script.lock().unwrap().terminations
    }

    /// Time between each exit and the following successful spawn
    pub fn restart_gaps(&self) -> Vec<Duration> {
        let script = self.script.lock().unwrap();
        script
            .exits
            .iter()
            .zip(script.spawns.iter().skip(1))
            .map(|(exit, spawn)| spawn.duration_since(*exit))
            .collect()
    }

    fn finish(script: &Arc<Mutex<Script>>, record_id: Uuid) -> Option<mpsc::Sender<ProcessEvent>> {
        let mut script = script.lock().unwrap();
        match script.running.take() {
            Some((id, events)) if id == record_id => {
                script.exits.push(Instant::now());
                Some(events)
            }
            other => {
                script.running = other;
                None
            }
        }
    }
}

#[async_trait]
impl ProcessManager for ScriptedProcessManager {
    async fn spawn(
        &self,
        _spec: &LaunchSpec,
        record_id: Uuid,
        events: mpsc::Sender<ProcessEvent>,
    ) -> SupervisorResult<ProcessInfo> {
        let (step, pid) = {
            let mut script = self.script.lock().unwrap();
            if script.running.is_some() {
                return Err(SupervisorError::ProcessAlreadyRunning { pid: None });
            }
            let step = match script.steps.pop_front() {
                Some(step) => step,
                None => script.fallback.clone().unwrap_or(Step::Run),
            };
            if matches!(step, Step::FailSpawn) {
                return Err(SupervisorError::ProcessSpawn {
                    command: "n8n start".to_string(),
                    message: "No such file or directory".to_string(),
                });
            }
            script.spawns.push(Instant::now());
            script.running = Some((record_id, events));
            script.next_pid += 1;
            (step, script.next_pid)
        };

        let scheduled = match step {
            Step::Exit { after, code } => Some((after, code, None)),
            Step::Marker { after, marker } => Some((after, 1, Some(marker))),
            Step::Run | Step::FailSpawn => None,
        };

        if let Some((after, code, marker)) = scheduled {
            let script = self.script.clone();
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                let Some(events) = ScriptedProcessManager::finish(&script, record_id) else {
                    return;
                };
                if let Some(marker) = marker {
                    let _ = events
                        .send(ProcessEvent::MarkerDetected {
                            record_id,
                            line: format!("ValidationError: {marker}"),
                            marker,
                        })
                        .await;
                }
                let _ = events
                    .send(ProcessEvent::Exited {
                        record_id,
                        code: Some(code),
                        signal: None,
                    })
                    .await;
            });
        }

        Ok(ProcessInfo {
            record_id,
            pid: Some(pid),
        })
    }

    async fn terminate(&self, signal: TerminationSignal, _grace: Duration) -> SupervisorResult<TerminationOutcome> {
        let number = match signal {
            TerminationSignal::Terminate => 15,
            TerminationSignal::Interrupt => 2,
            TerminationSignal::Kill => 9,
        };
        let running = {
            let mut script = self.script.lock().unwrap();
            if script.running.is_some() && script.refused.contains(&signal) {
                return Err(SupervisorError::ProcessExit {
                    message: format!("failed to send {signal}: EPERM"),
                });
            }
            let running = script.running.take();
            if running.is_some() {
                script.terminations += 1;
                script.exits.push(Instant::now());
            }
            running
        };

        match running {
            Some((record_id, events)) => {
                let _ = events
                    .send(ProcessEvent::Exited {
                        record_id,
                        code: None,
                        signal: Some(number),
                    })
                    .await;
                Ok(TerminationOutcome::Exited {
                    code: None,
                    signal: Some(number),
                })
            }
            None => Ok(TerminationOutcome::NotRunning),
        }
    }

    async fn is_running(&self) -> bool {
        self.script.lock().unwrap().running.is_some()
    }
}

/// Builder for supervisors wired to scripted and mocked services
pub struct SupervisorBuilder {
    settings: SupervisorSettings,
    process_manager: ScriptedProcessManager,
    prober: MockHealthProber,
    stager: MockFileStager,
    history: MockExecutionHistory,
}

impl SupervisorBuilder {
    /// Defaults: every spawn runs until terminated, probes are healthy
    pub fn new() -> Self {
        Self {
            settings: TestFixtures::settings(),
            process_manager: ScriptedProcessManager::new(Vec::new(), Step::Run),
            prober: TestFixtures::healthy_prober(),
            stager: TestFixtures::stager(),
            history: TestFixtures::history(),
        }
    }

    pub fn with_settings(mut self, configure: impl FnOnce(&mut SupervisorSettings)) -> Self {
        configure(&mut self.settings);
        self
    }

    pub fn with_script(mut self, steps: Vec<Step>, fallback: Step) -> Self {
        self.process_manager = ScriptedProcessManager::new(steps, fallback);
        self
    }

    pub fn refusing(mut self, signals: &[TerminationSignal]) -> Self {
        self.process_manager = self.process_manager.refusing(signals);
        self
    }

    pub fn with_prober(mut self, prober: MockHealthProber) -> Self {
        self.prober = prober;
        self
    }

    pub fn with_history(mut self, history: MockExecutionHistory) -> Self {
        self.history = history;
        self
    }

    /// Start the loop on the current runtime
    pub fn spawn(self) -> RunningSupervisor {
        let process_manager = self.process_manager.clone();
        let supervisor = Supervisor::new(
            self.settings,
            self.process_manager,
            self.prober,
            self.stager,
            self.history,
        );
        let handle = supervisor.handle();

        RunningSupervisor {
            handle,
            process_manager,
            task: tokio::spawn(supervisor.run()),
        }
    }
}

/// A supervisor loop running in the background
pub struct RunningSupervisor {
    pub handle: SupervisorHandle,
    pub process_manager: ScriptedProcessManager,
    pub task: JoinHandle<SupervisorExit>,
}

impl RunningSupervisor {
    /// Ask for shutdown and wait for the loop to return
    pub async fn stop(self) -> SupervisorExit {
        self.handle.shutdown().await.unwrap();
        self.task.await.unwrap()
    }
}

/// Common test helper functions
pub struct TestHelpers;

impl TestHelpers {
    /// Poll the loop view until `predicate` holds, panicking after `limit` of (virtual) time
    pub async fn wait_for_view<F>(handle: &SupervisorHandle, limit: Duration, predicate: F) -> SupervisorView
    where
        F: Fn(&SupervisorView) -> bool,
    {
        let deadline = Instant::now() + limit;
        loop {
            let view = handle.view().await.unwrap();
            if predicate(&view) {
                return view;
            }
            assert!(Instant::now() < deadline, "condition not reached, last view: {view:#?}");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Whether `actual` is `expected` within a few milliseconds of scheduling slack
    pub fn close_to(actual: Duration, expected: Duration) -> bool {
        actual >= expected && actual <= expected + Duration::from_millis(60)
    }
}
