//! HTTP health probing of the workload
//!
//! `RealHealthProber` performs single probes; [`start_loop`] drives any prober
//! on an interval and publishes results tagged with a subscription id.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use shared::{component_debug, ComponentId, HealthOutcome, HealthProbeResult};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use crate::error::{SupervisorError, SupervisorResult};
use crate::traits::{HealthProber, ProbeTarget};

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

/// Real health prober backed by reqwest
pub struct RealHealthProber {
    client: reqwest::Client,
}

impl RealHealthProber {
    pub fn new() -> SupervisorResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| SupervisorError::HealthProbe { message: e.to_string() })?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HealthProber for RealHealthProber {
    async fn probe(&self, target: &ProbeTarget) -> HealthProbeResult {
        let started = Instant::now();
        let response = self.client.get(&target.url).timeout(target.timeout).send().await;

        let outcome = match response {
            Err(e) if e.is_timeout() => HealthOutcome::Unreachable {
                error: format!("timed out after {}ms", target.timeout.as_millis()),
            },
            Err(e) => HealthOutcome::Unreachable { error: e.to_string() },
            Ok(response) if !response.status().is_success() => HealthOutcome::Degraded {
                reason: format!("HTTP {}", response.status().as_u16()),
            },
            Ok(response) if target.expect_json => match response.json::<serde_json::Value>().await {
                Ok(_) => HealthOutcome::Healthy,
                Err(e) => HealthOutcome::Degraded {
                    reason: format!("invalid JSON body: {e}"),
                },
            },
            Ok(_) => HealthOutcome::Healthy,
        };

        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        HealthProbeResult::new(outcome, latency_ms)
    }
}

/// A probe result tagged with the loop that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeEvent {
    pub subscription: u64,
    pub result: HealthProbeResult,
}

/// Handle to a running probe loop
///
/// Cancelling stops further ticks; a probe already in flight still completes
/// and its result is still delivered. Dropping the handle cancels the loop.
#[derive(Debug)]
pub struct ProbeSubscription {
    id: u64,
    cancelled: Arc<AtomicBool>,
    wake: Arc<Notify>,
    task: JoinHandle<()>,
}

impl ProbeSubscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ProbeSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Probe `target` every `interval`, measured from when the previous probe settled
///
/// The first probe fires immediately.
pub fn start_loop<P>(
    prober: Arc<P>,
    target: ProbeTarget,
    interval: Duration,
    sink: mpsc::Sender<ProbeEvent>,
) -> ProbeSubscription
where
    P: HealthProber + ?Sized + 'static,
{
    let id = NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed);
    let cancelled = Arc::new(AtomicBool::new(false));
    let wake = Arc::new(Notify::new());

    let task = tokio::spawn({
        let cancelled = cancelled.clone();
        let wake = wake.clone();
        async move {
            component_debug!(ComponentId::current(), "🩺 Probe loop {} started for {}", id, target.url);

            while !cancelled.load(Ordering::SeqCst) {
                let result = prober.probe(&target).await;
                if sink.send(ProbeEvent { subscription: id, result }).await.is_err() {
                    break;
                }
                if cancelled.load(Ordering::SeqCst) {
                    break;
                }

                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = wake.notified() => {}
                }
            }

            component_debug!(ComponentId::current(), "🩺 Probe loop {} stopped", id);
        }
    });

    ProbeSubscription {
        id,
        cancelled,
        wake,
        task,
    }
}
