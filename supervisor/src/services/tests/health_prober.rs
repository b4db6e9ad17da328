//! Tests for RealHealthProber and the probe loop

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use shared::{HealthOutcome, HealthProbeResult};
use tokio::sync::{mpsc, Notify};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::services::health_prober::{start_loop, RealHealthProber};
use crate::traits::{HealthProber, MockHealthProber, ProbeTarget};

fn target(url: String, timeout_ms: u64) -> ProbeTarget {
    ProbeTarget {
        url,
        timeout: Duration::from_millis(timeout_ms),
        expect_json: true,
    }
}

async fn probe_against(template: ResponseTemplate, timeout_ms: u64) -> HealthOutcome {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/healthz"))
        .respond_with(template)
        .mount(&server)
        .await;

    let prober = RealHealthProber::new().unwrap();
    prober
        .probe(&target(format!("{}/healthz", server.uri()), timeout_ms))
        .await
        .outcome
}

#[tokio::test]
async fn test_probe_healthy_json() {
    let outcome = probe_against(
        ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "ok"})),
        1_000,
    )
    .await;

    assert_eq!(outcome, HealthOutcome::Healthy);
}

#[tokio::test]
async fn test_probe_error_status_is_degraded() {
    let outcome = probe_against(ResponseTemplate::new(503), 1_000).await;

    assert_eq!(
        outcome,
        HealthOutcome::Degraded {
            reason: "HTTP 503".to_string()
        }
    );
}

#[tokio::test]
async fn test_probe_non_json_body_is_degraded() {
    let outcome = probe_against(ResponseTemplate::new(200).set_body_string("<html>n8n</html>"), 1_000).await;

    assert!(matches!(outcome, HealthOutcome::Degraded { ref reason } if reason.contains("JSON")));
}

#[tokio::test]
async fn test_probe_timeout_is_unreachable() {
    let outcome = probe_against(
        ResponseTemplate::new(200)
            .set_body_json(serde_json::json!({"status": "ok"}))
            .set_delay(Duration::from_millis(500)),
        100,
    )
    .await;

    assert!(matches!(outcome, HealthOutcome::Unreachable { ref error } if error.contains("timed out")));
}

#[tokio::test]
async fn test_probe_connection_refused_is_unreachable() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let prober = RealHealthProber::new().unwrap();
    let result = prober
        .probe(&target(format!("http://127.0.0.1:{port}/healthz"), 1_000))
        .await;

    assert!(result.outcome.is_unreachable());
}

#[tokio::test(start_paused = true)]
async fn test_loop_probes_on_interval() {
    let mut prober = MockHealthProber::new();
    prober
        .expect_probe()
        .returning(|_| HealthProbeResult::new(HealthOutcome::Healthy, 1));
    let (tx, mut rx) = mpsc::channel(16);

    let started = tokio::time::Instant::now();
    let subscription = start_loop(
        Arc::new(prober),
        target("http://workload/healthz".to_string(), 100),
        Duration::from_millis(1_000),
        tx,
    );

    for tick in 0..3u64 {
        let event = rx.recv().await.unwrap();
        assert_eq!(event.subscription, subscription.id());
        assert_eq!(started.elapsed(), Duration::from_millis(1_000 * tick));
    }

    subscription.cancel();
}

/// Prober that blocks inside `probe` until released
struct GatedProber {
    calls: AtomicUsize,
    started: Notify,
    release: Notify,
}

#[async_trait]
impl HealthProber for GatedProber {
    async fn probe(&self, _target: &ProbeTarget) -> HealthProbeResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        self.release.notified().await;
        HealthProbeResult::new(HealthOutcome::Healthy, 1)
    }
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_first_probe_stops_loop() {
    let prober = Arc::new(GatedProber {
        calls: AtomicUsize::new(0),
        started: Notify::new(),
        release: Notify::new(),
    });
    let (tx, mut rx) = mpsc::channel(16);

    let subscription = start_loop(
        prober.clone(),
        target("http://workload/healthz".to_string(), 100),
        Duration::from_millis(1_000),
        tx,
    );

    prober.started.notified().await;
    subscription.cancel();
    prober.release.notify_one();

    // The in-flight probe still completes and is delivered
    let event = rx.recv().await.unwrap();
    assert_eq!(event.subscription, subscription.id());

    tokio::time::sleep(Duration::from_millis(5_000)).await;

    assert_eq!(prober.calls.load(Ordering::SeqCst), 1);
    assert!(rx.try_recv().is_err());
    assert!(subscription.is_finished());
    assert!(subscription.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn test_dropping_subscription_cancels_loop() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut prober = MockHealthProber::new();
    let counter = calls.clone();
    prober.expect_probe().returning(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        HealthProbeResult::new(HealthOutcome::Healthy, 1)
    });
    let (tx, mut rx) = mpsc::channel(16);

    let subscription = start_loop(
        Arc::new(prober),
        target("http://workload/healthz".to_string(), 100),
        Duration::from_millis(1_000),
        tx,
    );
    rx.recv().await.unwrap();
    drop(subscription);

    tokio::time::sleep(Duration::from_millis(5_000)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
