//! Test fixtures and data for supervisor tests
//!
//! Consistent settings, environments and service mocks used across suites.

use std::collections::HashMap;
use std::time::Duration;

use shared::{HealthOutcome, HealthProbeResult};
use supervisor::config::settings::StartupSettings;
use supervisor::traits::{
    LaunchSpec, MockExecutionHistory, MockFileStager, MockHealthProber, StagingReport,
};
use supervisor::{RestartPolicy, SupervisorSettings};

/// Standard test data and fixtures
pub struct TestFixtures;

impl TestFixtures {
    pub const BASE_DELAY_MS: u64 = 1_000;
    pub const MAX_DELAY_MS: u64 = 8_000;
    pub const MAX_RESTARTS: u32 = 5;
    pub const HEALTH_INTERVAL_MS: u64 = 1_000;

    /// Settings tuned for paused-clock tests: no warm-up, single attempts
    pub fn settings() -> SupervisorSettings {
        SupervisorSettings {
            launch: LaunchSpec::new("n8n", vec!["start".to_string()]),
            health_interval: Duration::from_millis(Self::HEALTH_INTERVAL_MS),
            restart: RestartPolicy {
                base_delay: Duration::from_millis(Self::BASE_DELAY_MS),
                max_delay: Duration::from_millis(Self::MAX_DELAY_MS),
                max_restarts: Self::MAX_RESTARTS,
                hung_threshold: 3,
            },
            terminate_grace: Duration::from_secs(1),
            startup: StartupSettings {
                datastore_required: false,
                datastore_attempts: 1,
                datastore_backoff: Duration::ZERO,
                datastore_timeout: Duration::from_secs(1),
                workflows_required: false,
                start_attempts: 1,
                start_backoff: Duration::ZERO,
                warmup: Duration::ZERO,
            },
            keepalive: None,
            ..SupervisorSettings::default()
        }
    }

    /// Complete environment for the workflow host schema
    pub fn full_env() -> HashMap<String, String> {
        [
            ("SUPABASE_URL", "https://project.supabase.co"),
            ("SUPABASE_SERVICE_ROLE_KEY", "service-role-secret"),
            ("GEMINI_API_KEY", "gemini-secret"),
            ("YOUTUBE_API_1", "yt-1"),
            ("YOUTUBE_API_2", "yt-2"),
            ("YOUTUBE_API_3", "yt-3"),
            ("YOUTUBE_CHANNEL_1", "channel-1"),
            ("YOUTUBE_CHANNEL_2", "channel-2"),
            ("YOUTUBE_CHANNEL_3", "channel-3"),
            ("TELEGRAM_API_KEY", "telegram-secret"),
            ("TELEGRAM_CHAT_ID", "12345"),
            ("N8N_BASIC_AUTH_USER", "admin"),
            ("N8N_BASIC_AUTH_PASSWORD", "admin-secret"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    pub fn healthy() -> HealthProbeResult {
        HealthProbeResult::new(HealthOutcome::Healthy, 2)
    }

    pub fn unreachable() -> HealthProbeResult {
        HealthProbeResult::new(
            HealthOutcome::Unreachable {
                error: "connection refused".to_string(),
            },
            0,
        )
    }

    /// Prober that always reports healthy
    pub fn healthy_prober() -> MockHealthProber {
        let mut prober = MockHealthProber::new();
        prober.expect_probe().returning(|_| Self::healthy());
        prober
    }

    /// Stager whose staging always succeeds and which reports no definitions
    pub fn stager() -> MockFileStager {
        let mut stager = MockFileStager::new();
        stager
            .expect_stage()
            .returning(|plan| {
                Ok(StagingReport {
                    copied: plan.files.clone(),
                    missing: Vec::new(),
                })
            })
            .times(0..);
        stager.expect_inspect().returning(|_| Vec::new()).times(0..);
        stager
    }

    /// Reachable history store with no rows
    pub fn history() -> MockExecutionHistory {
        let mut history = MockExecutionHistory::new();
        history.expect_ping().returning(|| Ok(())).times(0..);
        history
            .expect_recent_executions()
            .returning(|_, _| Ok(Vec::new()))
            .times(0..);
        history
    }
}
