//! Workflow host schema and typed supervisor settings
//!
//! The schema lists every key the deployment recognises, grouped by the
//! external service it belongs to. `SupervisorSettings` is the typed view the
//! supervisor is built from.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use shared::StdioPolicy;
use url::Url;

use super::{ConfigError, ConfigSchema, ConfigSnapshot, KeySpec, Severity};
use crate::core::restart_policy::{
    RestartPolicy, DEFAULT_BASE_DELAY, DEFAULT_HUNG_THRESHOLD, DEFAULT_MAX_DELAY, DEFAULT_MAX_RESTARTS,
};
use crate::core::status::DEFAULT_HISTORY_LIMIT;
use crate::services::execution_history::{DatastoreEndpoint, DEFAULT_EXECUTIONS_TABLE, DEFAULT_QUERY_TIMEOUT};
use crate::services::file_stager::DEFAULT_WORKFLOW_FILES;
use crate::services::keepalive::{KeepaliveSettings, DEFAULT_KEEPALIVE_INTERVAL};
use crate::services::process_output_handler::parse_markers;
use crate::traits::{LaunchSpec, ProbeTarget, StagingPlan};

pub const DEFAULT_ERROR_MARKERS: &str = "X-Forwarded-For,ERR_ERL_UNEXPECTED_X_FORWARDED_FOR";
pub const DEFAULT_WORKLOAD_PORT: u16 = 5678;
pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_millis(30_000);
pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_millis(15_000);
pub const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_millis(10_000);
pub const DEFAULT_MONITOR_WARMUP: Duration = Duration::from_millis(90_000);
pub const DEFAULT_PHASE_BACKOFF: Duration = Duration::from_millis(2_000);
pub const DEFAULT_START_ATTEMPTS: u32 = 3;
pub const DEFAULT_DATASTORE_ATTEMPTS: u32 = 5;

/// Every key the workflow host recognises
pub fn workflow_host_schema() -> ConfigSchema {
    ConfigSchema::new()
        .with_category("supabase", Severity::Fatal)
        .with_category("ai", Severity::Fatal)
        .with_category("youtube", Severity::Warning)
        .with_category("telegram", Severity::Warning)
        .with_category("n8n", Severity::Warning)
        .with_category("workload", Severity::Fatal)
        .with_category("supervisor", Severity::Fatal)
        .with_category("platform", Severity::Warning)
        // External services the workflows depend on
        .key(KeySpec::text("SUPABASE_URL").required().in_category("supabase"))
        .key(KeySpec::text("SUPABASE_SERVICE_ROLE_KEY").required().in_category("supabase"))
        .key(KeySpec::text("SUPABASE_ANON_KEY").in_category("supabase"))
        .key(KeySpec::text("GEMINI_API_KEY").required().in_category("ai"))
        .key(KeySpec::text("YOUTUBE_API_1").required().in_category("youtube"))
        .key(KeySpec::text("YOUTUBE_API_2").required().in_category("youtube"))
        .key(KeySpec::text("YOUTUBE_API_3").required().in_category("youtube"))
        .key(KeySpec::text("YOUTUBE_CHANNEL_1").required().in_category("youtube"))
        .key(KeySpec::text("YOUTUBE_CHANNEL_2").required().in_category("youtube"))
        .key(KeySpec::text("YOUTUBE_CHANNEL_3").required().in_category("youtube"))
        .key(KeySpec::text("TELEGRAM_API_KEY").required().in_category("telegram"))
        .key(KeySpec::text("TELEGRAM_CHAT_ID").required().in_category("telegram"))
        .key(KeySpec::text("N8N_BASIC_AUTH_USER").required().in_category("n8n"))
        .key(KeySpec::text("N8N_BASIC_AUTH_PASSWORD").required().in_category("n8n"))
        // Workload environment
        .key(KeySpec::text("N8N_HOST").with_default("0.0.0.0").in_category("workload"))
        .key(KeySpec::number("N8N_PORT").with_default(DEFAULT_WORKLOAD_PORT.to_string()).in_category("workload"))
        .key(KeySpec::text("N8N_PROTOCOL").with_default("http").in_category("workload"))
        .key(KeySpec::text("EXECUTIONS_PROCESS").with_default("main").in_category("workload"))
        .key(KeySpec::flag("N8N_RUNNERS_ENABLED").with_default("true").in_category("workload"))
        .key(KeySpec::flag("N8N_TRUST_PROXY").with_default("true").in_category("workload"))
        .key(KeySpec::flag("N8N_DIAGNOSTICS_ENABLED").with_default("false").in_category("workload"))
        .key(KeySpec::text("WEBHOOK_URL").in_category("platform"))
        .key(KeySpec::text("RAILWAY_PUBLIC_HOST").in_category("platform"))
        .key(KeySpec::text("HEROKU_APP_NAME").in_category("platform"))
        .key(KeySpec::number("PORT").in_category("platform"))
        // Supervisor behaviour
        .key(supervisor_key(KeySpec::text("WORKLOAD_COMMAND").with_default("n8n")))
        .key(supervisor_key(KeySpec::text("WORKLOAD_ARGS").with_default("start")))
        .key(supervisor_key(KeySpec::text("STDIO_MODE").with_default(StdioPolicy::Capture.to_string())))
        .key(supervisor_key(KeySpec::text("ERROR_MARKERS").with_default(DEFAULT_ERROR_MARKERS)))
        .key(supervisor_key(KeySpec::text("HEALTH_URL")))
        .key(supervisor_key(millis_key("HEALTH_INTERVAL_MS", DEFAULT_HEALTH_INTERVAL)))
        .key(supervisor_key(millis_key("HEALTH_TIMEOUT_MS", DEFAULT_HEALTH_TIMEOUT)))
        .key(supervisor_key(KeySpec::number("HUNG_THRESHOLD").with_default(DEFAULT_HUNG_THRESHOLD.to_string())))
        .key(supervisor_key(millis_key("RESTART_BASE_DELAY_MS", DEFAULT_BASE_DELAY)))
        .key(supervisor_key(millis_key("RESTART_MAX_DELAY_MS", DEFAULT_MAX_DELAY)))
        .key(supervisor_key(KeySpec::number("MAX_RESTARTS").with_default(DEFAULT_MAX_RESTARTS.to_string())))
        .key(supervisor_key(millis_key("TERMINATE_GRACE_MS", DEFAULT_TERMINATE_GRACE)))
        .key(supervisor_key(KeySpec::flag("EXIT_ON_GIVE_UP").with_default("false")))
        .key(supervisor_key(KeySpec::number("START_ATTEMPTS").with_default(DEFAULT_START_ATTEMPTS.to_string())))
        .key(supervisor_key(millis_key("START_BACKOFF_MS", DEFAULT_PHASE_BACKOFF)))
        .key(supervisor_key(KeySpec::flag("DATASTORE_REQUIRED").with_default("false")))
        .key(supervisor_key(
            KeySpec::number("DATASTORE_ATTEMPTS").with_default(DEFAULT_DATASTORE_ATTEMPTS.to_string()),
        ))
        .key(supervisor_key(millis_key("DATASTORE_BACKOFF_MS", DEFAULT_PHASE_BACKOFF)))
        .key(supervisor_key(millis_key("DATASTORE_TIMEOUT_MS", DEFAULT_QUERY_TIMEOUT)))
        .key(supervisor_key(KeySpec::flag("WORKFLOWS_REQUIRED").with_default("false")))
        .key(supervisor_key(millis_key("MONITOR_WARMUP_MS", DEFAULT_MONITOR_WARMUP)))
        .key(supervisor_key(KeySpec::text("KEEPALIVE_URL")))
        .key(supervisor_key(millis_key("KEEPALIVE_INTERVAL_MS", DEFAULT_KEEPALIVE_INTERVAL)))
        .key(supervisor_key(KeySpec::text("STATUS_HOST").with_default("0.0.0.0")))
        .key(supervisor_key(KeySpec::number("STATUS_PORT").with_default("3000")))
        .key(supervisor_key(KeySpec::text("EXECUTIONS_TABLE").with_default(DEFAULT_EXECUTIONS_TABLE)))
        .key(supervisor_key(
            KeySpec::number("STATUS_HISTORY_LIMIT").with_default(DEFAULT_HISTORY_LIMIT.to_string()),
        ))
        .key(supervisor_key(KeySpec::text("WORKFLOW_FILES").with_default(DEFAULT_WORKFLOW_FILES.join(","))))
        .key(supervisor_key(KeySpec::text("WORKFLOW_SOURCE_DIR").with_default(".")))
        .key(supervisor_key(KeySpec::text("WORKFLOW_DEST_DIR").with_default(".n8n/workflows")))
}

fn supervisor_key(spec: KeySpec) -> KeySpec {
    spec.in_category("supervisor")
}

fn millis_key(name: &str, default: Duration) -> KeySpec {
    KeySpec::number(name).with_default(default.as_millis().to_string())
}

/// Settings the workload must always see, whatever `.env` says
pub fn enforced_overrides() -> HashMap<String, String> {
    HashMap::from([("N8N_TRUST_PROXY".to_string(), "true".to_string())])
}

/// Public URL of the deployment, from the most specific platform hint available
pub fn public_url(snapshot: &ConfigSnapshot) -> String {
    if let Some(host) = snapshot.text("RAILWAY_PUBLIC_HOST") {
        format!("https://{host}")
    } else if let Some(app) = snapshot.text("HEROKU_APP_NAME") {
        format!("https://{app}.herokuapp.com")
    } else if let Some(url) = snapshot.text("WEBHOOK_URL") {
        url.to_string()
    } else if let Some(port) = snapshot.number("PORT") {
        format!("http://localhost:{port}")
    } else {
        "http://localhost:8080".to_string()
    }
}

/// Knobs for the default startup phases
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupSettings {
    pub datastore_required: bool,
    pub datastore_attempts: u32,
    pub datastore_backoff: Duration,
    pub datastore_timeout: Duration,
    pub workflows_required: bool,
    pub start_attempts: u32,
    pub start_backoff: Duration,
    pub warmup: Duration,
}

impl Default for StartupSettings {
    fn default() -> Self {
        Self {
            datastore_required: false,
            datastore_attempts: DEFAULT_DATASTORE_ATTEMPTS,
            datastore_backoff: DEFAULT_PHASE_BACKOFF,
            datastore_timeout: DEFAULT_QUERY_TIMEOUT,
            workflows_required: false,
            start_attempts: DEFAULT_START_ATTEMPTS,
            start_backoff: DEFAULT_PHASE_BACKOFF,
            warmup: DEFAULT_MONITOR_WARMUP,
        }
    }
}

/// Typed supervisor configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorSettings {
    pub launch: LaunchSpec,
    pub health_target: ProbeTarget,
    pub health_interval: Duration,
    pub restart: RestartPolicy,
    pub terminate_grace: Duration,
    pub exit_on_give_up: bool,
    pub startup: StartupSettings,
    pub staging: StagingPlan,
    pub datastore: Option<DatastoreEndpoint>,
    pub keepalive: Option<KeepaliveSettings>,
    pub status_addr: SocketAddr,
    pub history_limit: usize,
    pub public_url: String,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            launch: LaunchSpec::new("n8n", vec!["start".to_string()])
                .with_markers(parse_markers(DEFAULT_ERROR_MARKERS)),
            health_target: ProbeTarget {
                url: format!("http://localhost:{DEFAULT_WORKLOAD_PORT}/healthz"),
                timeout: DEFAULT_HEALTH_TIMEOUT,
                expect_json: true,
            },
            health_interval: DEFAULT_HEALTH_INTERVAL,
            restart: RestartPolicy::default(),
            terminate_grace: DEFAULT_TERMINATE_GRACE,
            exit_on_give_up: false,
            startup: StartupSettings::default(),
            staging: StagingPlan {
                source_dir: PathBuf::from("."),
                dest_dir: PathBuf::from(".n8n/workflows"),
                files: DEFAULT_WORKFLOW_FILES.iter().map(|f| f.to_string()).collect(),
            },
            datastore: None,
            keepalive: None,
            status_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            history_limit: DEFAULT_HISTORY_LIMIT,
            public_url: "http://localhost:8080".to_string(),
        }
    }
}

impl SupervisorSettings {
    pub fn from_snapshot(snapshot: &ConfigSnapshot) -> Result<Self, ConfigError> {
        let stdio_raw = text_or(snapshot, "STDIO_MODE", "capture");
        let stdio: StdioPolicy = stdio_raw
            .parse()
            .map_err(|e: shared::SharedError| invalid("STDIO_MODE", stdio_raw, e))?;

        let launch = LaunchSpec::new(
            text_or(snapshot, "WORKLOAD_COMMAND", "n8n"),
            text_or(snapshot, "WORKLOAD_ARGS", "start")
                .split_whitespace()
                .map(str::to_string)
                .collect(),
        )
        .with_env(snapshot.to_env())
        .with_stdio(stdio)
        .with_markers(parse_markers(text_or(snapshot, "ERROR_MARKERS", DEFAULT_ERROR_MARKERS)));

        let workload_port = unsigned(snapshot, "N8N_PORT", u64::from(DEFAULT_WORKLOAD_PORT))?;
        let health_url = match snapshot.text("HEALTH_URL") {
            Some(url) => parse_url("HEALTH_URL", url)?.to_string(),
            None => format!("http://localhost:{workload_port}/healthz"),
        };

        let restart = RestartPolicy {
            base_delay: millis(snapshot, "RESTART_BASE_DELAY_MS", DEFAULT_BASE_DELAY)?,
            max_delay: millis(snapshot, "RESTART_MAX_DELAY_MS", DEFAULT_MAX_DELAY)?,
            max_restarts: count(snapshot, "MAX_RESTARTS", DEFAULT_MAX_RESTARTS)?,
            hung_threshold: unsigned(snapshot, "HUNG_THRESHOLD", DEFAULT_HUNG_THRESHOLD as u64)? as usize,
        };

        let startup = StartupSettings {
            datastore_required: snapshot.flag("DATASTORE_REQUIRED").unwrap_or(false),
            datastore_attempts: count(snapshot, "DATASTORE_ATTEMPTS", DEFAULT_DATASTORE_ATTEMPTS)?,
            datastore_backoff: millis(snapshot, "DATASTORE_BACKOFF_MS", DEFAULT_PHASE_BACKOFF)?,
            datastore_timeout: millis(snapshot, "DATASTORE_TIMEOUT_MS", DEFAULT_QUERY_TIMEOUT)?,
            workflows_required: snapshot.flag("WORKFLOWS_REQUIRED").unwrap_or(false),
            start_attempts: count(snapshot, "START_ATTEMPTS", DEFAULT_START_ATTEMPTS)?,
            start_backoff: millis(snapshot, "START_BACKOFF_MS", DEFAULT_PHASE_BACKOFF)?,
            warmup: millis(snapshot, "MONITOR_WARMUP_MS", DEFAULT_MONITOR_WARMUP)?,
        };

        let staging = StagingPlan {
            source_dir: PathBuf::from(text_or(snapshot, "WORKFLOW_SOURCE_DIR", ".")),
            dest_dir: PathBuf::from(text_or(snapshot, "WORKFLOW_DEST_DIR", ".n8n/workflows")),
            files: text_or(snapshot, "WORKFLOW_FILES", "")
                .split(',')
                .map(str::trim)
                .filter(|file| !file.is_empty())
                .map(str::to_string)
                .collect(),
        };

        let datastore = match (snapshot.text("SUPABASE_URL"), snapshot.text("SUPABASE_SERVICE_ROLE_KEY")) {
            (Some(url), Some(key)) => Some(DatastoreEndpoint {
                base_url: parse_url("SUPABASE_URL", url)?,
                api_key: key.to_string(),
                table: text_or(snapshot, "EXECUTIONS_TABLE", DEFAULT_EXECUTIONS_TABLE).to_string(),
            }),
            _ => None,
        };

        let public_url = public_url(snapshot);
        let keepalive_interval = positive_millis(snapshot, "KEEPALIVE_INTERVAL_MS", DEFAULT_KEEPALIVE_INTERVAL)?;
        let keepalive_url = match snapshot.text("KEEPALIVE_URL") {
            Some(url) => Some(parse_url("KEEPALIVE_URL", url)?.to_string()),
            None if snapshot.text("RAILWAY_PUBLIC_HOST").is_some() => Some(public_url.clone()),
            None => None,
        };

        let status_port = unsigned(snapshot, "STATUS_PORT", 3000)?;
        let status_port = u16::try_from(status_port)
            .map_err(|_| invalid("STATUS_PORT", &status_port.to_string(), "not a valid port"))?;
        let status_addr = socket_addr(text_or(snapshot, "STATUS_HOST", "0.0.0.0"), status_port)?;

        Ok(Self {
            launch,
            health_target: ProbeTarget {
                url: health_url,
                timeout: positive_millis(snapshot, "HEALTH_TIMEOUT_MS", DEFAULT_HEALTH_TIMEOUT)?,
                expect_json: true,
            },
            health_interval: positive_millis(snapshot, "HEALTH_INTERVAL_MS", DEFAULT_HEALTH_INTERVAL)?,
            restart,
            terminate_grace: millis(snapshot, "TERMINATE_GRACE_MS", DEFAULT_TERMINATE_GRACE)?,
            exit_on_give_up: snapshot.flag("EXIT_ON_GIVE_UP").unwrap_or(false),
            startup,
            staging,
            datastore,
            keepalive: keepalive_url.map(|url| KeepaliveSettings {
                url,
                interval: keepalive_interval,
            }),
            status_addr,
            history_limit: unsigned(snapshot, "STATUS_HISTORY_LIMIT", DEFAULT_HISTORY_LIMIT as u64)? as usize,
            public_url,
        })
    }
}

fn text_or<'a>(snapshot: &'a ConfigSnapshot, key: &str, default: &'a str) -> &'a str {
    snapshot.text(key).unwrap_or(default)
}

fn invalid(key: &str, value: &str, reason: impl std::fmt::Display) -> ConfigError {
    ConfigError::InvalidSetting {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn unsigned(snapshot: &ConfigSnapshot, key: &str, default: u64) -> Result<u64, ConfigError> {
    match snapshot.number(key) {
        Some(n) => u64::try_from(n).map_err(|_| invalid(key, &n.to_string(), "must not be negative")),
        None => Ok(default),
    }
}

fn count(snapshot: &ConfigSnapshot, key: &str, default: u32) -> Result<u32, ConfigError> {
    let value = unsigned(snapshot, key, u64::from(default))?;
    u32::try_from(value).map_err(|_| invalid(key, &value.to_string(), "too large"))
}

fn millis(snapshot: &ConfigSnapshot, key: &str, default: Duration) -> Result<Duration, ConfigError> {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    unsigned(snapshot, key, default_ms).map(Duration::from_millis)
}

fn positive_millis(snapshot: &ConfigSnapshot, key: &str, default: Duration) -> Result<Duration, ConfigError> {
    let value = millis(snapshot, key, default)?;
    if value.is_zero() {
        return Err(invalid(key, "0", "must be greater than zero"));
    }
    Ok(value)
}

/// Literal IPs (including bare IPv6) first, then a name lookup such as `localhost`
fn socket_addr(host: &str, port: u16) -> Result<SocketAddr, ConfigError> {
    let trimmed = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = trimmed.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    (host, port)
        .to_socket_addrs()
        .map_err(|e| invalid("STATUS_HOST", host, e))?
        .next()
        .ok_or_else(|| invalid("STATUS_HOST", host, "resolved to no address"))
}

fn parse_url(key: &str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| invalid(key, raw, e))
}
