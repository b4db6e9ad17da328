//! Keepalive pinger
//!
//! Low-frequency GETs against the deployment's public URL so idle-timeout
//! platforms do not suspend it. Failures are logged and otherwise ignored.

use std::time::Duration;

use shared::{component_debug, component_warn, ComponentId};
use tokio::task::JoinHandle;

pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(4 * 60);

/// Where and how often to ping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepaliveSettings {
    pub url: String,
    pub interval: Duration,
}

/// Running keepalive task; stopping or dropping it ends the pings
#[derive(Debug)]
pub struct KeepaliveHandle {
    url: String,
    task: JoinHandle<()>,
}

impl KeepaliveHandle {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for KeepaliveHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start pinging; the first ping goes out after one interval
pub fn start(client: reqwest::Client, settings: KeepaliveSettings) -> KeepaliveHandle {
    let url = settings.url.clone();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + settings.interval,
            settings.interval,
        );
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match client.get(&settings.url).timeout(settings.interval).send().await {
                Ok(response) => {
                    component_debug!(
                        ComponentId::current(),
                        "🔔 Pinged {} - Status: {}",
                        settings.url,
                        response.status().as_u16()
                    );
                }
                Err(e) => {
                    component_warn!(ComponentId::current(), "🔕 Ping error to {}: {}", settings.url, e);
                }
            }
        }
    });

    KeepaliveHandle { url, task }
}
