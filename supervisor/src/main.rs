//! Main entry point for the supervisor binary
//!
//! Resolves configuration once, wires the real service implementations into
//! the supervisor, serves the status endpoint and runs until a signal arrives.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;

use shared::{component_info, component_warn, logging, ComponentId};
use supervisor::{
    config::{self, enforced_overrides, workflow_host_schema},
    services::{RealExecutionHistory, RealFileStager, RealHealthProber, RealProcessManager},
    web, StatusReporter, Supervisor, SupervisorHandle, SupervisorSettings,
};

/// Supervisor for the n8n workflow runtime
#[derive(Parser)]
#[command(name = "supervisor")]
#[command(about = "Runs the workflow runtime with phased startup and health-gated restarts")]
pub struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Environment file to load before resolving configuration (defaults to ./.env)
    #[arg(long)]
    pub env_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    ComponentId::init_supervisor();
    logging::init_tracing_with_level(Some(&args.log_level));

    load_env_file(args.env_file.as_ref());

    let env: HashMap<String, String> = std::env::vars().collect();
    let snapshot = match config::resolve(&workflow_host_schema(), &env, &enforced_overrides()) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            logging::log_error(ComponentId::current(), "Configuration", &e);
            return ExitCode::from(1);
        }
    };

    for group in snapshot.warnings() {
        component_warn!(
            ComponentId::current(),
            "⚠️  Optional configuration missing ({}); related features are disabled",
            group
        );
    }
    component_info!(ComponentId::current(), "🔧 Resolved configuration:\n{}", snapshot);

    let settings = match SupervisorSettings::from_snapshot(&snapshot) {
        Ok(settings) => settings,
        Err(e) => {
            logging::log_error(ComponentId::current(), "Configuration", &e);
            return ExitCode::from(1);
        }
    };
    component_info!(ComponentId::current(), "🌍 Public URL: {}", settings.public_url);

    match run(settings).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            logging::log_error(ComponentId::current(), "Supervisor", &format!("{e:#}"));
            ExitCode::from(1)
        }
    }
}

fn load_env_file(path: Option<&PathBuf>) {
    let loaded = match path {
        Some(path) => dotenv::from_path(path).map(|_| path.clone()),
        None => dotenv::dotenv(),
    };
    match loaded {
        Ok(path) => {
            component_info!(ComponentId::current(), "📄 Loaded environment from {}", path.display());
        }
        Err(e) => {
            component_info!(ComponentId::current(), "No environment file loaded: {}", e);
        }
    }
}

async fn run(settings: SupervisorSettings) -> anyhow::Result<u8> {
    let status_addr = settings.status_addr;
    let history_limit = settings.history_limit;
    let plan = settings.staging.clone();

    let http = reqwest::Client::new();
    let prober = RealHealthProber::new().context("building health probe client")?;
    let history = RealExecutionHistory::new(http.clone(), settings.datastore.clone());

    let supervisor = Supervisor::new(
        settings,
        RealProcessManager::new(),
        prober,
        RealFileStager::new(),
        history,
    )
    .with_http_client(http);
    let handle = supervisor.handle();

    let reporter = StatusReporter::new(handle.clone(), supervisor.history(), supervisor.stager(), plan)
        .with_history_limit(history_limit);
    let listener = TcpListener::bind(status_addr)
        .await
        .with_context(|| format!("binding status server to {status_addr}"))?;
    let server = tokio::spawn(web::serve(listener, Arc::new(reporter)));

    tokio::spawn(forward_signals(handle));

    let exit = supervisor.run().await;
    server.abort();

    logging::log_shutdown(ComponentId::current(), &format!("{exit:?}"));
    Ok(exit.exit_code())
}

async fn forward_signals(handle: SupervisorHandle) {
    let reason = wait_for_signal().await;
    logging::log_shutdown(ComponentId::current(), reason);
    let _ = handle.shutdown().await;
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            logging::log_error(ComponentId::current(), "Signal handling", &e);
            let _ = tokio::signal::ctrl_c().await;
            return "Received Ctrl+C signal";
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => "Received Ctrl+C signal",
        _ = terminate.recv() => "Received SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "Received Ctrl+C signal"
}
