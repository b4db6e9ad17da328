//! Status HTTP server
//!
//! Serves the status snapshot and a liveness endpoint for the platform and the
//! keepalive pinger.

pub mod handlers;

use std::sync::Arc;

use axum::{routing::get, Router};
use shared::{component_info, ComponentId};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::error::SupervisorResult;
use crate::traits::StatusSource;

/// Build the router for a status source
pub fn router<S>(source: Arc<S>) -> Router
where
    S: StatusSource + 'static,
{
    Router::new()
        .route("/status", get(handlers::status::<S>))
        .route("/healthz", get(handlers::healthz::<S>))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .into_inner(),
        )
        .with_state(source)
}

/// Serve until the listener fails or the task is aborted
pub async fn serve<S>(listener: TcpListener, source: Arc<S>) -> SupervisorResult<()>
where
    S: StatusSource + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        component_info!(ComponentId::current(), "🌐 Status server listening on http://{}", addr);
    }
    axum::serve(listener, router(source)).await?;
    Ok(())
}
