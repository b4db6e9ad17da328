//! Status endpoint handlers

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use shared::{component_warn, ComponentId};

use crate::traits::StatusSource;

/// `GET /status`: full snapshot, 503 once the restart policy has given up
pub async fn status<S>(State(source): State<Arc<S>>) -> Response
where
    S: StatusSource + 'static,
{
    match source.report().await {
        Ok(snapshot) => {
            let code = if snapshot.gave_up() {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::OK
            };
            (code, Json(snapshot)).into_response()
        }
        Err(e) => {
            component_warn!(ComponentId::current(), "Status report unavailable: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// `GET /healthz`: liveness of the supervisor loop itself
pub async fn healthz<S>(State(source): State<Arc<S>>) -> Response
where
    S: StatusSource + 'static,
{
    if source.is_alive().await {
        (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unavailable" })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SupervisorError;
    use crate::traits::MockStatusSource;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::Utc;
    use shared::{
        DefinitionsSummary, ExecutionStats, ExecutionsView, HealthView, OverallStatus, SequencerState, StatusSnapshot, SupervisorLifecycle,
    };
    use tower::ServiceExt;

    fn snapshot(lifecycle: SupervisorLifecycle, overall: OverallStatus) -> StatusSnapshot {
        StatusSnapshot {
            generated_at: Utc::now(),
            overall,
            lifecycle,
            uptime_seconds: 5,
            give_up_reason: None,
            startup: SequencerState::Completed,
            process: None,
            previous_processes: Vec::new(),
            health: HealthView::default(),
            definitions: Vec::new(),
            definitions_summary: DefinitionsSummary::default(),
            executions: ExecutionsView::Available {
                records: Vec::new(),
                stats: ExecutionStats::default(),
            },
        }
    }

    async fn get(source: MockStatusSource, uri: &str) -> (StatusCode, serde_json::Value) {
        let app = crate::web::router(Arc::new(source));
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_status_ok_while_running() {
        let mut source = MockStatusSource::new();
        source
            .expect_report()
            .returning(|| Ok(snapshot(SupervisorLifecycle::Running, OverallStatus::Healthy)));

        let (code, body) = get(source, "/status").await;

        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["overall"], "healthy");
        assert_eq!(body["uptime_seconds"], 5);
    }

    #[tokio::test]
    async fn test_status_unavailable_after_give_up() {
        let mut source = MockStatusSource::new();
        source.expect_report().returning(|| {
            let mut snapshot = snapshot(SupervisorLifecycle::GaveUp, OverallStatus::Failed);
            snapshot.give_up_reason = Some("restart limit reached".to_string());
            Ok(snapshot)
        });

        let (code, body) = get(source, "/status").await;

        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["give_up_reason"], "restart limit reached");
    }

    #[tokio::test]
    async fn test_status_reports_loop_errors() {
        let mut source = MockStatusSource::new();
        source
            .expect_report()
            .returning(|| Err(SupervisorError::LoopUnavailable));

        let (code, body) = get(source, "/status").await;

        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_healthz_follows_loop_liveness() {
        let mut alive = MockStatusSource::new();
        alive.expect_is_alive().returning(|| true);
        let (code, body) = get(alive, "/healthz").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let mut gone = MockStatusSource::new();
        gone.expect_is_alive().returning(|| false);
        let (code, _) = get(gone, "/healthz").await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
    }
}
