//! Tests for RealExecutionHistory against a mocked PostgREST endpoint

use std::time::Duration;

use serde_json::json;
use url::Url;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::error::SupervisorError;
use crate::services::execution_history::{DatastoreEndpoint, RealExecutionHistory};
use crate::traits::ExecutionHistory;

fn history(server: &MockServer) -> RealExecutionHistory {
    let endpoint = DatastoreEndpoint {
        base_url: Url::parse(&server.uri()).unwrap(),
        api_key: "service-role-key".to_string(),
        table: "workflow_monitoring".to_string(),
    };
    RealExecutionHistory::new(reqwest::Client::new(), Some(endpoint))
}

#[tokio::test]
async fn test_recent_executions_parses_rows() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/workflow_monitoring"))
        .and(query_param("order", "created_at.desc"))
        .and(query_param("limit", "2"))
        .and(query_param("offset", "0"))
        .and(header("apikey", "service-role-key"))
        .and(header("authorization", "Bearer service-role-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 2, "status": "success", "duration_ms": 1200, "created_at": "2024-05-01T10:00:00Z"},
            {"id": "abc", "status": "error", "duration_ms": null, "created_at": "2024-05-01T09:00:00Z"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let records = history(&server).recent_executions(2, 0).await.unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].status, "success");
    assert_eq!(records[0].duration_ms, Some(1200));
    assert_eq!(records[1].status, "error");
}

#[tokio::test]
async fn test_error_status_is_external_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let result = history(&server).ping().await;

    match result {
        Err(SupervisorError::ExternalQuery { message }) => assert!(message.contains("401")),
        other => panic!("expected ExternalQuery, got {other:?}"),
    }
}

#[tokio::test]
async fn test_slow_store_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let result = history(&server)
        .with_timeout(Duration::from_millis(100))
        .recent_executions(10, 0)
        .await;

    assert!(matches!(result, Err(SupervisorError::ExternalQuery { .. })));
}

#[tokio::test]
async fn test_unconfigured_store_fails_without_request() {
    let history = RealExecutionHistory::new(reqwest::Client::new(), None);

    let result = history.recent_executions(10, 0).await;

    match result {
        Err(SupervisorError::ExternalQuery { message }) => assert!(message.contains("not configured")),
        other => panic!("expected ExternalQuery, got {other:?}"),
    }
}
