//! Execution history from the hosted datastore
//!
//! Reads recent workflow executions through the datastore's PostgREST
//! interface using the service role key.

use std::time::Duration;

use async_trait::async_trait;
use shared::ExecutionRecord;
use url::Url;

use crate::error::{SupervisorError, SupervisorResult};
use crate::traits::ExecutionHistory;

pub const DEFAULT_EXECUTIONS_TABLE: &str = "workflow_monitoring";
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection details for the PostgREST endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatastoreEndpoint {
    pub base_url: Url,
    pub api_key: String,
    pub table: String,
}

impl DatastoreEndpoint {
    /// `GET` URL for one page of the table, newest first
    pub fn executions_url(&self, limit: usize, offset: usize) -> SupervisorResult<Url> {
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let mut url = base
            .join(&format!("rest/v1/{}", self.table))
            .map_err(|e| SupervisorError::external(format!("invalid table path: {e}")))?;
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("order", "created_at.desc")
            .append_pair("limit", &limit.to_string())
            .append_pair("offset", &offset.to_string());
        Ok(url)
    }
}

/// Real execution history client
pub struct RealExecutionHistory {
    client: reqwest::Client,
    endpoint: Option<DatastoreEndpoint>,
    timeout: Duration,
}

impl RealExecutionHistory {
    /// A missing endpoint makes every query fail with "not configured"
    pub fn new(client: reqwest::Client, endpoint: Option<DatastoreEndpoint>) -> Self {
        Self {
            client,
            endpoint,
            timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    /// Configure the per-query timeout (fluent API)
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ExecutionHistory for RealExecutionHistory {
    async fn recent_executions(&self, limit: usize, offset: usize) -> SupervisorResult<Vec<ExecutionRecord>> {
        let endpoint = self
            .endpoint
            .as_ref()
            .ok_or_else(|| SupervisorError::external("execution history store not configured"))?;
        let url = endpoint.executions_url(limit, offset)?;

        let response = self
            .client
            .get(url)
            .header("apikey", &endpoint.api_key)
            .bearer_auth(&endpoint.api_key)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| SupervisorError::external(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SupervisorError::external(format!(
                "{} responded with HTTP {}",
                endpoint.table,
                status.as_u16()
            )));
        }

        response
            .json::<Vec<ExecutionRecord>>()
            .await
            .map_err(|e| SupervisorError::external(format!("unexpected execution rows: {e}")))
    }

    async fn ping(&self) -> SupervisorResult<()> {
        self.recent_executions(1, 0).await.map(|_| ())
    }
}
