//! Service-specific tests
//!
//! Each real service has its own test file. Process tests run real `sh`
//! children and are unix only; HTTP services are tested against `wiremock`.

mod execution_history;
mod health_prober;

// Common test utilities for services
pub mod common {
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use crate::traits::ProcessEvent;

    /// Upper bound for waiting on real child processes
    pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

    /// Helper to run async operations with timeout
    pub async fn with_timeout<T, F>(future: F) -> Result<T, tokio::time::error::Elapsed>
    where
        F: std::future::Future<Output = T>,
    {
        timeout(TEST_TIMEOUT, future).await
    }

    /// Collect events until (and including) the first `Exited`
    pub async fn events_until_exit(rx: &mut mpsc::Receiver<ProcessEvent>) -> Vec<ProcessEvent> {
        let mut events = Vec::new();
        while let Ok(Some(event)) = with_timeout(rx.recv()).await {
            let exited = matches!(event, ProcessEvent::Exited { .. });
            events.push(event);
            if exited {
                break;
            }
        }
        events
    }
}
