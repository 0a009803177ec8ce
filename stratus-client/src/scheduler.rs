//! Scheduler status API client

use reqwest::Client;
use stratus_core::domain::run::RunInstance;
use stratus_core::dto::run::{CancelRunResponse, HealthStatus, RunSummary};

use crate::error::Result;
use crate::handle_response;

/// HTTP client for the scheduler status API
///
/// Runs are addressed by their logical timestamp in epoch seconds.
#[derive(Debug, Clone)]
pub struct SchedulerClient {
    /// Base URL of the scheduler (e.g., "http://localhost:8090")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl SchedulerClient {
    /// Create a new scheduler client
    ///
    /// # Example
    /// ```
    /// use stratus_client::SchedulerClient;
    ///
    /// let client = SchedulerClient::new("http://localhost:8090");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    /// Get the base URL of the scheduler
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get the scheduler health report
    pub async fn health(&self) -> Result<HealthStatus> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await?;

        handle_response(response).await
    }

    /// List all known runs, newest first
    pub async fn list_runs(&self) -> Result<Vec<RunSummary>> {
        let url = format!("{}/runs", self.base_url);
        let response = self.client.get(&url).send().await?;

        handle_response(response).await
    }

    /// Get the full report of one run
    ///
    /// # Arguments
    /// * `logical_timestamp` - Epoch seconds of the run's logical timestamp
    pub async fn get_run(&self, logical_timestamp: i64) -> Result<RunInstance> {
        let url = format!("{}/runs/{}", self.base_url, logical_timestamp);
        let response = self.client.get(&url).send().await?;

        handle_response(response).await
    }

    /// Request cancellation of an in-flight run
    pub async fn cancel_run(&self, logical_timestamp: i64) -> Result<CancelRunResponse> {
        let url = format!("{}/runs/{}/cancel", self.base_url, logical_timestamp);
        let response = self.client.post(&url).send().await?;

        handle_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[test]
    fn test_client_creation() {
        let client = SchedulerClient::new("http://localhost:8090");
        assert_eq!(client.base_url(), "http://localhost:8090");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = SchedulerClient::new("http://localhost:8090/");
        assert_eq!(client.base_url(), "http://localhost:8090");
    }

    #[tokio::test]
    async fn test_health_parses_report() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/health");
                then.status(200).json_body(json!({
                    "status": "ok",
                    "pipeline": "weather_ingest",
                    "active_runs": 2,
                    "watermark": "2023-11-28T00:00:00Z"
                }));
            })
            .await;

        let client = SchedulerClient::new(server.base_url());
        let health = client.health().await.unwrap();

        assert_eq!(health.pipeline, "weather_ingest");
        assert_eq!(health.active_runs, 2);
        assert!(health.watermark.is_some());
    }

    #[tokio::test]
    async fn test_get_run_not_found() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/runs/42");
                then.status(404)
                    .json_body(json!({ "error": "Run 42 not found" }));
            })
            .await;

        let client = SchedulerClient::new(server.base_url());
        let err = client.get_run(42).await.unwrap_err();

        assert!(err.is_not_found());
    }
}
