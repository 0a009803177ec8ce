//! Weather API client

use reqwest::Client;
use tracing::debug;

use crate::error::Result;
use crate::{handle_empty_response, handle_response};

/// HTTP client for the remote weather API
///
/// Every request is `GET <endpoint>?lat=<f>&lon=<f>&appid=<key>`, optionally
/// with `dt=<epoch seconds>` to pin the request to a logical timestamp.
#[derive(Clone)]
pub struct WeatherClient {
    /// Full endpoint URL (e.g., "https://api.openweathermap.org/data/3.0/onecall")
    endpoint: String,
    /// API credential sent as `appid`
    api_key: String,
    /// HTTP client instance
    client: Client,
}

impl WeatherClient {
    /// Create a new weather client with a default HTTP client
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::with_client(endpoint, api_key, Client::new())
    }

    /// Create a new weather client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        client: Client,
    ) -> Self {
        let endpoint = endpoint.into();
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Get the endpoint URL
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Fetch the raw JSON payload for a coordinate
    ///
    /// # Arguments
    /// * `latitude` / `longitude` - Coordinates of the location
    /// * `at` - Optional epoch seconds forwarded as `dt`
    pub async fn current(
        &self,
        latitude: f64,
        longitude: f64,
        at: Option<i64>,
    ) -> Result<serde_json::Value> {
        debug!("Fetching weather for ({}, {})", latitude, longitude);

        let mut query = self.coordinates(latitude, longitude);
        if let Some(dt) = at {
            query.push(("dt", dt.to_string()));
        }

        let response = self
            .client
            .get(&self.endpoint)
            .query(&query)
            .send()
            .await?;

        handle_response(response).await
    }

    /// Check that the API answers with a success status for a reference coordinate
    pub async fn probe(&self, latitude: f64, longitude: f64) -> Result<()> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&self.coordinates(latitude, longitude))
            .send()
            .await?;

        handle_empty_response(response).await
    }

    fn coordinates(&self, latitude: f64, longitude: f64) -> Vec<(&'static str, String)> {
        vec![
            ("lat", latitude.to_string()),
            ("lon", longitude.to_string()),
            ("appid", self.api_key.clone()),
        ]
    }
}

impl std::fmt::Debug for WeatherClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeatherClient")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = WeatherClient::new("http://localhost:9000/onecall/", "key");
        assert_eq!(client.endpoint(), "http://localhost:9000/onecall");
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let client = WeatherClient::new("http://localhost:9000", "super-secret");
        let rendered = format!("{:?}", client);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[tokio::test]
    async fn test_current_sends_coordinates_and_key() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/onecall")
                    .query_param("lat", "49.842957")
                    .query_param("lon", "24.031111")
                    .query_param("appid", "secret")
                    .query_param("dt", "1700000000");
                then.status(200).json_body(json!({
                    "dt": 1700000000,
                    "main": { "temp": 5.2, "humidity": 80 },
                    "clouds": 40,
                    "wind_speed": 3.1
                }));
            })
            .await;

        let client = WeatherClient::new(server.url("/onecall"), "secret");
        let payload = client
            .current(49.842957, 24.031111, Some(1_700_000_000))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(payload["dt"], 1700000000);
        assert_eq!(payload["main"]["temp"], 5.2);
    }

    #[tokio::test]
    async fn test_current_maps_error_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/onecall");
                then.status(500).body("upstream exploded");
            })
            .await;

        let client = WeatherClient::new(server.url("/onecall"), "secret");
        let err = client.current(50.45, 30.52, None).await.unwrap_err();

        assert!(err.is_server_error());
        assert!(err.to_string().contains("upstream exploded"));
    }

    #[tokio::test]
    async fn test_current_rejects_non_json_body() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/onecall");
                then.status(200).body("<html>maintenance</html>");
            })
            .await;

        let client = WeatherClient::new(server.url("/onecall"), "secret");
        let err = client.current(50.45, 30.52, None).await.unwrap_err();

        assert!(matches!(err, crate::ClientError::ParseError(_)));
    }

    #[tokio::test]
    async fn test_probe_reports_auth_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/onecall");
                then.status(401).body("Invalid API key");
            })
            .await;

        let client = WeatherClient::new(server.url("/onecall"), "wrong");
        let err = client.probe(49.842957, 24.031111).await.unwrap_err();

        assert!(err.is_auth_error());
    }
}
