//! Stratus HTTP clients
//!
//! Two small, typed HTTP clients:
//! - [`WeatherClient`] reads current conditions from the remote weather API
//! - [`SchedulerClient`] talks to the scheduler status API (used by the CLI)
//!
//! # Example
//!
//! ```no_run
//! use stratus_client::WeatherClient;
//!
//! #[tokio::main]
//! async fn main() -> stratus_client::Result<()> {
//!     let client = WeatherClient::new(
//!         "https://api.openweathermap.org/data/3.0/onecall",
//!         "my-api-key",
//!     );
//!
//!     let payload = client.current(49.842957, 24.031111, None).await?;
//!     println!("{}", payload);
//!     Ok(())
//! }
//! ```

pub mod error;
mod scheduler;
mod weather;

// Re-export commonly used types
pub use error::{ClientError, Result};
pub use scheduler::SchedulerClient;
pub use weather::WeatherClient;

use serde::de::DeserializeOwned;

// =============================================================================
// Response Handlers
// =============================================================================

/// Check the status code and deserialize the JSON body
async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();

    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(ClientError::api_error(status.as_u16(), error_text));
    }

    response
        .json()
        .await
        .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
}

/// Check the status code of a response whose body is irrelevant
async fn handle_empty_response(response: reqwest::Response) -> Result<()> {
    let status = response.status();

    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(ClientError::api_error(status.as_u16(), error_text));
    }

    Ok(())
}
