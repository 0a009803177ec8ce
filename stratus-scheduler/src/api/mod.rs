//! API Module
//!
//! Read-mostly HTTP status API of the scheduler. Handlers never touch the
//! coordinator's state directly: they read the run board and send commands
//! through a [`CoordinatorHandle`].

pub mod error;
pub mod health;
pub mod runs;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::coordinator::CoordinatorHandle;

/// Create the status API router
pub fn create_router(handle: CoordinatorHandle) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Run endpoints
        .route("/runs", get(runs::list_runs))
        .route("/runs/{logical_timestamp}", get(runs::get_run))
        .route("/runs/{logical_timestamp}/cancel", post(runs::cancel_run))
        // Add state and middleware
        .with_state(handle)
        .layer(TraceLayer::new_for_http())
}
