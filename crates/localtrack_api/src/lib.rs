//! HTTP control plane.
//!
//! Admits prediction requests, validates them against the model catalog and
//! the video's reachability, inserts QUEUED jobs, and answers status
//! queries. It never touches the container runtime and never writes any
//! status other than the initial QUEUED rows; everything after admission
//! belongs to the dispatcher daemon.

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod error;
pub mod handlers;
pub mod names;
pub mod probe;
pub mod state;

pub use state::{AppState, ModelSource, S3ModelSource};

/// Build the control-plane router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/models", get(handlers::models))
        .route("/predict", post(handlers::predict))
        .route("/status_by_id/{job_id}", get(handlers::status_by_id))
        .route("/status_by_name/{job_name}", get(handlers::status_by_name))
        .route("/status", get(handlers::status_all))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
