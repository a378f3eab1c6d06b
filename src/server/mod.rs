//! HTTP surface of the merge-readiness engine.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns 200 if the server is running
//! - `GET /api/v1/pulls/{id}` - Status, conflicted files and merge record as JSON
//! - `POST /api/v1/pulls/{id}/check` - Queues a patch test (202 Accepted)
//! - `POST /api/v1/pulls/{id}/detect-merge` - Runs merge detection now
//! - `POST /api/v1/repos/{id}/push` - Reports a branch push (202 Accepted)

use std::sync::Arc;

pub mod health;
pub mod pulls;

pub use health::health_handler;
pub use pulls::{
    ApiError, check_handler, detect_merge_handler, pull_handler, push_handler,
};

use crate::service::PullService;

/// Shared application state, passed to handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    service: Arc<PullService>,
}

impl AppState {
    pub fn new(service: Arc<PullService>) -> Self {
        AppState {
            inner: Arc::new(AppStateInner { service }),
        }
    }

    pub fn service(&self) -> &Arc<PullService> {
        &self.inner.service
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/api/v1/pulls/{id}", get(pull_handler))
        .route("/api/v1/pulls/{id}/check", post(check_handler))
        .route("/api/v1/pulls/{id}/detect-merge", post(detect_merge_handler))
        .route("/api/v1/repos/{id}/push", post(push_handler))
        .route("/health", get(health_handler))
        .with_state(app_state)
}
