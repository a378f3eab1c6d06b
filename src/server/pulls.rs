//! Pull request endpoints: status inspection, check and merge-detection
//! triggers, and push notification.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

use super::AppState;
use crate::service::ServiceError;
use crate::state::{MachineError, StoreError};
use crate::types::{PullId, PullRequest, RepoId, UserId};

/// Errors returned by the pull request endpoints.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Machine(#[from] MachineError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Store(e) | ApiError::Service(ServiceError::Store(e)) => store_status(e),
            ApiError::Machine(e) | ApiError::Service(ServiceError::Machine(e)) => machine_status(e),
            ApiError::Service(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn store_status(e: &StoreError) -> StatusCode {
    match e {
        StoreError::PullNotFound(_)
        | StoreError::IssueNotFound(_)
        | StoreError::RepoNotFound(_)
        | StoreError::UserNotFound(_)
        | StoreError::ReviewNotFound(_) => StatusCode::NOT_FOUND,
        StoreError::AlreadyExists { .. } | StoreError::Transition(_) => StatusCode::CONFLICT,
        StoreError::Io(_) | StoreError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn machine_status(e: &MachineError) -> StatusCode {
    match e {
        MachineError::Store(e) => store_status(e),
        MachineError::AlreadyMerged
        | MachineError::InvalidTransition { .. }
        | MachineError::NotMergeable(_)
        | MachineError::Finished(_) => StatusCode::CONFLICT,
        MachineError::IncompleteMergeRecord { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        MachineError::NotAllowedToMerge { .. } => StatusCode::FORBIDDEN,
        MachineError::QueueClosed => StatusCode::SERVICE_UNAVAILABLE,
        MachineError::Detect(_) | MachineError::Patch(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "request failed");
            "could not determine mergeability, try again".to_string()
        } else {
            self.to_string()
        };
        (status, message).into_response()
    }
}

/// Status view of one pull request.
#[derive(Debug, Serialize, Deserialize)]
pub struct PullView {
    #[serde(flatten)]
    pub pull: PullRequest,

    /// A check is queued or running.
    pub check_pending: bool,
}

/// `GET /api/v1/pulls/{id}`
pub async fn pull_handler(
    State(app_state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<PullView>, ApiError> {
    let id = PullId(id);
    let machine = app_state.service().machine();
    let pull = machine.store().pull(id)?;
    Ok(Json(PullView {
        check_pending: machine.exist(id),
        pull,
    }))
}

/// `POST /api/v1/pulls/{id}/check`
///
/// Returns 202 once the check is queued.
pub async fn check_handler(
    State(app_state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<(StatusCode, &'static str), ApiError> {
    let id = PullId(id);
    let enqueued = app_state.service().machine().enqueue_check(id).await?;
    debug!(pull = %id, ?enqueued, "check requested over HTTP");
    Ok((StatusCode::ACCEPTED, "Accepted"))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DetectResponse {
    pub merged: bool,
}

/// `POST /api/v1/pulls/{id}/detect-merge`
pub async fn detect_merge_handler(
    State(app_state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<DetectResponse>, ApiError> {
    let merged = app_state
        .service()
        .machine()
        .check_manually_merged(PullId(id))
        .await?;
    Ok(Json(DetectResponse { merged }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PushRequest {
    pub branch: String,
    pub pusher_id: i64,
}

/// `POST /api/v1/repos/{id}/push`
///
/// Handling runs in the background; the response only confirms the
/// repository exists.
pub async fn push_handler(
    State(app_state): State<AppState>,
    Path(id): Path<i64>,
    Json(push): Json<PushRequest>,
) -> Result<(StatusCode, &'static str), ApiError> {
    let repo = RepoId(id);
    let service = app_state.service();
    service.machine().store().repo(repo)?;
    service.spawn_push(repo, push.branch, UserId(push.pusher_id));
    Ok((StatusCode::ACCEPTED, "Accepted"))
}
