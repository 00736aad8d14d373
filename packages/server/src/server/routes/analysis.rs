//! Analysis endpoints.
//!
//! - `POST /api/analyze` submits a post (`{"url": "..."}`) and returns at once
//! - `GET /api/status/:id` reports state and progress
//! - `GET /api/results/:id` returns the trust score, the recorded failure,
//!   or 202 while the job is still running
//! - `DELETE /api/cache/:key` drops cached content and analysis for a post

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use trust_engine::{JobOutcome, JobStatus, PipelineError, Submission};
use uuid::Uuid;

use crate::server::app::AppState;

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    /// Post URL or `post:<shortcode>`
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub content_key: String,
    pub invalidated: bool,
}

/// Maps engine errors onto HTTP status codes.
#[derive(Debug)]
pub struct ApiError(PipelineError);

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PipelineError::Validation { .. } => StatusCode::BAD_REQUEST,
            PipelineError::JobNotFound(_) => StatusCode::NOT_FOUND,
            PipelineError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            PipelineError::WaitTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub async fn analyze_handler(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<(StatusCode, Json<Submission>), ApiError> {
    let submission = state.service.submit(&request.url).await?;
    let status = if submission.cached {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(submission)))
}

pub async fn status_handler(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatus>, ApiError> {
    Ok(Json(state.service.get_status(job_id).await?))
}

pub async fn result_handler(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<(StatusCode, Json<JobOutcome>), ApiError> {
    let outcome = state.service.get_result(job_id).await?;
    let status = match outcome {
        JobOutcome::NotReady { .. } => StatusCode::ACCEPTED,
        _ => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}

pub async fn invalidate_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<InvalidateResponse>, ApiError> {
    let key = state.service.invalidate(&key).await?;
    Ok(Json(InvalidateResponse {
        content_key: key.to_string(),
        invalidated: true,
    }))
}
