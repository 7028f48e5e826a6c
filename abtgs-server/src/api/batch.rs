//! Batch submission, status aggregation and archive download

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{attachment, ClientAddr};
use crate::models::{Batch, EngineOptions, Job, JobSource};
use crate::services::validation::validate_url;
use crate::services::{BatchStatusView, JobStore};
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct CreateBatchRequest {
    pub urls: Vec<String>,
    #[serde(default)]
    pub engine: Option<EngineOptions>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchCreatedResponse {
    pub batch_id: Uuid,
    pub job_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct JobIdsRequest {
    pub ids: Vec<String>,
}

/// POST /batches
///
/// Every link is validated before any job is created, so a rejected request
/// leaves nothing behind.
pub async fn create_batch(
    State(state): State<AppState>,
    ClientAddr(client): ClientAddr,
    Json(request): Json<CreateBatchRequest>,
) -> ApiResult<(StatusCode, Json<BatchCreatedResponse>)> {
    state.limiter.check(client)?;
    let urls: Vec<&str> = request
        .urls
        .iter()
        .map(|u| u.trim())
        .filter(|u| !u.is_empty())
        .collect();
    if urls.is_empty() {
        return Err(ApiError::BadRequest("No links provided".to_string()));
    }

    let mut validated = Vec::with_capacity(urls.len());
    for url in urls {
        let parsed = validate_url(url, &state.config.allowed_url_hosts)
            .map_err(|e| ApiError::BadRequest(format!("{}: {}", url, e)))?;
        validated.push(parsed.to_string());
    }

    let engine = request.engine.unwrap_or_default();
    let mut job_ids = Vec::with_capacity(validated.len());
    for url in validated {
        let id = state
            .scheduler
            .submit(JobSource::Link { url }, engine.clone())
            .await?;
        job_ids.push(id);
    }

    let batch_id = state.batches.insert(Batch::new(job_ids.clone())).await;
    tracing::info!(batch_id = %batch_id, jobs = job_ids.len(), "Batch created");

    Ok((
        StatusCode::ACCEPTED,
        Json(BatchCreatedResponse { batch_id, job_ids }),
    ))
}

/// GET /batches/{id}/status
pub async fn registered_batch_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<BatchStatusView>> {
    let not_found = || ApiError::NotFound(format!("Batch {}", id));
    let batch_id = Uuid::parse_str(&id).map_err(|_| not_found())?;
    state
        .status
        .batch_status_by_id(&batch_id)
        .await
        .map(Json)
        .ok_or_else(not_found)
}

/// POST /batch/status
pub async fn batch_status(
    State(state): State<AppState>,
    Json(request): Json<JobIdsRequest>,
) -> ApiResult<Json<BatchStatusView>> {
    if request.ids.is_empty() {
        return Err(ApiError::BadRequest("No job ids provided".to_string()));
    }
    Ok(Json(state.status.batch_status(&request.ids).await))
}

/// POST /batch/download
///
/// ZIP of automatically mapped documents for the completed jobs among `ids`.
pub async fn batch_download(
    State(state): State<AppState>,
    Json(request): Json<JobIdsRequest>,
) -> ApiResult<Response> {
    if request.ids.is_empty() {
        return Err(ApiError::BadRequest("No job ids provided".to_string()));
    }

    let mut jobs: Vec<Job> = Vec::with_capacity(request.ids.len());
    for raw_id in &request.ids {
        let Ok(id) = Uuid::parse_str(raw_id) else {
            continue;
        };
        if let Some(handle) = state.registry.get(&id).await {
            jobs.push(handle.read().await.clone());
        }
    }

    let export = state.export.clone();
    let archive = tokio::task::spawn_blocking(move || export.batch_archive(&jobs))
        .await
        .map_err(|e| ApiError::Internal(format!("Archive task failed: {}", e)))??;
    Ok(attachment(archive))
}

/// Build batch routes
pub fn batch_routes() -> Router<AppState> {
    Router::new()
        .route("/batches", post(create_batch))
        .route("/batches/:id/status", get(registered_batch_status))
        .route("/batch/status", post(batch_status))
        .route("/batch/download", post(batch_download))
}
