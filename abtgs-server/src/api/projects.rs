//! Job submission, status, result, export and cancellation

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::{attachment, job_handle, ClientAddr};
use crate::models::{
    DiarizedSegment, EngineOptions, JobSource, JobState, MappingEntry, SpeakerMapping, TagStats, TranscriptMeta,
};
use crate::services::validation::{file_extension, validate_file_extension, validate_file_size, validate_url};
use crate::services::JobStatusView;
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub url: String,
    #[serde(default)]
    pub engine: Option<EngineOptions>,
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub filename: String,
    pub language: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobCreatedResponse {
    pub id: Uuid,
    pub status: JobState,
}

/// Completed job payload: segments, per-tag statistics and filename metadata
#[derive(Debug, Serialize)]
pub struct JobResultResponse {
    pub id: Uuid,
    pub status: JobState,
    pub segments: Vec<DiarizedSegment>,
    pub speakers: BTreeMap<String, TagStats>,
    pub meta: TranscriptMeta,
}

#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    #[serde(default)]
    pub mappings: Vec<MappingEntry>,
    pub filename: Option<String>,
    /// Segment text edits; the job's stored edits are used when absent
    pub text_overrides: Option<BTreeMap<usize, String>>,
}

/// POST /projects
pub async fn create_job(
    State(state): State<AppState>,
    ClientAddr(client): ClientAddr,
    Json(request): Json<CreateJobRequest>,
) -> ApiResult<(StatusCode, Json<JobCreatedResponse>)> {
    state.limiter.check(client)?;
    let url = validate_url(&request.url, &state.config.allowed_url_hosts)?;
    let id = state
        .scheduler
        .submit(
            JobSource::Link { url: url.to_string() },
            request.engine.unwrap_or_default(),
        )
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(JobCreatedResponse {
            id,
            status: JobState::Queued,
        }),
    ))
}

/// POST /projects/upload?filename=..
///
/// Raw request body is the media file. Extension and size are checked before
/// the job exists; an oversize body is cut off as soon as it crosses the limit.
pub async fn upload_job(
    State(state): State<AppState>,
    ClientAddr(client): ClientAddr,
    Query(query): Query<UploadQuery>,
    body: Body,
) -> ApiResult<(StatusCode, Json<JobCreatedResponse>)> {
    state.limiter.check(client)?;
    let filename = query.filename.trim().to_string();
    if filename.is_empty() {
        return Err(ApiError::BadRequest("filename is required".to_string()));
    }
    validate_file_extension(&filename, &state.config.allowed_extensions)?;

    let max = state.config.max_file_size_bytes;
    let ext = file_extension(&filename).unwrap_or_default();
    let path = state.upload_dir.join(format!("{}{}", Uuid::new_v4(), ext));

    let written = match store_upload(body, &path, max).await {
        Ok(written) => written,
        Err(e) => {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e);
        }
    };
    if written == 0 {
        let _ = tokio::fs::remove_file(&path).await;
        return Err(ApiError::BadRequest("Uploaded file is empty".to_string()));
    }

    let mut engine = EngineOptions::default();
    if let Some(language) = query.language {
        engine.language = language;
    }
    if let Some(model) = query.model {
        engine.model = model;
    }

    let source = JobSource::Upload {
        path: path.clone(),
        filename: filename.clone(),
    };
    let id = match state.scheduler.submit(source, engine).await {
        Ok(id) => id,
        Err(e) => {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e.into());
        }
    };

    tracing::info!(job_id = %id, filename = %filename, bytes = written, "Upload stored");

    Ok((
        StatusCode::ACCEPTED,
        Json(JobCreatedResponse {
            id,
            status: JobState::Queued,
        }),
    ))
}

async fn store_upload(body: Body, path: &std::path::Path, max: u64) -> ApiResult<u64> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut stream = body.into_data_stream();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ApiError::BadRequest(format!("Upload interrupted: {}", e)))?;
        written += chunk.len() as u64;
        validate_file_size(written, max)?;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(written)
}

/// GET /projects/{id}/status
pub async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobStatusView>> {
    let handle = job_handle(&state, &id).await?;
    let job = handle.read().await;
    Ok(Json(JobStatusView::from_job(&job)))
}

/// GET /projects/{id}
pub async fn job_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobResultResponse>> {
    let handle = job_handle(&state, &id).await?;
    let job = handle.read().await;

    let result = match (&job.state, &job.result) {
        (JobState::Completed, Some(result)) => result,
        _ => {
            return Err(ApiError::Conflict(format!(
                "Job is not completed (status: {})",
                job.state
            )))
        }
    };

    Ok(Json(JobResultResponse {
        id: job.id,
        status: job.state,
        segments: result.transcript.segments().to_vec(),
        speakers: result
            .stats
            .iter()
            .map(|s| (s.tag.clone(), s.clone()))
            .collect(),
        meta: result.meta.clone(),
    }))
}

/// POST /projects/{id}/export
///
/// The submitted mapping is used exactly as given. Rendering works on a
/// snapshot of the job, so review edits are not blocked while it runs.
pub async fn export_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ExportRequest>,
) -> ApiResult<Response> {
    let handle = job_handle(&state, &id).await?;
    let job = handle.read().await.clone();

    let mapping = SpeakerMapping::from_entries(request.mappings);
    let overrides = match request.text_overrides {
        Some(overrides) => overrides,
        None => job
            .review
            .as_ref()
            .map(|r| r.text_overrides.clone())
            .unwrap_or_default(),
    };

    let export = state.export.clone();
    let document = tokio::task::spawn_blocking(move || {
        export.export_job(&job, &mapping, request.filename.as_deref(), &overrides)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("Export task failed: {}", e)))??;
    Ok(attachment(document))
}

/// POST /projects/{id}/cancel
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobStatusView>> {
    let handle = job_handle(&state, &id).await?;
    let job_id = handle.read().await.id;
    state.scheduler.cancel(job_id).await?;

    let job = handle.read().await;
    Ok(Json(JobStatusView::from_job(&job)))
}

/// Build project routes
pub fn project_routes() -> Router<AppState> {
    Router::new()
        .route("/projects", post(create_job))
        .route(
            "/projects/upload",
            post(upload_job).layer(DefaultBodyLimit::disable()),
        )
        .route("/projects/:id", get(job_result))
        .route("/projects/:id/status", get(job_status))
        .route("/projects/:id/export", post(export_job))
        .route("/projects/:id/cancel", post(cancel_job))
}
