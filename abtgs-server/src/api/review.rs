//! Review session endpoints
//!
//! Speaker swap / override / select, segment text edits and the assembled
//! preview. Each request is one atomic edit under the job's record lock.

use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::job_handle;
use crate::models::{BindingField, Candidate, CandidateSelection, Job, ReviewState, SpeakerMapping};
use crate::services::assembler::{render_plain, TimecodeAssembler, TranscriptLine};
use crate::services::SpeakerView;
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Serialize)]
pub struct SpeakersResponse {
    pub total_duration_ms: u64,
    pub speakers: Vec<SpeakerView>,
    pub candidates: Vec<Candidate>,
    /// Current `{tag → {name, abbreviation}}`, ready to send back for export
    pub mapping: SpeakerMapping,
}

#[derive(Debug, Deserialize)]
pub struct SwapRequest {
    pub tag_a: String,
    pub tag_b: String,
}

#[derive(Debug, Deserialize)]
pub struct OverrideRequest {
    pub field: BindingField,
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct SelectRequest {
    /// Candidate id, or `"custom"`
    pub candidate: String,
}

#[derive(Debug, Deserialize)]
pub struct TextEditRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub lines: Vec<TranscriptLine>,
    pub text: String,
}

fn review_mut(job: &mut Job) -> ApiResult<&mut ReviewState> {
    let state = job.state;
    job.review
        .as_mut()
        .ok_or_else(|| ApiError::Conflict(format!("Job is not completed (status: {})", state)))
}

fn review_ref(job: &Job) -> ApiResult<&ReviewState> {
    job.review
        .as_ref()
        .ok_or_else(|| ApiError::Conflict(format!("Job is not completed (status: {})", job.state)))
}

fn speakers_response(review: &ReviewState) -> SpeakersResponse {
    SpeakersResponse {
        total_duration_ms: review.resolver.total_duration_ms(),
        speakers: review.resolver.speaker_views(),
        candidates: review.resolver.candidates().to_vec(),
        mapping: review.resolver.resolved_mapping(),
    }
}

/// GET /projects/{id}/speakers
pub async fn list_speakers(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SpeakersResponse>> {
    let handle = job_handle(&state, &id).await?;
    let job = handle.read().await;
    Ok(Json(speakers_response(review_ref(&job)?)))
}

/// POST /projects/{id}/speakers/swap
pub async fn swap_speakers(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SwapRequest>,
) -> ApiResult<Json<SpeakersResponse>> {
    let handle = job_handle(&state, &id).await?;
    let mut job = handle.write().await;
    let job_id = job.id;
    let review = review_mut(&mut job)?;
    review.resolver.swap(&request.tag_a, &request.tag_b)?;

    tracing::info!(job_id = %job_id, tag_a = %request.tag_a, tag_b = %request.tag_b, "Speakers swapped");
    Ok(Json(speakers_response(review)))
}

/// POST /projects/{id}/speakers/{tag}/override
pub async fn override_speaker(
    State(state): State<AppState>,
    Path((id, tag)): Path<(String, String)>,
    Json(request): Json<OverrideRequest>,
) -> ApiResult<Json<SpeakersResponse>> {
    let handle = job_handle(&state, &id).await?;
    let mut job = handle.write().await;
    let review = review_mut(&mut job)?;
    review
        .resolver
        .set_custom_override(&tag, request.field, request.value)?;
    Ok(Json(speakers_response(review)))
}

/// POST /projects/{id}/speakers/{tag}/select
pub async fn select_speaker(
    State(state): State<AppState>,
    Path((id, tag)): Path<(String, String)>,
    Json(request): Json<SelectRequest>,
) -> ApiResult<Json<SpeakersResponse>> {
    let selection = match CandidateSelection::from_str(request.candidate.trim()) {
        Ok(selection) => selection,
        Err(never) => match never {},
    };

    let handle = job_handle(&state, &id).await?;
    let mut job = handle.write().await;
    let review = review_mut(&mut job)?;
    review.resolver.select_candidate(&tag, selection)?;
    Ok(Json(speakers_response(review)))
}

/// PUT /projects/{id}/segments/{index}/text
///
/// Sending the recognized text back unchanged drops the edit.
pub async fn edit_segment_text(
    State(state): State<AppState>,
    Path((id, index)): Path<(String, usize)>,
    Json(request): Json<TextEditRequest>,
) -> ApiResult<Json<PreviewResponse>> {
    let handle = job_handle(&state, &id).await?;
    let mut job = handle.write().await;

    let original = job
        .result
        .as_ref()
        .and_then(|r| r.transcript.segments().get(index))
        .map(|s| s.text.clone());
    let review = review_mut(&mut job)?;
    let original =
        original.ok_or_else(|| ApiError::NotFound(format!("Segment {} not found", index)))?;

    if request.text == original {
        review.text_overrides.remove(&index);
    } else {
        review.text_overrides.insert(index, request.text);
    }

    preview_of(&job).map(Json)
}

/// GET /projects/{id}/preview
pub async fn preview(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<PreviewResponse>> {
    let handle = job_handle(&state, &id).await?;
    let job = handle.read().await;
    preview_of(&job).map(Json)
}

fn preview_of(job: &Job) -> ApiResult<PreviewResponse> {
    let review = review_ref(job)?;
    let result = job
        .result
        .as_ref()
        .ok_or_else(|| ApiError::Internal(format!("Completed job {} has no result", job.id)))?;

    let lines = TimecodeAssembler::new(result.meta.start_tc).assemble(
        result.transcript.segments(),
        &review.resolver.resolved_mapping(),
        &review.text_overrides,
    );
    let text = render_plain(&lines);
    Ok(PreviewResponse { lines, text })
}

/// GET /candidates
pub async fn list_candidates(State(state): State<AppState>) -> Json<Vec<Candidate>> {
    Json(state.config.candidates.clone())
}

/// Build review routes
pub fn review_routes() -> Router<AppState> {
    Router::new()
        .route("/candidates", get(list_candidates))
        .route("/projects/:id/speakers", get(list_speakers))
        .route("/projects/:id/speakers/swap", post(swap_speakers))
        .route("/projects/:id/speakers/:tag/override", post(override_speaker))
        .route("/projects/:id/speakers/:tag/select", post(select_speaker))
        .route("/projects/:id/segments/:index/text", put(edit_segment_text))
        .route("/projects/:id/preview", get(preview))
}
