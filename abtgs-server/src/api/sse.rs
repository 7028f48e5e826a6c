//! Server-Sent Events for job lifecycle updates

use abtgs_common::sse::event_sse_stream;
use axum::{
    extract::{Query, State},
    response::sse::{Event, Sse},
    routing::get,
    Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use uuid::Uuid;

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct EventFilter {
    /// Only stream events for this job
    pub job_id: Option<Uuid>,
}

/// GET /events - job queued, state changes, progress and outcomes
pub async fn job_event_stream(
    State(state): State<AppState>,
    Query(filter): Query<EventFilter>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_bus.subscribe();
    event_sse_stream(crate::config::SERVICE_NAME, rx, move |event| {
        filter.job_id.map_or(true, |id| event.job_id() == id)
    })
}

pub fn sse_routes() -> Router<AppState> {
    Router::new().route("/events", get(job_event_stream))
}
