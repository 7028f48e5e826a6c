//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::services::JobStore;
use crate::AppState;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always "ok" while the process serves requests
    pub status: String,
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    pub git_hash: String,
    pub build_timestamp: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    pub jobs_total: usize,
    /// Pipelines currently holding a worker slot
    pub jobs_running: usize,
    pub max_concurrent_jobs: usize,
    /// Interval clients should poll status at
    pub poll_interval_ms: u64,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);

    Json(HealthResponse {
        status: "ok".to_string(),
        module: crate::config::SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        build_timestamp: env!("BUILD_TIMESTAMP").to_string(),
        uptime_seconds: uptime.num_seconds().max(0) as u64,
        jobs_total: state.registry.len().await,
        jobs_running: state.scheduler.running(),
        max_concurrent_jobs: state.scheduler.max_concurrent(),
        poll_interval_ms: state.config.poll_interval_ms,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
