//! abtgs-server library interface
//!
//! Broadcast transcription service: link or upload in, speaker-attributed
//! timecoded transcript out. Exposes the router and state for the binary and
//! for integration tests.

pub mod adapters;
pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use abtgs_common::events::EventBus;
use axum::http::HeaderValue;
use axum::Router;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::adapters::{DocumentGenerator, StageAdapters};
use crate::config::{ServiceConfig, ServiceDirs};
use crate::services::{
    BatchRegistry, ExportService, InMemoryJobRegistry, JobPipeline, JobStore, PipelineSettings, RetentionSweeper,
    Scheduler, StatusReporter, SubmissionLimiter,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub registry: Arc<dyn JobStore>,
    pub batches: Arc<BatchRegistry>,
    pub scheduler: Arc<Scheduler>,
    pub status: StatusReporter,
    pub export: ExportService,
    /// Per-client limit on job submissions
    pub limiter: SubmissionLimiter,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Where raw uploads are written before their job starts
    pub upload_dir: PathBuf,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// Wire registry, pipeline and scheduler around the given adapters
    ///
    /// Starts the scheduler's dispatcher and the retention sweeper, so this
    /// must run inside a tokio runtime.
    pub fn new(
        config: ServiceConfig,
        dirs: &ServiceDirs,
        adapters: StageAdapters,
        generator: Arc<dyn DocumentGenerator>,
    ) -> Self {
        let event_bus = EventBus::new(config.event_bus_capacity);
        let registry: Arc<dyn JobStore> = Arc::new(InMemoryJobRegistry::new());
        let batches = Arc::new(BatchRegistry::new());

        let settings = PipelineSettings {
            work_dir: dirs.temp.clone(),
            max_file_size_bytes: config.max_file_size_bytes,
            allowed_extensions: config.allowed_extensions.clone(),
            technical_markers: config.technical_markers.clone(),
            candidates: config.candidates.clone(),
            retry: config.retry.clone(),
        };
        let export = ExportService::new(generator);
        let pipeline = Arc::new(
            JobPipeline::new(adapters, settings, event_bus.clone()).with_autosave(export.clone(), dirs.output.clone()),
        );
        let scheduler = Arc::new(Scheduler::start(
            config.max_concurrent_jobs,
            registry.clone(),
            pipeline,
            event_bus.clone(),
        ));

        let limiter = SubmissionLimiter::per_minute(config.create_rate_limit_per_minute);
        if let Some(retention) = config.job_retention() {
            RetentionSweeper::new(registry.clone(), batches.clone(), limiter.clone(), retention).spawn();
        }

        Self {
            status: StatusReporter::new(registry.clone(), batches.clone()),
            export,
            limiter,
            config: Arc::new(config),
            registry,
            batches,
            scheduler,
            event_bus,
            upload_dir: dirs.upload.clone(),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
///
/// `/health` at the root, everything else under `/api/v1`.
pub fn build_router(state: AppState) -> Router {
    let v1 = Router::new()
        .merge(api::project_routes())
        .merge(api::review_routes())
        .merge(api::batch_routes())
        .merge(api::sse_routes());
    let cors = cors_layer(&state.config.cors_origins);

    Router::new()
        .nest("/api/v1", v1)
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Browser access for the configured origins
///
/// `"*"` allows any origin. Entries that are not valid header values are
/// skipped with a warning.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o.trim() == "*") {
        AllowOrigin::any()
    } else {
        let list: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(list)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([axum::http::header::CONTENT_DISPOSITION])
}
