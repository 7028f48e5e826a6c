//! Test Helper Utilities
//!
//! Scripted stage adapters and app-state construction for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

use abtgs_server::adapters::docx::DocxGenerator;
use abtgs_server::adapters::{
    AcquiredMedia, DocumentGenerator, MediaFetcher, NormalizedAudio, ObjectStore, ProgressSink, Recognizer, StageAdapters,
    StageError, StageResult, StorageRef, Transcoder,
};
use abtgs_server::config::{ServiceConfig, ServiceDirs};
use abtgs_server::models::{Candidate, DiarizedSegment, EngineOptions, JobState};
use abtgs_server::AppState;

/// Filename reported for every fetched link
pub const FETCHED_FILENAME: &str = "Иванов_Петрова_интер.mp4";

/// Tracks how many pipelines are between Acquire start and Recognize end
#[derive(Clone, Default)]
pub struct ConcurrencyGauge {
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ConcurrencyGauge {
    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Writes a small file; links containing `missing` fail with NotFound
pub struct ScriptedFetcher {
    gauge: ConcurrencyGauge,
}

#[async_trait]
impl MediaFetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str, dest_dir: &Path, progress: ProgressSink) -> StageResult<AcquiredMedia> {
        if url.contains("missing") {
            return Err(StageError::NotFound(format!("No public resource at {}", url)));
        }
        self.gauge.enter();
        let path = dest_dir.join("source.mp4");
        tokio::fs::write(&path, b"media").await?;
        progress.report(50);
        progress.report(100);
        Ok(AcquiredMedia {
            path,
            original_filename: FETCHED_FILENAME.to_string(),
            size_bytes: 5,
        })
    }
}

pub struct CopyTranscoder;

#[async_trait]
impl Transcoder for CopyTranscoder {
    async fn transcode(&self, input: &Path, output: &Path) -> StageResult<NormalizedAudio> {
        tokio::fs::copy(input, output).await?;
        Ok(NormalizedAudio {
            path: output.to_path_buf(),
        })
    }
}

pub struct MemoryStore;

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, _local: &Path, object_name: &str) -> StageResult<StorageRef> {
        Ok(StorageRef {
            object_name: object_name.to_string(),
            uri: format!("mem://{}", object_name),
        })
    }

    async fn delete(&self, _object: &StorageRef) -> StageResult<()> {
        Ok(())
    }
}

/// Two speakers: tag 1 talks for 2960 ms, tag 2 for 1000 ms
pub struct ScriptedRecognizer {
    gauge: ConcurrencyGauge,
    delay: Duration,
}

pub fn scripted_segments() -> Vec<DiarizedSegment> {
    vec![
        DiarizedSegment {
            start_offset_ms: 0,
            end_offset_ms: 2000,
            tag: "1".to_string(),
            text: "Добрый вечер".to_string(),
        },
        DiarizedSegment {
            start_offset_ms: 2000,
            end_offset_ms: 3000,
            tag: "2".to_string(),
            text: "Здравствуйте".to_string(),
        },
        DiarizedSegment {
            start_offset_ms: 3040,
            end_offset_ms: 4000,
            tag: "1".to_string(),
            text: "Начнём".to_string(),
        },
    ]
}

#[async_trait]
impl Recognizer for ScriptedRecognizer {
    async fn recognize(&self, _audio: &StorageRef, _options: &EngineOptions) -> StageResult<Vec<DiarizedSegment>> {
        tokio::time::sleep(self.delay).await;
        self.gauge.leave();
        Ok(scripted_segments())
    }
}

pub fn scripted_adapters(gauge: &ConcurrencyGauge, delay: Duration) -> StageAdapters {
    StageAdapters {
        fetcher: Arc::new(ScriptedFetcher { gauge: gauge.clone() }),
        transcoder: Arc::new(CopyTranscoder),
        store: Arc::new(MemoryStore),
        recognizer: Arc::new(ScriptedRecognizer {
            gauge: gauge.clone(),
            delay,
        }),
    }
}

pub fn test_config() -> ServiceConfig {
    ServiceConfig {
        candidates: vec![Candidate {
            id: "c-ivanov".to_string(),
            name: "Иванов".to_string(),
            abbreviation: "ИВН".to_string(),
        }],
        create_rate_limit_per_minute: 0,
        poll_interval_ms: 50,
        ..Default::default()
    }
}

/// App state over scripted adapters; keep the TempDir alive for the test
pub fn test_app_state(config: ServiceConfig, gauge: &ConcurrencyGauge, delay: Duration) -> (TempDir, AppState) {
    test_app_state_with_generator(config, gauge, delay, Arc::new(DocxGenerator::new()))
}

pub fn test_app_state_with_generator(
    config: ServiceConfig,
    gauge: &ConcurrencyGauge,
    delay: Duration,
    generator: Arc<dyn DocumentGenerator>,
) -> (TempDir, AppState) {
    let temp_dir = TempDir::new().unwrap();
    let dirs = ServiceDirs::new(temp_dir.path());
    dirs.ensure().unwrap();
    let state = AppState::new(config, &dirs, scripted_adapters(gauge, delay), generator);
    (temp_dir, state)
}

/// Autosave directory under a test root
pub fn output_dir(root: &TempDir) -> PathBuf {
    ServiceDirs::new(root.path()).output
}

/// Serve the router on an ephemeral port; returns the base URL
pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .unwrap();
    });
    format!("http://{}", addr)
}

pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes().to_vec();
    (status, bytes)
}

pub async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let (status, bytes) = send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await;
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

pub async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let (status, bytes) = send(app, json_request("POST", uri, &body)).await;
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

pub fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Poll the status endpoint until the job reaches `expected`
pub async fn wait_for_job(app: &Router, id: &str, expected: JobState) -> Value {
    let uri = format!("/api/v1/projects/{}/status", id);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let (status, body) = get_json(app, &uri).await;
        assert_eq!(status, StatusCode::OK);
        if body["status"] == expected.as_str() {
            return body;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {} stuck at {}",
            id,
            body["status"]
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn submit_link(app: &Router, url: &str) -> String {
    let (status, body) = post_json(app, "/api/v1/projects", serde_json::json!({ "url": url })).await;
    assert_eq!(status, StatusCode::ACCEPTED, "submit failed: {}", body);
    body["id"].as_str().unwrap().to_string()
}
