//! Stage adapter contracts
//!
//! The job pipeline reaches every external collaborator through one of these
//! traits. Each concrete adapter lives in its own module; test suites supply
//! in-memory doubles.
//!
//! | Stage | Trait | Shipped implementation |
//! |---|---|---|
//! | Acquire | [`MediaFetcher`] | [`yandex_disk::YandexDiskFetcher`] |
//! | Transcode | [`Transcoder`] | [`ffmpeg::FfmpegTranscoder`] |
//! | Upload | [`ObjectStore`] | [`s3_store::S3ObjectStore`] |
//! | Recognize | [`Recognizer`] | [`speechkit::SpeechKitRecognizer`] |
//! | Export | [`DocumentGenerator`] | [`docx::DocxGenerator`] |

pub mod docx;
pub mod ffmpeg;
pub mod s3_store;
pub mod speechkit;
pub mod yandex_disk;

#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::models::{DiarizedSegment, EngineOptions};
use crate::services::assembler::TranscriptLine;
use crate::services::validation::ValidationError;

/// Stage failure surfaced into the job record
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Source not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("File too large: {size} bytes (max {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Storage error: {message}")]
    Storage { message: String, transient: bool },

    /// Provider message, passed through verbatim
    #[error("{0}")]
    Recognition(String),

    #[error("Document generation failed: {0}")]
    Generation(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StageError {
    /// Worth retrying with backoff
    pub fn is_transient(&self) -> bool {
        match self {
            StageError::Network(_) => true,
            StageError::Storage { transient, .. } => *transient,
            _ => false,
        }
    }
}

impl From<ValidationError> for StageError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::FileTooLarge { size, max } => StageError::FileTooLarge { size, max },
            ValidationError::UnsupportedExtension(_) => StageError::UnsupportedFormat(err.to_string()),
            other => StageError::NotFound(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for StageError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) if status == reqwest::StatusCode::NOT_FOUND => {
                StageError::NotFound(err.to_string())
            }
            Some(status)
                if status == reqwest::StatusCode::FORBIDDEN
                    || status == reqwest::StatusCode::UNAUTHORIZED =>
            {
                StageError::AccessDenied(err.to_string())
            }
            Some(status) if status.is_client_error() => StageError::NotFound(err.to_string()),
            _ => StageError::Network(err.to_string()),
        }
    }
}

pub type StageResult<T> = std::result::Result<T, StageError>;

/// Non-blocking download progress reporter
///
/// Reports are forwarded to whoever holds the receiving end (the pipeline
/// updates the job record). A detached sink drops every report.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<mpsc::UnboundedSender<u8>>,
}

impl ProgressSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<u8>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn detached() -> Self {
        Self::default()
    }

    pub fn report(&self, percent: u8) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(percent.min(100));
        }
    }

    /// Report `done / total` as a percentage; unknown totals are ignored
    pub fn report_bytes(&self, done: u64, total: u64) {
        if total > 0 {
            self.report(((done.min(total) * 100) / total) as u8);
        }
    }
}

/// Local copy of the source media
#[derive(Debug, Clone, PartialEq)]
pub struct AcquiredMedia {
    pub path: PathBuf,
    /// Filename reported by the source
    pub original_filename: String,
    pub size_bytes: u64,
}

/// Mono OGG/Opus at 48 kHz, ready for upload
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedAudio {
    pub path: PathBuf,
}

/// Location of an uploaded object
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageRef {
    pub object_name: String,
    /// URL the recognizer downloads the audio from
    pub uri: String,
}

/// Participant row of an exported document
#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    pub name: String,
    pub abbreviation: String,
}

/// Everything a document generator needs
#[derive(Debug, Clone)]
pub struct TranscriptDocument {
    /// Media filename shown in the header
    pub source_filename: String,
    pub participants: Vec<Participant>,
    pub lines: Vec<TranscriptLine>,
}

/// Acquire: fetch linked media into a local directory
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str, dest_dir: &Path, progress: ProgressSink) -> StageResult<AcquiredMedia>;
}

/// Transcode: normalize media to recognizer input
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(&self, input: &Path, output: &Path) -> StageResult<NormalizedAudio>;
}

/// Upload: make audio reachable by the recognizer over HTTPS
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, local: &Path, object_name: &str) -> StageResult<StorageRef>;

    async fn delete(&self, object: &StorageRef) -> StageResult<()>;
}

/// Recognize: long-running diarized speech recognition
#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn recognize(&self, audio: &StorageRef, options: &EngineOptions) -> StageResult<Vec<DiarizedSegment>>;
}

/// Export: render a transcript document
pub trait DocumentGenerator: Send + Sync {
    fn generate(&self, document: &TranscriptDocument) -> StageResult<Vec<u8>>;

    fn content_type(&self) -> &'static str;

    /// File extension including the dot
    fn extension(&self) -> &'static str;
}

/// The adapter set used by the pipeline
#[derive(Clone)]
pub struct StageAdapters {
    pub fetcher: Arc<dyn MediaFetcher>,
    pub transcoder: Arc<dyn Transcoder>,
    pub store: Arc<dyn ObjectStore>,
    pub recognizer: Arc<dyn Recognizer>,
}

/// Acquire for uploaded files: the media is already in the upload area
pub async fn acquire_uploaded(path: &Path, filename: &str) -> StageResult<AcquiredMedia> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StageError::NotFound(format!("Uploaded file missing: {}", filename)));
        }
        Err(e) => return Err(e.into()),
    };

    Ok(AcquiredMedia {
        path: path.to_path_buf(),
        original_filename: filename.to_string(),
        size_bytes: metadata.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StageError::Network("reset".into()).is_transient());
        assert!(StageError::Storage {
            message: "busy".into(),
            transient: true
        }
        .is_transient());
        assert!(!StageError::Storage {
            message: "denied".into(),
            transient: false
        }
        .is_transient());
        assert!(!StageError::NotFound("x".into()).is_transient());
    }

    #[test]
    fn test_recognition_message_is_verbatim() {
        let err = StageError::Recognition("audio too long".into());
        assert_eq!(err.to_string(), "audio too long");
    }

    #[tokio::test]
    async fn test_progress_sink_clamps_and_forwards() {
        let (sink, mut rx) = ProgressSink::channel();
        sink.report_bytes(50, 200);
        sink.report(250);
        sink.report_bytes(10, 0);
        assert_eq!(rx.recv().await, Some(25));
        assert_eq!(rx.recv().await, Some(100));
        drop(sink);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_acquire_uploaded_reports_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        tokio::fs::write(&path, b"12345").await.unwrap();

        let media = acquire_uploaded(&path, "Иванов.mp4").await.unwrap();
        assert_eq!(media.size_bytes, 5);
        assert_eq!(media.original_filename, "Иванов.mp4");

        let missing = acquire_uploaded(&dir.path().join("gone.mp4"), "gone.mp4").await;
        assert!(matches!(missing, Err(StageError::NotFound(_))));
    }
}
