//! In-memory adapter doubles for unit tests

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::{
    AcquiredMedia, MediaFetcher, NormalizedAudio, ObjectStore, ProgressSink, Recognizer, StageAdapters,
    StageResult, StorageRef, Transcoder,
};
use crate::models::{DiarizedSegment, EngineOptions};

/// Holds every recognition until opened; stays open afterwards
#[derive(Clone, Default)]
pub struct Gate {
    opened: CancellationToken,
    recognize_calls: Arc<AtomicUsize>,
}

impl Gate {
    pub fn open(&self) {
        self.opened.cancel();
    }

    pub fn recognize_calls(&self) -> usize {
        self.recognize_calls.load(Ordering::SeqCst)
    }
}

struct FileFetcher;

#[async_trait]
impl MediaFetcher for FileFetcher {
    async fn fetch(&self, url: &str, dest_dir: &Path, progress: ProgressSink) -> StageResult<AcquiredMedia> {
        let path = dest_dir.join("source.mp4");
        tokio::fs::write(&path, url.as_bytes()).await?;
        progress.report(100);
        Ok(AcquiredMedia {
            path,
            original_filename: "Иванов_интер.mp4".to_string(),
            size_bytes: url.len() as u64,
        })
    }
}

struct PassthroughTranscoder;

#[async_trait]
impl Transcoder for PassthroughTranscoder {
    async fn transcode(&self, input: &Path, output: &Path) -> StageResult<NormalizedAudio> {
        tokio::fs::copy(input, output).await?;
        Ok(NormalizedAudio {
            path: output.to_path_buf(),
        })
    }
}

struct NullStore;

#[async_trait]
impl ObjectStore for NullStore {
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

struct GatedRecognizer {
    gate: Gate,
}

#[async_trait]
impl Recognizer for GatedRecognizer {
    async fn recognize(&self, _audio: &StorageRef, _options: &EngineOptions) -> StageResult<Vec<DiarizedSegment>> {
        self.gate.recognize_calls.fetch_add(1, Ordering::SeqCst);
        self.gate.opened.cancelled().await;
        Ok(vec![
            DiarizedSegment {
                start_offset_ms: 0,
                end_offset_ms: 2000,
                tag: "1".to_string(),
                text: "Первая реплика".to_string(),
            },
            DiarizedSegment {
                start_offset_ms: 2000,
                end_offset_ms: 3000,
                tag: "2".to_string(),
                text: "Вторая реплика".to_string(),
            },
        ])
    }
}

/// Adapters whose recognizer waits on `gate`
pub fn gated_adapters(gate: &Gate) -> StageAdapters {
    StageAdapters {
        fetcher: Arc::new(FileFetcher),
        transcoder: Arc::new(PassthroughTranscoder),
        store: Arc::new(NullStore),
        recognizer: Arc::new(GatedRecognizer { gate: gate.clone() }),
    }
}
