//! Job Pipeline
//!
//! Runs one job through Acquire → Transcode → Upload → Recognize, then builds
//! the review state (initial speaker bindings) and completes the job.
//!
//! **Cancellation:** the job's token is checked at every stage boundary and
//! raced against every suspending stage. A cancelled job ends in `Cancelled`.
//!
//! **Cleanup:** the job's scratch directory, the uploaded source file and the
//! stored audio object are removed whatever the outcome.
//!
//! **Autosave:** a completed upload is rendered with its suggested speaker
//! names and written to the output directory. A failed autosave is logged and
//! leaves the job Completed.

use abtgs_common::events::{AbtgsEvent, EventBus, JobState};
use chrono::Utc;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::export::ExportService;
use super::filename_meta::{parse_filename_metadata, suggest_speaker_names};
use super::identity_resolver::{aggregate_durations, SpeakerIdentityResolver};
use super::registry::JobHandle;
use super::validation::{validate_file_extension, validate_file_size};
use crate::adapters::{
    acquire_uploaded, AcquiredMedia, ProgressSink, StageAdapters, StageError, StageResult, StorageRef,
};
use crate::models::{
    Candidate, DiarizedSegment, DiarizedTranscript, EngineOptions, JobSource, ReviewState,
    TranscriptResult,
};
use crate::utils::retry::{retry_transient, RetryPolicy};

/// Pipeline limits and review defaults
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Parent of the per-job scratch directories
    pub work_dir: PathBuf,
    pub max_file_size_bytes: u64,
    pub allowed_extensions: Vec<String>,
    pub technical_markers: Vec<String>,
    pub candidates: Vec<Candidate>,
    pub retry: RetryPolicy,
}

struct Autosave {
    export: ExportService,
    output_dir: PathBuf,
}

pub struct JobPipeline {
    adapters: StageAdapters,
    settings: PipelineSettings,
    event_bus: EventBus,
    autosave: Option<Autosave>,
}

/// Race a stage against the job's cancellation token
async fn cancellable<T, F>(cancel: &CancellationToken, stage: F) -> StageResult<T>
where
    F: Future<Output = StageResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StageError::Cancelled),
        result = stage => result,
    }
}

impl JobPipeline {
    pub fn new(adapters: StageAdapters, settings: PipelineSettings, event_bus: EventBus) -> Self {
        Self {
            adapters,
            settings,
            event_bus,
            autosave: None,
        }
    }

    /// Autosave completed uploads into `output_dir`
    pub fn with_autosave(mut self, export: ExportService, output_dir: impl Into<PathBuf>) -> Self {
        self.autosave = Some(Autosave {
            export,
            output_dir: output_dir.into(),
        });
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Execute the job to a terminal state and return that state
    pub async fn run(&self, handle: JobHandle, cancel: CancellationToken) -> JobState {
        let (job_id, source, engine) = {
            let job = handle.read().await;
            (job.id, job.source.clone(), job.engine.clone())
        };
        let scratch = self.settings.work_dir.join(job_id.to_string());

        tracing::info!(job_id = %job_id, source = %source.display_name(), "Job started");

        let mut stored: Option<StorageRef> = None;
        let outcome = self
            .execute(&handle, job_id, &source, &engine, &scratch, &cancel, &mut stored)
            .await;

        self.cleanup(job_id, &source, &scratch, stored).await;

        match outcome {
            Ok(()) => {
                if matches!(source, JobSource::Upload { .. }) {
                    self.autosave(&handle).await;
                }
                JobState::Completed
            }
            Err(StageError::Cancelled) => {
                tracing::info!(job_id = %job_id, "Job cancelled");
                self.finish(&handle, JobState::Cancelled, None).await
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Job failed");
                self.finish(&handle, JobState::Error, Some(e.to_string())).await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute(
        &self,
        handle: &JobHandle,
        job_id: Uuid,
        source: &JobSource,
        engine: &EngineOptions,
        scratch: &Path,
        cancel: &CancellationToken,
        stored: &mut Option<StorageRef>,
    ) -> StageResult<()> {
        tokio::fs::create_dir_all(scratch).await?;

        // Acquire
        self.advance(handle, JobState::Downloading, cancel).await?;
        let media = self.acquire(handle, job_id, source, scratch, cancel).await?;
        validate_file_extension(&media.original_filename, &self.settings.allowed_extensions)?;
        validate_file_size(media.size_bytes, self.settings.max_file_size_bytes)?;
        handle.write().await.original_filename = Some(media.original_filename.clone());

        // Transcode
        self.advance(handle, JobState::Converting, cancel).await?;
        let audio_path = scratch.join("audio.opus");
        let audio = cancellable(
            cancel,
            self.adapters.transcoder.transcode(&media.path, &audio_path),
        )
        .await?;
        tracing::debug!(job_id = %job_id, audio = %audio.path.display(), "Transcode finished");

        // Upload
        self.advance(handle, JobState::Uploading, cancel).await?;
        let object_name = format!("{}.opus", job_id);
        let store = self.adapters.store.clone();
        let object = cancellable(
            cancel,
            retry_transient("upload", &self.settings.retry, || {
                store.put(&audio.path, &object_name)
            }),
        )
        .await?;
        *stored = Some(object.clone());

        // Recognize
        self.advance(handle, JobState::Transcribing, cancel).await?;
        let segments = cancellable(cancel, self.adapters.recognizer.recognize(&object, engine)).await?;

        if cancel.is_cancelled() {
            return Err(StageError::Cancelled);
        }
        self.complete(handle, job_id, &media.original_filename, segments).await
    }

    async fn acquire(
        &self,
        handle: &JobHandle,
        job_id: Uuid,
        source: &JobSource,
        scratch: &Path,
        cancel: &CancellationToken,
    ) -> StageResult<AcquiredMedia> {
        match source {
            JobSource::Upload { path, filename } => {
                cancellable(cancel, acquire_uploaded(path, filename)).await
            }
            JobSource::Link { url } => {
                let (sink, mut rx) = ProgressSink::channel();
                let forward_handle = handle.clone();
                let bus = self.event_bus.clone();
                let forwarder = tokio::spawn(async move {
                    let mut last: Option<u8> = None;
                    while let Some(percent) = rx.recv().await {
                        if last == Some(percent) {
                            continue;
                        }
                        last = Some(percent);
                        let mut job = forward_handle.write().await;
                        if job.state != JobState::Downloading {
                            continue;
                        }
                        job.progress_percent = Some(percent);
                        drop(job);
                        bus.emit_lossy(AbtgsEvent::JobProgress {
                            job_id,
                            state: JobState::Downloading,
                            progress_percent: percent,
                            timestamp: Utc::now(),
                        });
                    }
                });

                let fetcher = self.adapters.fetcher.clone();
                let result = cancellable(
                    cancel,
                    retry_transient("acquire", &self.settings.retry, || {
                        fetcher.fetch(url, scratch, sink.clone())
                    }),
                )
                .await;

                drop(sink);
                if let Err(e) = forwarder.await {
                    tracing::warn!(job_id = %job_id, error = %e, "Progress forwarder stopped abnormally");
                }
                result
            }
        }
    }

    /// Build review state from recognizer output and move to Completed
    async fn complete(
        &self,
        handle: &JobHandle,
        job_id: Uuid,
        original_filename: &str,
        segments: Vec<DiarizedSegment>,
    ) -> StageResult<()> {
        let transcript = DiarizedTranscript::new(segments);
        let meta = parse_filename_metadata(original_filename).into_transcript_meta(original_filename);

        let tags_by_duration: Vec<String> = aggregate_durations(transcript.segments())
            .into_iter()
            .map(|(tag, _)| tag)
            .collect();
        let suggested = suggest_speaker_names(&tags_by_duration, &meta.speakers);

        let resolver = SpeakerIdentityResolver::compute_initial_bindings(
            transcript.segments(),
            &suggested,
            self.settings.candidates.clone(),
            &self.settings.technical_markers,
        );

        let segment_count = transcript.len();
        let speaker_count = resolver.stats().len();
        let result = TranscriptResult {
            stats: resolver.stats().to_vec(),
            transcript,
            meta,
        };

        let transition = {
            let mut job = handle.write().await;
            job.result = Some(result);
            job.review = Some(ReviewState::new(resolver));
            job.transition_to(JobState::Completed)
                .map_err(|e| StageError::Internal(e.to_string()))?
        };

        self.event_bus.emit_lossy(AbtgsEvent::JobStateChanged {
            job_id,
            old_state: transition.old_state,
            new_state: transition.new_state,
            timestamp: transition.transitioned_at,
        });
        self.event_bus.emit_lossy(AbtgsEvent::JobCompleted {
            job_id,
            segment_count,
            speaker_count,
            timestamp: Utc::now(),
        });

        tracing::info!(job_id = %job_id, segment_count, speaker_count, "Job completed");
        Ok(())
    }

    async fn autosave(&self, handle: &JobHandle) {
        let Some(autosave) = &self.autosave else {
            return;
        };
        let snapshot = handle.read().await.clone();
        if let Err(e) = autosave.export.autosave(&snapshot, &autosave.output_dir).await {
            tracing::warn!(job_id = %snapshot.id, error = %e, "Autosave failed");
        }
    }

    /// Move to the next stage unless cancellation was requested
    async fn advance(
        &self,
        handle: &JobHandle,
        to: JobState,
        cancel: &CancellationToken,
    ) -> StageResult<()> {
        if cancel.is_cancelled() {
            return Err(StageError::Cancelled);
        }

        let transition = handle
            .write()
            .await
            .transition_to(to)
            .map_err(|e| StageError::Internal(e.to_string()))?;

        tracing::debug!(
            job_id = %transition.job_id,
            old_state = %transition.old_state,
            new_state = %transition.new_state,
            "Job state changed"
        );
        self.event_bus.emit_lossy(AbtgsEvent::JobStateChanged {
            job_id: transition.job_id,
            old_state: transition.old_state,
            new_state: transition.new_state,
            timestamp: transition.transitioned_at,
        });
        Ok(())
    }

    /// Record the terminal state for a stopped job
    async fn finish(&self, handle: &JobHandle, state: JobState, error: Option<String>) -> JobState {
        let mut job = handle.write().await;
        let job_id = job.id;

        let transition = match &error {
            Some(message) => job.fail(message.clone()),
            None => job.transition_to(state),
        };

        match transition {
            Ok(t) => {
                drop(job);
                self.event_bus.emit_lossy(AbtgsEvent::JobStateChanged {
                    job_id,
                    old_state: t.old_state,
                    new_state: t.new_state,
                    timestamp: t.transitioned_at,
                });
                let event = match error {
                    Some(error) => AbtgsEvent::JobFailed {
                        job_id,
                        error,
                        timestamp: t.transitioned_at,
                    },
                    None => AbtgsEvent::JobCancelled {
                        job_id,
                        timestamp: t.transitioned_at,
                    },
                };
                self.event_bus.emit_lossy(event);
                state
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Job already terminal");
                job.state
            }
        }
    }

    async fn cleanup(&self, job_id: Uuid, source: &JobSource, scratch: &Path, stored: Option<StorageRef>) {
        if let Err(e) = tokio::fs::remove_dir_all(scratch).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to remove scratch directory");
            }
        }

        if let JobSource::Upload { path, .. } = source {
            if let Err(e) = tokio::fs::remove_file(path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(job_id = %job_id, error = %e, "Failed to remove uploaded file");
                }
            }
        }

        if let Some(object) = stored {
            if let Err(e) = self.adapters.store.delete(&object).await {
                tracing::warn!(job_id = %job_id, object = %object.object_name, error = %e, "Failed to delete stored object");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MediaFetcher, NormalizedAudio, ObjectStore, Recognizer, Transcoder};
    use crate::models::{Job, SpeakerBinding};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::RwLock;

    struct FakeFetcher {
        filename: String,
        fail_with: Option<fn() -> StageError>,
    }

    #[async_trait]
    impl MediaFetcher for FakeFetcher {
        async fn fetch(&self, _url: &str, dest_dir: &Path, progress: ProgressSink) -> StageResult<AcquiredMedia> {
            if let Some(make) = self.fail_with {
                return Err(make());
            }
            let path = dest_dir.join("source.bin");
            tokio::fs::write(&path, b"media").await?;
            progress.report(50);
            progress.report(100);
            Ok(AcquiredMedia {
                path,
                original_filename: self.filename.clone(),
                size_bytes: 5,
            })
        }
    }

    struct CopyTranscoder;

    #[async_trait]
    impl Transcoder for CopyTranscoder {
        async fn transcode(&self, input: &Path, output: &Path) -> StageResult<NormalizedAudio> {
            tokio::fs::copy(input, output).await?;
            Ok(NormalizedAudio {
                path: output.to_path_buf(),
            })
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        async fn put(&self, _local: &Path, object_name: &str) -> StageResult<StorageRef> {
            Ok(StorageRef {
                object_name: object_name.to_string(),
                uri: format!("mem://{}", object_name),
            })
        }

        async fn delete(&self, object: &StorageRef) -> StageResult<()> {
            self.deleted.lock().unwrap().push(object.object_name.clone());
            Ok(())
        }
    }

    struct ScriptedRecognizer {
        calls: AtomicUsize,
        hang: bool,
    }

    #[async_trait]
    impl Recognizer for ScriptedRecognizer {
        async fn recognize(&self, _audio: &StorageRef, _options: &EngineOptions) -> StageResult<Vec<DiarizedSegment>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                futures::future::pending::<()>().await;
            }
            Ok(vec![
                DiarizedSegment {
                    start_offset_ms: 0,
                    end_offset_ms: 3000,
                    tag: "1".to_string(),
                    text: "Вопрос".to_string(),
                },
                DiarizedSegment {
                    start_offset_ms: 3000,
                    end_offset_ms: 9000,
                    tag: "2".to_string(),
                    text: "Ответ".to_string(),
                },
            ])
        }
    }

    struct Fixture {
        pipeline: JobPipeline,
        store: Arc<MemoryStore>,
        recognizer: Arc<ScriptedRecognizer>,
        _dir: tempfile::TempDir,
    }

    fn fixture(fetcher: FakeFetcher, hang: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::default());
        let recognizer = Arc::new(ScriptedRecognizer {
            calls: AtomicUsize::new(0),
            hang,
        });
        let adapters = StageAdapters {
            fetcher: Arc::new(fetcher),
            transcoder: Arc::new(CopyTranscoder),
            store: store.clone(),
            recognizer: recognizer.clone(),
        };
        let settings = PipelineSettings {
            work_dir: dir.path().join("work"),
            max_file_size_bytes: 1024,
            allowed_extensions: vec![".mp4".to_string(), ".mxf".to_string()],
            technical_markers: vec!["ЗК".to_string()],
            candidates: vec![Candidate {
                id: "c-1".to_string(),
                name: "Иванов".to_string(),
                abbreviation: "ИВА".to_string(),
            }],
            retry: RetryPolicy::default(),
        };
        Fixture {
            pipeline: JobPipeline::new(adapters, settings, EventBus::new(64)),
            store,
            recognizer,
            _dir: dir,
        }
    }

    fn link_job() -> JobHandle {
        Arc::new(RwLock::new(Job::new(
            JobSource::Link {
                url: "https://yadi.sk/d/x".to_string(),
            },
            EngineOptions::default(),
        )))
    }

    fn fetcher(filename: &str) -> FakeFetcher {
        FakeFetcher {
            filename: filename.to_string(),
            fail_with: None,
        }
    }

    #[tokio::test]
    async fn test_successful_run_builds_review_state() {
        let fx = fixture(fetcher("Иванов, Петрова_10:00:00:00.mp4"), false);
        let handle = link_job();

        let state = fx.pipeline.run(handle.clone(), CancellationToken::new()).await;
        assert_eq!(state, JobState::Completed);

        let job = handle.read().await;
        assert_eq!(job.progress_percent, Some(100));
        assert_eq!(job.original_filename.as_deref(), Some("Иванов, Петрова_10:00:00:00.mp4"));

        let result = job.result.as_ref().unwrap();
        assert_eq!(result.transcript.len(), 2);
        assert_eq!(result.meta.start_tc.to_string(), "10:00:00:00");

        // Longest speaker ("2") takes the first filename name, which is a candidate
        let review = job.review.as_ref().unwrap();
        assert_eq!(
            review.resolver.binding("2").unwrap(),
            &SpeakerBinding::CandidateBound {
                candidate_id: "c-1".to_string()
            }
        );
        assert_eq!(review.resolver.resolve("1").unwrap().name, "Петрова");

        assert_eq!(fx.store.deleted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_acquire_failure_never_reaches_transcribing() {
        let fx = fixture(
            FakeFetcher {
                filename: String::new(),
                fail_with: Some(|| StageError::NotFound("no such resource".into())),
            },
            false,
        );
        let handle = link_job();
        let mut events = fx.pipeline.event_bus.subscribe();

        let state = fx.pipeline.run(handle.clone(), CancellationToken::new()).await;
        assert_eq!(state, JobState::Error);
        assert_eq!(fx.recognizer.calls.load(Ordering::SeqCst), 0);

        let job = handle.read().await;
        assert!(job.error.as_deref().unwrap().contains("no such resource"));

        while let Ok(event) = events.try_recv() {
            if let AbtgsEvent::JobStateChanged { new_state, .. } = event {
                assert_ne!(new_state, JobState::Transcribing);
            }
        }
    }

    #[tokio::test]
    async fn test_unsupported_extension_fails_fast() {
        let fx = fixture(fetcher("notes.txt"), false);
        let handle = link_job();
        let state = fx.pipeline.run(handle.clone(), CancellationToken::new()).await;
        assert_eq!(state, JobState::Error);
        assert!(handle.read().await.error.as_deref().unwrap().starts_with("Unsupported format"));
    }

    #[tokio::test]
    async fn test_cancel_during_recognition() {
        let fx = fixture(fetcher("a.mp4"), true);
        let handle = link_job();
        let cancel = CancellationToken::new();

        let pipeline = Arc::new(fx.pipeline);
        let task = {
            let pipeline = pipeline.clone();
            let handle = handle.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { pipeline.run(handle, cancel).await })
        };

        while handle.read().await.state != JobState::Transcribing {
            tokio::task::yield_now().await;
        }
        cancel.cancel();

        assert_eq!(task.await.unwrap(), JobState::Cancelled);
        assert!(handle.read().await.is_terminal());
        // Stored object removed even though the job did not complete
        assert_eq!(fx.store.deleted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let fx = fixture(fetcher("a.mp4"), false);
        let handle = link_job();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(fx.pipeline.run(handle.clone(), cancel).await, JobState::Cancelled);
        assert!(!fx.pipeline.settings().work_dir.join(handle.read().await.id.to_string()).exists());
    }
}
