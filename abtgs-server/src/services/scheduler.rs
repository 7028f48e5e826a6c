//! Scheduler
//!
//! Bounded-concurrency executor over a FIFO admission queue.
//!
//! **Slots:** `max_concurrent` semaphore permits. The dispatcher takes a permit
//! before taking the next job id off the queue, so jobs are admitted strictly in
//! submission order and a freed slot immediately admits the next queued job.
//!
//! **Isolation:** every pipeline runs in its own task. A panicking pipeline
//! marks only its own job as failed; the slot is released either way.

use abtgs_common::events::{AbtgsEvent, EventBus, JobState};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::pipeline::JobPipeline;
use super::registry::{JobHandle, JobStore};
use crate::models::{EngineOptions, Job, JobSource};

#[derive(Debug, Error, PartialEq)]
pub enum SchedulerError {
    #[error("Job not found: {0}")]
    NotFound(Uuid),

    #[error("Job {id} already finished ({state})")]
    AlreadyTerminal { id: Uuid, state: JobState },

    #[error("Scheduler is shutting down")]
    ShuttingDown,
}

type TokenMap = Arc<RwLock<HashMap<Uuid, CancellationToken>>>;

pub struct Scheduler {
    registry: Arc<dyn JobStore>,
    event_bus: EventBus,
    queue_tx: mpsc::UnboundedSender<Uuid>,
    /// Serializes create + enqueue so queue order matches creation order
    admission: Mutex<()>,
    tokens: TokenMap,
    running: Arc<AtomicUsize>,
    max_concurrent: usize,
}

impl Scheduler {
    /// Start the dispatcher loop
    ///
    /// Must be called from within a tokio runtime. The loop ends when the
    /// scheduler is dropped.
    pub fn start(
        max_concurrent: usize,
        registry: Arc<dyn JobStore>,
        pipeline: Arc<JobPipeline>,
        event_bus: EventBus,
    ) -> Self {
        let max_concurrent = max_concurrent.max(1);
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let tokens: TokenMap = Arc::new(RwLock::new(HashMap::new()));
        let running = Arc::new(AtomicUsize::new(0));

        tokio::spawn(dispatch_loop(
            queue_rx,
            Arc::new(Semaphore::new(max_concurrent)),
            registry.clone(),
            pipeline,
            event_bus.clone(),
            tokens.clone(),
            running.clone(),
        ));

        tracing::info!(max_concurrent, "Scheduler started");

        Self {
            registry,
            event_bus,
            queue_tx,
            admission: Mutex::new(()),
            tokens,
            running,
            max_concurrent,
        }
    }

    /// Create a Queued job and put it at the back of the admission queue
    pub async fn submit(&self, source: JobSource, engine: EngineOptions) -> Result<Uuid, SchedulerError> {
        let _admission = self.admission.lock().await;

        let job = Job::new(source, engine);
        let id = job.id;
        let display_name = job.source.display_name().to_string();

        self.tokens.write().await.insert(id, CancellationToken::new());
        self.registry.insert(job).await;

        if self.queue_tx.send(id).is_err() {
            self.tokens.write().await.remove(&id);
            return Err(SchedulerError::ShuttingDown);
        }

        tracing::info!(job_id = %id, source = %display_name, "Job queued");
        self.event_bus.emit_lossy(AbtgsEvent::JobQueued {
            job_id: id,
            source: display_name,
            timestamp: Utc::now(),
        });
        Ok(id)
    }

    /// Request cancellation
    ///
    /// A queued job is cancelled at once and never occupies a slot. A running
    /// job is signalled and stops at its next cancellation point. Returns the
    /// state observed when the request was handled.
    pub async fn cancel(&self, id: Uuid) -> Result<JobState, SchedulerError> {
        let handle = self
            .registry
            .get(&id)
            .await
            .ok_or(SchedulerError::NotFound(id))?;
        let token = self.tokens.read().await.get(&id).cloned();

        let mut job = handle.write().await;
        let state = job.state;

        if state.is_terminal() {
            return Err(SchedulerError::AlreadyTerminal { id, state });
        }

        if let Some(token) = token {
            token.cancel();
        }

        if state == JobState::Queued {
            if let Ok(t) = job.transition_to(JobState::Cancelled) {
                drop(job);
                self.event_bus.emit_lossy(AbtgsEvent::JobStateChanged {
                    job_id: id,
                    old_state: t.old_state,
                    new_state: t.new_state,
                    timestamp: t.transitioned_at,
                });
                self.event_bus.emit_lossy(AbtgsEvent::JobCancelled {
                    job_id: id,
                    timestamp: t.transitioned_at,
                });
            }
            tracing::info!(job_id = %id, "Queued job cancelled");
            return Ok(JobState::Cancelled);
        }

        tracing::info!(job_id = %id, state = %state, "Cancellation requested for running job");
        Ok(state)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Pipelines currently holding a slot
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }
}

async fn dispatch_loop(
    mut queue_rx: mpsc::UnboundedReceiver<Uuid>,
    slots: Arc<Semaphore>,
    registry: Arc<dyn JobStore>,
    pipeline: Arc<JobPipeline>,
    event_bus: EventBus,
    tokens: TokenMap,
    running: Arc<AtomicUsize>,
) {
    loop {
        let permit = match slots.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };

        let Some(id) = queue_rx.recv().await else {
            break;
        };

        let Some(handle) = registry.get(&id).await else {
            tracing::warn!(job_id = %id, "Queued job missing from registry");
            continue;
        };

        if handle.read().await.is_terminal() {
            tracing::debug!(job_id = %id, "Skipping job finished before admission");
            tokens.write().await.remove(&id);
            continue;
        }

        let token = tokens
            .read()
            .await
            .get(&id)
            .cloned()
            .unwrap_or_default();

        running.fetch_add(1, Ordering::SeqCst);
        let pipeline = pipeline.clone();
        let event_bus = event_bus.clone();
        let tokens = tokens.clone();
        let running = running.clone();

        tokio::spawn(async move {
            let worker = tokio::spawn({
                let pipeline = pipeline.clone();
                let handle = handle.clone();
                async move { pipeline.run(handle, token).await }
            });

            match worker.await {
                Ok(state) => tracing::debug!(job_id = %id, state = %state, "Slot released"),
                Err(e) => {
                    tracing::error!(job_id = %id, error = %e, "Job worker aborted");
                    mark_failed(&handle, &event_bus, format!("Internal error: worker aborted ({})", e)).await;
                }
            }

            tokens.write().await.remove(&id);
            running.fetch_sub(1, Ordering::SeqCst);
            drop(permit);
        });
    }

    tracing::debug!("Scheduler dispatcher stopped");
}

async fn mark_failed(handle: &JobHandle, event_bus: &EventBus, message: String) {
    let mut job = handle.write().await;
    let job_id = job.id;
    if let Ok(t) = job.fail(message.clone()) {
        drop(job);
        event_bus.emit_lossy(AbtgsEvent::JobStateChanged {
            job_id,
            old_state: t.old_state,
            new_state: t.new_state,
            timestamp: t.transitioned_at,
        });
        event_bus.emit_lossy(AbtgsEvent::JobFailed {
            job_id,
            error: message,
            timestamp: t.transitioned_at,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::testing::{gated_adapters, Gate};
    use crate::services::pipeline::PipelineSettings;
    use crate::services::registry::InMemoryJobRegistry;
    use crate::utils::retry::RetryPolicy;
    use std::time::Duration;

    fn pipeline(gate: &Gate, dir: &std::path::Path) -> Arc<JobPipeline> {
        Arc::new(JobPipeline::new(
            gated_adapters(gate),
            PipelineSettings {
                work_dir: dir.to_path_buf(),
                max_file_size_bytes: 1 << 20,
                allowed_extensions: vec![".mp4".to_string()],
                technical_markers: vec![],
                candidates: vec![],
                retry: RetryPolicy::default(),
            },
            EventBus::new(256),
        ))
    }

    fn link(n: usize) -> JobSource {
        JobSource::Link {
            url: format!("https://yadi.sk/d/{}", n),
        }
    }

    async fn state_of(registry: &InMemoryJobRegistry, id: Uuid) -> JobState {
        registry.get(&id).await.unwrap().read().await.state
    }

    async fn wait_for_state(registry: &InMemoryJobRegistry, id: Uuid, state: JobState) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while state_of(registry, id).await != state {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("job did not reach expected state in time");
    }

    #[tokio::test]
    async fn test_fifo_admission_with_single_slot() {
        let dir = tempfile::tempdir().unwrap();
        let gate = Gate::default();
        let registry = Arc::new(InMemoryJobRegistry::new());
        let scheduler = Scheduler::start(1, registry.clone(), pipeline(&gate, dir.path()), EventBus::new(16));

        let first = scheduler.submit(link(1), EngineOptions::default()).await.unwrap();
        let second = scheduler.submit(link(2), EngineOptions::default()).await.unwrap();

        wait_for_state(&registry, first, JobState::Transcribing).await;
        assert_eq!(state_of(&registry, second).await, JobState::Queued);
        assert_eq!(scheduler.running(), 1);

        gate.open();
        wait_for_state(&registry, second, JobState::Completed).await;
        assert_eq!(state_of(&registry, first).await, JobState::Completed);
    }

    #[tokio::test]
    async fn test_cancel_queued_job_never_runs() {
        let dir = tempfile::tempdir().unwrap();
        let gate = Gate::default();
        let registry = Arc::new(InMemoryJobRegistry::new());
        let scheduler = Scheduler::start(1, registry.clone(), pipeline(&gate, dir.path()), EventBus::new(16));

        let first = scheduler.submit(link(1), EngineOptions::default()).await.unwrap();
        let second = scheduler.submit(link(2), EngineOptions::default()).await.unwrap();
        wait_for_state(&registry, first, JobState::Transcribing).await;

        assert_eq!(scheduler.cancel(second).await, Ok(JobState::Cancelled));
        assert_eq!(
            scheduler.cancel(second).await,
            Err(SchedulerError::AlreadyTerminal {
                id: second,
                state: JobState::Cancelled
            })
        );

        gate.open();
        wait_for_state(&registry, first, JobState::Completed).await;
        assert_eq!(state_of(&registry, second).await, JobState::Cancelled);
        assert_eq!(gate.recognize_calls(), 1);
    }

    #[tokio::test]
    async fn test_cancel_running_job() {
        let dir = tempfile::tempdir().unwrap();
        let gate = Gate::default();
        let registry = Arc::new(InMemoryJobRegistry::new());
        let scheduler = Scheduler::start(2, registry.clone(), pipeline(&gate, dir.path()), EventBus::new(16));

        let id = scheduler.submit(link(1), EngineOptions::default()).await.unwrap();
        wait_for_state(&registry, id, JobState::Transcribing).await;

        assert_eq!(scheduler.cancel(id).await, Ok(JobState::Transcribing));
        wait_for_state(&registry, id, JobState::Cancelled).await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while scheduler.running() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("slot not released");
    }

    #[tokio::test]
    async fn test_cancel_unknown_job() {
        let dir = tempfile::tempdir().unwrap();
        let gate = Gate::default();
        let registry = Arc::new(InMemoryJobRegistry::new());
        let scheduler = Scheduler::start(1, registry, pipeline(&gate, dir.path()), EventBus::new(16));
        let id = Uuid::new_v4();
        assert_eq!(scheduler.cancel(id).await, Err(SchedulerError::NotFound(id)));
    }
}
