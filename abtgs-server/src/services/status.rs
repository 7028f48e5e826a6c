//! Status Reporter
//!
//! Read-only polling queries over the job registry. Batch aggregation reads
//! records one at a time and never holds more than one record lock.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::registry::{BatchRegistry, JobStore};
use crate::models::{Job, JobState};

/// Single-job polling payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub status: JobState,
    pub status_label: String,
    pub progress_percent: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl JobStatusView {
    pub fn from_job(job: &Job) -> Self {
        Self {
            status: job.state,
            status_label: job.state.label().to_string(),
            progress_percent: job.progress_percent,
            error: job.error.clone(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// One row of a batch payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFileStatus {
    pub id: String,
    pub filename: String,
    pub status: JobState,
    pub status_label: String,
    pub progress_percent: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

/// Batch polling payload
///
/// `completed + errors + in_progress == total` holds for every value built by
/// [`BatchStatusView::from_files`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStatusView {
    pub total: usize,
    pub completed: usize,
    pub errors: usize,
    pub in_progress: usize,
    pub files: Vec<BatchFileStatus>,
}

impl BatchStatusView {
    pub fn from_files(files: Vec<BatchFileStatus>) -> Self {
        let mut completed = 0;
        let mut errors = 0;
        let mut in_progress = 0;
        for file in &files {
            match file.status {
                JobState::Completed => completed += 1,
                JobState::Error | JobState::Cancelled => errors += 1,
                _ => in_progress += 1,
            }
        }
        Self {
            total: files.len(),
            completed,
            errors,
            in_progress,
            files,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.in_progress == 0
    }
}

/// In-process status queries
#[derive(Clone)]
pub struct StatusReporter {
    registry: Arc<dyn JobStore>,
    batches: Arc<BatchRegistry>,
}

impl StatusReporter {
    pub fn new(registry: Arc<dyn JobStore>, batches: Arc<BatchRegistry>) -> Self {
        Self { registry, batches }
    }

    pub async fn job_status(&self, id: &Uuid) -> Option<JobStatusView> {
        let handle = self.registry.get(id).await?;
        let job = handle.read().await;
        Some(JobStatusView::from_job(&job))
    }

    /// Aggregate over arbitrary ids
    ///
    /// Ids that are malformed or unknown are listed as errors so the totals
    /// always cover every requested id.
    pub async fn batch_status(&self, ids: &[String]) -> BatchStatusView {
        let mut files = Vec::with_capacity(ids.len());

        for raw_id in ids {
            let handle = match Uuid::parse_str(raw_id) {
                Ok(id) => self.registry.get(&id).await,
                Err(_) => None,
            };

            let row = match handle {
                Some(handle) => {
                    let job = handle.read().await;
                    BatchFileStatus {
                        id: raw_id.clone(),
                        filename: job.display_name(),
                        status: job.state,
                        status_label: job.state.label().to_string(),
                        progress_percent: job.progress_percent,
                        error: job.error.clone(),
                    }
                }
                None => BatchFileStatus {
                    id: raw_id.clone(),
                    filename: String::new(),
                    status: JobState::Error,
                    status_label: JobState::Error.label().to_string(),
                    progress_percent: None,
                    error: Some("Job not found".to_string()),
                },
            };
            files.push(row);
        }

        BatchStatusView::from_files(files)
    }

    /// Aggregate over a registered batch
    pub async fn batch_status_by_id(&self, batch_id: &Uuid) -> Option<BatchStatusView> {
        let batch = self.batches.get(batch_id).await?;
        let ids: Vec<String> = batch.job_ids.iter().map(Uuid::to_string).collect();
        Some(self.batch_status(&ids).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Batch, EngineOptions, JobSource};
    use crate::services::registry::InMemoryJobRegistry;

    fn job(url: &str) -> Job {
        Job::new(
            JobSource::Link { url: url.to_string() },
            EngineOptions::default(),
        )
    }

    async fn reporter_with(states: &[JobState]) -> (StatusReporter, Vec<Uuid>) {
        let registry = Arc::new(InMemoryJobRegistry::new());
        let mut ids = Vec::new();
        for (i, target) in states.iter().enumerate() {
            let mut job = job(&format!("https://yadi.sk/d/{}", i));
            let path = [
                JobState::Downloading,
                JobState::Converting,
                JobState::Uploading,
                JobState::Transcribing,
                JobState::Completed,
            ];
            match target {
                JobState::Queued => {}
                JobState::Error => {
                    job.fail("boom").unwrap();
                }
                JobState::Cancelled => {
                    job.transition_to(JobState::Cancelled).unwrap();
                }
                other => {
                    for next in path {
                        job.transition_to(next).unwrap();
                        if next == *other {
                            break;
                        }
                    }
                }
            }
            ids.push(job.id);
            registry.insert(job).await;
        }
        (
            StatusReporter::new(registry, Arc::new(BatchRegistry::new())),
            ids,
        )
    }

    #[tokio::test]
    async fn test_job_status_labels() {
        let (reporter, ids) = reporter_with(&[JobState::Queued, JobState::Error]).await;
        let queued = reporter.job_status(&ids[0]).await.unwrap();
        assert_eq!(queued.status, JobState::Queued);
        assert_eq!(queued.status_label, "В очереди");

        let failed = reporter.job_status(&ids[1]).await.unwrap();
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert!(reporter.job_status(&Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn test_batch_counts_cover_every_state() {
        let states = JobState::ALL;
        let (reporter, ids) = reporter_with(&states).await;
        let raw: Vec<String> = ids.iter().map(Uuid::to_string).collect();
        let view = reporter.batch_status(&raw).await;

        assert_eq!(view.total, states.len());
        assert_eq!(view.completed + view.errors + view.in_progress, view.total);
        assert_eq!(view.completed, 1);
        assert_eq!(view.errors, 2);
        assert_eq!(view.in_progress, 5);
        assert!(!view.is_finished());
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_ids_count_as_errors() {
        let (reporter, ids) = reporter_with(&[JobState::Completed]).await;
        let raw = vec![
            ids[0].to_string(),
            Uuid::new_v4().to_string(),
            "not-a-uuid".to_string(),
        ];
        let view = reporter.batch_status(&raw).await;
        assert_eq!(view.total, 3);
        assert_eq!(view.completed, 1);
        assert_eq!(view.errors, 2);
        assert!(view.is_finished());
    }

    #[tokio::test]
    async fn test_registered_batch() {
        let registry = Arc::new(InMemoryJobRegistry::new());
        let batches = Arc::new(BatchRegistry::new());
        let a = job("https://yadi.sk/d/a");
        let ids = vec![a.id];
        registry.insert(a).await;
        let batch_id = batches.insert(Batch::new(ids)).await;

        let reporter = StatusReporter::new(registry, batches);
        let view = reporter.batch_status_by_id(&batch_id).await.unwrap();
        assert_eq!(view.total, 1);
        assert_eq!(view.in_progress, 1);
        assert!(reporter.batch_status_by_id(&Uuid::new_v4()).await.is_none());
    }
}
