//! Status Poller (client side)
//!
//! Fixed-interval polling of job or batch status with a single cancellable
//! timer. Cancelling drops the pending sleep inside `tokio::select!`, so no
//! update callback runs after cancellation has been observed.
//!
//! - single job: stops at a terminal status, or when the job is unknown
//! - batch: stops when `in_progress == 0`
//! - transport and decode errors are reported through the callback and
//!   polling continues

use async_trait::async_trait;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::status::{BatchStatusView, JobStatusView, StatusReporter};

/// Default polling interval; services advertise theirs in `/health`
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PollError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed status payload: {0}")]
    Decode(String),
}

/// Where status comes from
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn job_status(&self, id: &str) -> Result<JobStatusView, PollError>;

    async fn batch_status(&self, ids: &[String]) -> Result<BatchStatusView, PollError>;
}

#[async_trait]
impl StatusSource for StatusReporter {
    async fn job_status(&self, id: &str) -> Result<JobStatusView, PollError> {
        let uuid = Uuid::parse_str(id).map_err(|_| PollError::NotFound(id.to_string()))?;
        StatusReporter::job_status(self, &uuid)
            .await
            .ok_or_else(|| PollError::NotFound(id.to_string()))
    }

    async fn batch_status(&self, ids: &[String]) -> Result<BatchStatusView, PollError> {
        Ok(StatusReporter::batch_status(self, ids).await)
    }
}

/// Status over the service's HTTP API
pub struct HttpStatusClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpStatusClient {
    /// `base_url` is the service root, e.g. `http://127.0.0.1:5780`
    pub fn new(base_url: impl Into<String>) -> Result<Self, PollError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PollError::Transport(e.to_string()))?;
        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response, id: &str) -> Result<T, PollError> {
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PollError::NotFound(id.to_string()));
        }
        let response = response
            .error_for_status()
            .map_err(|e| PollError::Transport(e.to_string()))?;
        response.json().await.map_err(|e| PollError::Decode(e.to_string()))
    }
}

#[async_trait]
impl StatusSource for HttpStatusClient {
    async fn job_status(&self, id: &str) -> Result<JobStatusView, PollError> {
        let response = self
            .http_client
            .get(format!("{}/api/v1/projects/{}/status", self.base_url, id))
            .send()
            .await
            .map_err(|e| PollError::Transport(e.to_string()))?;
        Self::decode(response, id).await
    }

    async fn batch_status(&self, ids: &[String]) -> Result<BatchStatusView, PollError> {
        let response = self
            .http_client
            .post(format!("{}/api/v1/batch/status", self.base_url))
            .json(&json!({ "ids": ids }))
            .send()
            .await
            .map_err(|e| PollError::Transport(e.to_string()))?;
        Self::decode(response, "batch").await
    }
}

/// How a polling run ended
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T> {
    /// Last status seen, terminal for jobs, `in_progress == 0` for batches
    Finished(T),
    /// The service does not know the polled id
    NotFound(String),
    Cancelled,
}

/// Background polling task
pub struct PollHandle<T> {
    cancel: CancellationToken,
    join: JoinHandle<PollOutcome<T>>,
}

impl<T> PollHandle<T> {
    /// Stop polling; takes effect before the next callback
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn join(self) -> PollOutcome<T> {
        self.join.await.unwrap_or(PollOutcome::Cancelled)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StatusPoller {
    interval: Duration,
}

impl Default for StatusPoller {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl StatusPoller {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Poll one job until it is terminal or `cancel` fires
    pub async fn poll_job<S, F>(
        &self,
        source: &S,
        id: &str,
        cancel: &CancellationToken,
        on_update: F,
    ) -> PollOutcome<JobStatusView>
    where
        S: StatusSource + ?Sized,
        F: FnMut(Result<&JobStatusView, &PollError>),
    {
        self.run(cancel, || source.job_status(id), JobStatusView::is_terminal, on_update)
            .await
    }

    /// Poll a batch until nothing is in progress or `cancel` fires
    pub async fn poll_batch<S, F>(
        &self,
        source: &S,
        ids: &[String],
        cancel: &CancellationToken,
        on_update: F,
    ) -> PollOutcome<BatchStatusView>
    where
        S: StatusSource + ?Sized,
        F: FnMut(Result<&BatchStatusView, &PollError>),
    {
        self.run(cancel, || source.batch_status(ids), BatchStatusView::is_finished, on_update)
            .await
    }

    async fn run<T, Q, Fut, F>(
        &self,
        cancel: &CancellationToken,
        mut query: Q,
        done: fn(&T) -> bool,
        mut on_update: F,
    ) -> PollOutcome<T>
    where
        Q: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PollError>>,
        F: FnMut(Result<&T, &PollError>),
    {
        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return PollOutcome::Cancelled,
                result = query() => result,
            };

            let finished = match &result {
                Ok(status) => {
                    on_update(Ok(status));
                    done(status)
                }
                Err(e @ PollError::NotFound(id)) => {
                    on_update(Err(e));
                    return PollOutcome::NotFound(id.clone());
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Status poll failed, continuing");
                    on_update(Err(e));
                    false
                }
            };
            if finished {
                if let Ok(status) = result {
                    return PollOutcome::Finished(status);
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return PollOutcome::Cancelled,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    /// Poll a job in a background task
    pub fn spawn_job<F>(&self, source: Arc<dyn StatusSource>, id: String, mut on_update: F) -> PollHandle<JobStatusView>
    where
        F: FnMut(Result<&JobStatusView, &PollError>) + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let poller = *self;
        let join = tokio::spawn(async move {
            poller
                .poll_job(source.as_ref(), &id, &token, |update| on_update(update))
                .await
        });
        PollHandle { cancel, join }
    }

    /// Poll a batch in a background task
    pub fn spawn_batch<F>(
        &self,
        source: Arc<dyn StatusSource>,
        ids: Vec<String>,
        mut on_update: F,
    ) -> PollHandle<BatchStatusView>
    where
        F: FnMut(Result<&BatchStatusView, &PollError>) + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let poller = *self;
        let join = tokio::spawn(async move {
            poller
                .poll_batch(source.as_ref(), &ids, &token, |update| on_update(update))
                .await
        });
        PollHandle { cancel, join }
    }
}
