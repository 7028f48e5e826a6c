//! Retention sweeper
//!
//! Periodically drops finished jobs and old batches from memory and lets the
//! submission limiter forget idle clients. Running and queued jobs are never
//! touched.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::rate_limit::SubmissionLimiter;
use super::registry::{BatchRegistry, JobStore};

/// Upper bound on the time between sweeps
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct RetentionSweeper {
    registry: Arc<dyn JobStore>,
    batches: Arc<BatchRegistry>,
    limiter: SubmissionLimiter,
    retention: Duration,
}

impl RetentionSweeper {
    pub fn new(
        registry: Arc<dyn JobStore>,
        batches: Arc<BatchRegistry>,
        limiter: SubmissionLimiter,
        retention: Duration,
    ) -> Self {
        Self {
            registry,
            batches,
            limiter,
            retention,
        }
    }

    /// One pass; returns the number of jobs removed
    pub async fn sweep(&self) -> usize {
        let Ok(retention) = chrono::Duration::from_std(self.retention) else {
            return 0;
        };
        let cutoff = Utc::now() - retention;

        let removed = self.registry.remove_finished_before(cutoff).await;
        let batches = self.batches.remove_created_before(cutoff).await;
        self.limiter.shrink();

        if !removed.is_empty() || batches > 0 {
            tracing::info!(jobs = removed.len(), batches, "Expired records removed");
        }
        removed.len()
    }

    /// Sweep in the background until the runtime shuts down
    pub fn spawn(self) -> JoinHandle<()> {
        let period = (self.retention / 4).clamp(Duration::from_secs(1), MAX_SWEEP_INTERVAL);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }
}
