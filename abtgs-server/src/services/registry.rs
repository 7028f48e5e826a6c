//! Job Registry
//!
//! Authoritative table of job records. Each record sits behind its own lock;
//! the table lock is held only long enough to insert or look up a handle, so
//! a slow writer on one job never blocks readers of another.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{Batch, Job};

/// Shared, individually locked job record
pub type JobHandle = Arc<RwLock<Job>>;

/// Storage for job records
///
/// The in-memory implementation below is the only one shipped; a durable store
/// can be plugged in behind the same trait.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Add a new record and return its handle
    async fn insert(&self, job: Job) -> JobHandle;

    async fn get(&self, id: &Uuid) -> Option<JobHandle>;

    /// All ids in creation order
    async fn ids(&self) -> Vec<Uuid>;

    async fn len(&self) -> usize;

    /// Drop terminal jobs that finished before `cutoff`; returns their ids
    async fn remove_finished_before(&self, cutoff: DateTime<Utc>) -> Vec<Uuid>;
}

#[derive(Default)]
struct Table {
    records: HashMap<Uuid, JobHandle>,
    order: Vec<Uuid>,
}

/// Process-local registry
#[derive(Default)]
pub struct InMemoryJobRegistry {
    table: RwLock<Table>,
}

impl InMemoryJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobRegistry {
    async fn insert(&self, job: Job) -> JobHandle {
        let id = job.id;
        let handle = Arc::new(RwLock::new(job));
        let mut table = self.table.write().await;
        if table.records.insert(id, handle.clone()).is_none() {
            table.order.push(id);
        }
        handle
    }

    async fn get(&self, id: &Uuid) -> Option<JobHandle> {
        self.table.read().await.records.get(id).cloned()
    }

    async fn ids(&self) -> Vec<Uuid> {
        self.table.read().await.order.clone()
    }

    async fn len(&self) -> usize {
        self.table.read().await.records.len()
    }

    async fn remove_finished_before(&self, cutoff: DateTime<Utc>) -> Vec<Uuid> {
        // Snapshot handles first so no record lock is awaited under the table lock
        let handles: Vec<(Uuid, JobHandle)> = {
            let table = self.table.read().await;
            table.records.iter().map(|(id, h)| (*id, h.clone())).collect()
        };

        let mut expired = HashSet::new();
        for (id, handle) in handles {
            let job = handle.read().await;
            if job.is_terminal() && job.finished_at.is_some_and(|t| t < cutoff) {
                expired.insert(id);
            }
        }
        if expired.is_empty() {
            return Vec::new();
        }

        let mut table = self.table.write().await;
        table.records.retain(|id, _| !expired.contains(id));
        table.order.retain(|id| !expired.contains(id));
        expired.into_iter().collect()
    }
}

/// Batch contexts by id
#[derive(Default)]
pub struct BatchRegistry {
    batches: RwLock<HashMap<Uuid, Batch>>,
}

impl BatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, batch: Batch) -> Uuid {
        let id = batch.id;
        self.batches.write().await.insert(id, batch);
        id
    }

    pub async fn get(&self, id: &Uuid) -> Option<Batch> {
        self.batches.read().await.get(id).cloned()
    }

    /// Drop batches created before `cutoff`; returns how many were removed
    pub async fn remove_created_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut batches = self.batches.write().await;
        let before = batches.len();
        batches.retain(|_, batch| batch.created_at >= cutoff);
        before - batches.len()
    }
}
