//! Batch context: a set of jobs submitted and tracked together

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: Uuid,
    /// Member jobs in submission order
    pub job_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Batch {
    pub fn new(job_ids: Vec<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_ids,
            created_at: Utc::now(),
        }
    }
}
