//! Job record and state machine
//!
//! A job progresses through the states defined by [`JobState`]:
//! QUEUED → DOWNLOADING → CONVERTING → UPLOADING → TRANSCRIBING → COMPLETED,
//! with ERROR and CANCELLED reachable from every non-terminal state.
//! Transitions outside that graph are rejected and leave the record untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

use super::{JobState, TranscriptResult};
use crate::services::identity_resolver::SpeakerIdentityResolver;

/// Where the media for a job comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobSource {
    /// Public cloud-disk link
    Link { url: String },
    /// File uploaded by the client, already stored in the upload area
    Upload { path: PathBuf, filename: String },
}

impl JobSource {
    /// Short human-readable description for logs and batch listings
    pub fn display_name(&self) -> &str {
        match self {
            JobSource::Link { url } => url,
            JobSource::Upload { filename, .. } => filename,
        }
    }
}

/// Recognition engine options supplied at submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// BCP-47 language code
    pub language: String,
    /// Recognition model name
    pub model: String,
    /// Mask profanity in the output
    pub profanity_filter: bool,
    /// Literary normalization (punctuation, numerals)
    pub literature_text: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            language: "ru-RU".to_string(),
            model: "general".to_string(),
            profanity_filter: false,
            literature_text: true,
        }
    }
}

/// State transition record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub job_id: Uuid,
    pub old_state: JobState,
    pub new_state: JobState,
    pub transitioned_at: DateTime<Utc>,
}

/// Rejected transition
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Invalid transition {from} -> {to} for job {job_id}")]
pub struct TransitionError {
    pub job_id: Uuid,
    pub from: JobState,
    pub to: JobState,
}

/// Reviewer edits on a completed job
///
/// The resolver carries bindings; text overrides are keyed by segment index and
/// never touch the underlying diarized segments.
#[derive(Debug, Clone)]
pub struct ReviewState {
    pub resolver: SpeakerIdentityResolver,
    pub text_overrides: BTreeMap<usize, String>,
}

impl ReviewState {
    pub fn new(resolver: SpeakerIdentityResolver) -> Self {
        Self {
            resolver,
            text_overrides: BTreeMap::new(),
        }
    }
}

/// Job record held by the registry
#[derive(Debug, Clone)]
pub struct Job {
    /// Unique job identifier
    pub id: Uuid,

    /// Media source
    pub source: JobSource,

    /// Current state
    pub state: JobState,

    /// Recognition engine options
    pub engine: EngineOptions,

    /// Submission time; FIFO admission tie-break
    pub created_at: DateTime<Utc>,

    /// Last state change
    pub updated_at: DateTime<Utc>,

    /// Set on entering a terminal state
    pub finished_at: Option<DateTime<Utc>>,

    /// Human-readable failure message (Error state only)
    pub error: Option<String>,

    /// Stage progress when measurable (download bytes), 100 when completed
    pub progress_percent: Option<u8>,

    /// Name of the media file as reported by the source
    pub original_filename: Option<String>,

    /// Recognition output (Completed state only)
    pub result: Option<TranscriptResult>,

    /// Reviewer state (Completed state only)
    pub review: Option<ReviewState>,
}

impl Job {
    /// Create new job in Queued state
    pub fn new(source: JobSource, engine: EngineOptions) -> Self {
        let now = Utc::now();
        let original_filename = match &source {
            JobSource::Upload { filename, .. } => Some(filename.clone()),
            JobSource::Link { .. } => None,
        };
        Self {
            id: Uuid::new_v4(),
            source,
            state: JobState::Queued,
            engine,
            created_at: now,
            updated_at: now,
            finished_at: None,
            error: None,
            progress_percent: None,
            original_filename,
            result: None,
            review: None,
        }
    }

    /// Transition to new state
    ///
    /// Progress resets on every stage change: Downloading starts at 0, later
    /// stages have no measurable progress, Completed reports 100.
    pub fn transition_to(&mut self, new_state: JobState) -> Result<StateTransition, TransitionError> {
        if !self.state.can_transition_to(new_state) {
            return Err(TransitionError {
                job_id: self.id,
                from: self.state,
                to: new_state,
            });
        }

        let now = Utc::now();
        let transition = StateTransition {
            job_id: self.id,
            old_state: self.state,
            new_state,
            transitioned_at: now,
        };
        self.state = new_state;
        self.updated_at = now;

        self.progress_percent = match new_state {
            JobState::Downloading => Some(0),
            JobState::Completed => Some(100),
            JobState::Error | JobState::Cancelled => self.progress_percent,
            _ => None,
        };

        if new_state.is_terminal() {
            self.finished_at = Some(now);
        }

        Ok(transition)
    }

    /// Move to Error and record the message
    pub fn fail(&mut self, message: impl Into<String>) -> Result<StateTransition, TransitionError> {
        let transition = self.transition_to(JobState::Error)?;
        self.error = Some(message.into());
        Ok(transition)
    }

    /// Name shown in listings: original filename when known, else the source
    pub fn display_name(&self) -> String {
        self.original_filename
            .clone()
            .unwrap_or_else(|| self.source.display_name().to_string())
    }

    /// Check if job is terminal (finished)
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
