//! Data models for abtgs-server
//!
//! - Job record and state machine
//! - Diarized transcript (immutable recognizer output)
//! - Speaker identities, bindings and mappings
//! - Batch context

pub mod batch;
pub mod job;
pub mod speaker;
pub mod transcript;

pub use abtgs_common::events::JobState;
pub use batch::Batch;
pub use job::{EngineOptions, Job, JobSource, ReviewState, StateTransition, TransitionError};
pub use speaker::{
    default_speaker_name, derive_abbreviation, BindingField, Candidate, CandidateSelection, MappingEntry,
    ResolvedIdentity, SpeakerBinding, SpeakerMapping, TagStats,
};
pub use transcript::{DiarizedSegment, DiarizedTranscript, TranscriptMeta, TranscriptResult};
