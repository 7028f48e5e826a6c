//! Diarized transcript produced by the Recognize stage
//!
//! Segments are created once and never change. Reviewer text edits live in
//! [`super::ReviewState`] as overrides.

use abtgs_common::Timecode;
use serde::{Deserialize, Serialize};

use super::TagStats;

/// One recognized utterance attributed to an opaque speaker tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiarizedSegment {
    pub start_offset_ms: u64,
    pub end_offset_ms: u64,
    pub tag: String,
    pub text: String,
}

impl DiarizedSegment {
    /// Segment length; inverted bounds count as zero
    pub fn duration_ms(&self) -> u64 {
        self.end_offset_ms.saturating_sub(self.start_offset_ms)
    }
}

/// Immutable, start-ordered segment sequence
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiarizedTranscript {
    segments: Vec<DiarizedSegment>,
}

impl DiarizedTranscript {
    /// Order segments by start offset (stable for equal starts)
    pub fn new(mut segments: Vec<DiarizedSegment>) -> Self {
        segments.sort_by_key(|s| s.start_offset_ms);
        Self { segments }
    }

    pub fn segments(&self) -> &[DiarizedSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Sum of all segment durations
    pub fn total_duration_ms(&self) -> u64 {
        self.segments.iter().map(DiarizedSegment::duration_ms).sum()
    }

    /// Distinct tags in order of first appearance
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = Vec::new();
        for segment in &self.segments {
            if !tags.contains(&segment.tag) {
                tags.push(segment.tag.clone());
            }
        }
        tags
    }
}

/// Metadata derived from the source media
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptMeta {
    /// Filename reported by the source
    pub original_filename: String,
    /// Speaker names parsed from the filename, in order
    pub speakers: Vec<String>,
    /// Start timecode parsed from the filename (default 00:00:00:00)
    pub start_tc: Timecode,
}

/// Completed recognition result stored on the job
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptResult {
    pub transcript: DiarizedTranscript,
    /// Per-tag statistics, longest speaker first
    pub stats: Vec<TagStats>,
    pub meta: TranscriptMeta,
}
