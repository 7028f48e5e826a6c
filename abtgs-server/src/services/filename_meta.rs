//! Filename metadata heuristics
//!
//! Broadcast media files are usually named after the people on screen plus a
//! few production markers, e.g. `Иванов, Петрова_интер_10:00:00:00.mxf`.
//! Speaker names and the start timecode are extracted from that name and used
//! as review defaults only.

use abtgs_common::Timecode;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use crate::models::{default_speaker_name, TranscriptMeta};

static TIMECODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{2}:\d{2}:\d{2}:\d{2})").expect("valid timecode regex"));
static EXTENSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.[^.]+$").expect("valid extension regex"));
static SEPARATOR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[,_]+").expect("valid separator regex"));
static DATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{2}\.\d{2}\.\d{4}").expect("valid date regex"));

/// Production markers that never name a speaker (compared lower-cased)
const STOP_WORDS: &[&str] = &[
    "лайф", "лайфы", "интер", "синхрон", "снх", "бз", "f8", "wav", "mp3", "mp4", "mov", "wmv", "mxf",
];

/// Speakers and start timecode parsed from a media filename
#[derive(Debug, Clone, PartialEq)]
pub struct FilenameMeta {
    pub speakers: Vec<String>,
    pub start_tc: Timecode,
}

impl FilenameMeta {
    pub fn into_transcript_meta(self, original_filename: impl Into<String>) -> TranscriptMeta {
        TranscriptMeta {
            original_filename: original_filename.into(),
            speakers: self.speakers,
            start_tc: self.start_tc,
        }
    }
}

/// Extract speaker names and the start timecode from a filename
///
/// The first `HH:MM:SS:FF` group is taken as the start timecode and removed
/// before name parsing. A group that is not a valid 25 fps timecode leaves the
/// start at `00:00:00:00`.
pub fn parse_filename_metadata(filename: &str) -> FilenameMeta {
    let mut start_tc = Timecode::ZERO;
    let mut remainder = filename.to_string();

    if let Some(found) = TIMECODE_RE.find(filename) {
        match found.as_str().parse::<Timecode>() {
            Ok(tc) => start_tc = tc,
            Err(e) => {
                tracing::debug!(filename, error = %e, "Ignoring malformed timecode in filename");
            }
        }
        remainder = remainder.replace(found.as_str(), "");
    }

    let stem = EXTENSION_RE.replace(&remainder, "");
    let speakers = SEPARATOR_RE
        .split(&stem)
        .map(str::trim)
        .filter(|word| !word.is_empty())
        .filter(|word| !STOP_WORDS.contains(&word.to_lowercase().as_str()))
        .filter(|word| !DATE_RE.is_match(word))
        .map(str::to_string)
        .collect();

    FilenameMeta { speakers, start_tc }
}

/// Filename without its final extension
pub fn strip_extension(filename: &str) -> String {
    EXTENSION_RE.replace(filename, "").into_owned()
}

/// Pair tags, longest speaker first, with names parsed from the filename
///
/// `tags_by_duration` must already be ordered by speaking time descending.
/// Tags left over once the names run out get a placeholder name.
pub fn suggest_speaker_names(
    tags_by_duration: &[String],
    filename_speakers: &[String],
) -> HashMap<String, String> {
    tags_by_duration
        .iter()
        .enumerate()
        .map(|(i, tag)| {
            let name = filename_speakers
                .get(i)
                .cloned()
                .unwrap_or_else(|| default_speaker_name(tag));
            (tag.clone(), name)
        })
        .collect()
}
