//! Timecode Assembler
//!
//! Turns diarized segments plus a final speaker mapping into the ordered line
//! sequence used for both preview and export. Pure and synchronous: nothing
//! here suspends or touches shared state.

use abtgs_common::Timecode;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::models::{default_speaker_name, DiarizedSegment, SpeakerMapping};

/// One printable transcript line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranscriptLine {
    /// Attributed speech: `<timecode> <ABBR>: <text>`
    Speech {
        index: usize,
        timecode: Timecode,
        tag: String,
        speaker: String,
        text: String,
    },
    /// Technical remark (text opening with `(`), rendered in italics with no speaker
    Remark { index: usize, text: String },
}

impl TranscriptLine {
    /// Position of the source segment
    pub fn index(&self) -> usize {
        match self {
            TranscriptLine::Speech { index, .. } | TranscriptLine::Remark { index, .. } => *index,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            TranscriptLine::Speech { text, .. } | TranscriptLine::Remark { text, .. } => text,
        }
    }

    pub fn is_remark(&self) -> bool {
        matches!(self, TranscriptLine::Remark { .. })
    }
}

impl fmt::Display for TranscriptLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptLine::Speech {
                timecode,
                speaker,
                text,
                ..
            } => write!(f, "{} {}: {}", timecode, speaker, text),
            TranscriptLine::Remark { text, .. } => f.write_str(text),
        }
    }
}

/// Assembles lines at 25 fps relative to a start timecode
#[derive(Debug, Clone, Copy, Default)]
pub struct TimecodeAssembler {
    start: Timecode,
}

impl TimecodeAssembler {
    pub fn new(start: Timecode) -> Self {
        Self { start }
    }

    pub fn start(&self) -> Timecode {
        self.start
    }

    /// Timecode printed for a segment starting at `offset_ms`
    pub fn timecode_for(&self, offset_ms: u64) -> Timecode {
        Timecode::from_offset_ms(offset_ms).offset_by(self.start)
    }

    /// Build the canonical line sequence
    ///
    /// `segments` are expected in start order. Text overrides are keyed by
    /// segment index and replace the text in the output only.
    pub fn assemble(
        &self,
        segments: &[DiarizedSegment],
        mapping: &SpeakerMapping,
        text_overrides: &BTreeMap<usize, String>,
    ) -> Vec<TranscriptLine> {
        segments
            .iter()
            .enumerate()
            .map(|(index, segment)| {
                let text = text_overrides
                    .get(&index)
                    .cloned()
                    .unwrap_or_else(|| segment.text.clone());

                if text.trim_start().starts_with('(') {
                    TranscriptLine::Remark { index, text }
                } else {
                    TranscriptLine::Speech {
                        index,
                        timecode: self.timecode_for(segment.start_offset_ms),
                        tag: segment.tag.clone(),
                        speaker: speaker_label(mapping, &segment.tag),
                        text,
                    }
                }
            })
            .collect()
    }
}

/// Abbreviation, else mapped name, else the tag placeholder
pub fn speaker_label(mapping: &SpeakerMapping, tag: &str) -> String {
    mapping
        .get(tag)
        .and_then(|identity| {
            [&identity.abbreviation, &identity.name]
                .into_iter()
                .find(|s| !s.trim().is_empty())
                .cloned()
        })
        .unwrap_or_else(|| default_speaker_name(tag))
}

/// Render lines as plain text, one per line
pub fn render_plain(lines: &[TranscriptLine]) -> String {
    lines
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResolvedIdentity;

    fn seg(start: u64, tag: &str, text: &str) -> DiarizedSegment {
        DiarizedSegment {
            start_offset_ms: start,
            end_offset_ms: start + 500,
            tag: tag.to_string(),
            text: text.to_string(),
        }
    }

    fn mapping() -> SpeakerMapping {
        let mut mapping = SpeakerMapping::default();
        mapping.insert(
            "1",
            ResolvedIdentity {
                name: "Иванов".to_string(),
                abbreviation: "ИВА".to_string(),
            },
        );
        mapping.insert(
            "2",
            ResolvedIdentity {
                name: "Корреспондент".to_string(),
                abbreviation: String::new(),
            },
        );
        mapping
    }

    #[test]
    fn test_renders_timecode_and_abbreviation() {
        let lines = TimecodeAssembler::default().assemble(
            &[seg(1040, "1", "Добрый вечер.")],
            &mapping(),
            &BTreeMap::new(),
        );
        assert_eq!(lines[0].to_string(), "00:00:01:01 ИВА: Добрый вечер.");
    }

    #[test]
    fn test_speaker_fallback_chain() {
        let lines = TimecodeAssembler::default().assemble(
            &[seg(0, "2", "Вопрос."), seg(1000, "3", "Ответ.")],
            &mapping(),
            &BTreeMap::new(),
        );
        assert_eq!(lines[0].to_string(), "00:00:00:00 Корреспондент: Вопрос.");
        assert_eq!(lines[1].to_string(), "00:00:01:00 Спикер 3: Ответ.");
    }

    #[test]
    fn test_remark_has_no_speaker_prefix() {
        let lines = TimecodeAssembler::default().assemble(
            &[seg(0, "1", "(шум в студии)")],
            &mapping(),
            &BTreeMap::new(),
        );
        assert!(lines[0].is_remark());
        assert_eq!(lines[0].to_string(), "(шум в студии)");
    }

    #[test]
    fn test_start_timecode_is_added() {
        let start: Timecode = "10:00:00:00".parse().unwrap();
        let lines = TimecodeAssembler::new(start).assemble(
            &[seg(61_039, "1", "Текст")],
            &mapping(),
            &BTreeMap::new(),
        );
        assert_eq!(lines[0].to_string(), "10:01:01:00 ИВА: Текст");
    }

    #[test]
    fn test_text_override_leaves_segment_untouched() {
        let segments = vec![seg(0, "1", "оригинал"), seg(2000, "1", "второй")];
        let overrides = BTreeMap::from([(1, "исправлено".to_string())]);
        let lines = TimecodeAssembler::default().assemble(&segments, &mapping(), &overrides);
        assert_eq!(lines[0].text(), "оригинал");
        assert_eq!(lines[1].text(), "исправлено");
        assert_eq!(segments[1].text, "второй");
    }

    #[test]
    fn test_override_can_turn_line_into_remark() {
        let overrides = BTreeMap::from([(0, "(смех)".to_string())]);
        let lines =
            TimecodeAssembler::default().assemble(&[seg(0, "1", "ха")], &mapping(), &overrides);
        assert!(lines[0].is_remark());
    }

    #[test]
    fn test_render_plain_joins_lines() {
        let lines = TimecodeAssembler::default().assemble(
            &[seg(0, "1", "А"), seg(40, "2", "Б")],
            &mapping(),
            &BTreeMap::new(),
        );
        assert_eq!(
            render_plain(&lines),
            "00:00:00:00 ИВА: А\n00:00:00:01 Корреспондент: Б"
        );
    }
}
