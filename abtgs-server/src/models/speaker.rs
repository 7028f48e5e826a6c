//! Speaker identities, bindings and the final export mapping

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Pre-registered human identity, immutable for the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub name: String,
    pub abbreviation: String,
}

/// Current display identity of a speaker tag
///
/// The two modes are mutually exclusive: a tag is either bound to a candidate
/// or carries its own custom name and abbreviation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SpeakerBinding {
    CandidateBound { candidate_id: String },
    CustomBound { name: String, abbreviation: String },
}

/// Editable field of a custom binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingField {
    Name,
    Abbreviation,
}

/// Target of a select-candidate operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateSelection {
    Candidate(String),
    /// Fresh, empty custom binding
    Custom,
}

impl FromStr for CandidateSelection {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(if s == "custom" {
            CandidateSelection::Custom
        } else {
            CandidateSelection::Candidate(s.to_string())
        })
    }
}

/// Per-tag statistics computed at Recognize completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagStats {
    pub tag: String,
    pub duration_ms: u64,
    /// Rounded share of the total recognized duration
    pub percentage: u32,
    /// Heuristic name suggestion
    pub suggested_name: String,
    /// Suggested name matched a technical marker; advisory only
    pub technical: bool,
}

/// Name and abbreviation a tag resolves to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedIdentity {
    pub name: String,
    pub abbreviation: String,
}

/// One row of a client-submitted mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub speaker_label: String,
    pub mapped_name: String,
    #[serde(default)]
    pub abbreviation: String,
}

/// Final `{tag → {name, abbreviation}}` mapping trusted by export
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpeakerMapping {
    entries: BTreeMap<String, ResolvedIdentity>,
}

impl SpeakerMapping {
    /// Later rows for the same label win
    pub fn from_entries(entries: impl IntoIterator<Item = MappingEntry>) -> Self {
        let mut mapping = Self::default();
        for entry in entries {
            mapping.insert(
                entry.speaker_label,
                ResolvedIdentity {
                    name: entry.mapped_name,
                    abbreviation: entry.abbreviation,
                },
            );
        }
        mapping
    }

    pub fn insert(&mut self, tag: impl Into<String>, identity: ResolvedIdentity) {
        self.entries.insert(tag.into(), identity);
    }

    pub fn get(&self, tag: &str) -> Option<&ResolvedIdentity> {
        self.entries.get(tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ResolvedIdentity)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Default abbreviation for a name: first three characters, upper-cased
pub fn derive_abbreviation(name: &str) -> String {
    name.trim().chars().take(3).collect::<String>().to_uppercase()
}

/// Placeholder name for a tag nobody has named yet
pub fn default_speaker_name(tag: &str) -> String {
    format!("Спикер {}", tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_abbreviation_counts_chars_not_bytes() {
        assert_eq!(derive_abbreviation("Эфендиева"), "ЭФЕ");
        assert_eq!(derive_abbreviation("Li"), "LI");
        assert_eq!(derive_abbreviation(""), "");
    }

    #[test]
    fn test_selection_parses_custom_keyword() {
        assert_eq!("custom".parse::<CandidateSelection>().unwrap(), CandidateSelection::Custom);
        assert_eq!(
            "c-1".parse::<CandidateSelection>().unwrap(),
            CandidateSelection::Candidate("c-1".to_string())
        );
    }

    #[test]
    fn test_mapping_from_entries() {
        let mapping = SpeakerMapping::from_entries(vec![
            MappingEntry {
                speaker_label: "1".to_string(),
                mapped_name: "Носырев".to_string(),
                abbreviation: "НОС".to_string(),
            },
            MappingEntry {
                speaker_label: "2".to_string(),
                mapped_name: "Корр".to_string(),
                abbreviation: String::new(),
            },
        ]);
        assert_eq!(mapping.len(), 2);
        assert_eq!(mapping.get("1").unwrap().abbreviation, "НОС");
        assert_eq!(mapping.get("2").unwrap().name, "Корр");
        assert!(mapping.get("3").is_none());
    }

    #[test]
    fn test_binding_serialization_is_tagged() {
        let binding = SpeakerBinding::CandidateBound {
            candidate_id: "c-1".to_string(),
        };
        let json = serde_json::to_value(&binding).unwrap();
        assert_eq!(json["mode"], "candidate_bound");
        assert_eq!(json["candidate_id"], "c-1");
    }
}
