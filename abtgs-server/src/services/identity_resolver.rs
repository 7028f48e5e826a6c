//! Speaker Identity Resolver
//!
//! Reconciles opaque diarization tags with human identities. Holds one binding
//! per tag plus duration statistics, and supports swap, custom override and
//! candidate selection. Segments and statistics are never modified by these
//! operations; only the binding table changes.
//!
//! All resolver state is advisory review state. Export accepts a final
//! [`SpeakerMapping`] from the client and does not consult the resolver.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

use crate::models::{
    default_speaker_name, derive_abbreviation, BindingField, Candidate, CandidateSelection,
    DiarizedSegment, ResolvedIdentity, SpeakerBinding, SpeakerMapping, TagStats,
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolverError {
    #[error("Unknown speaker tag: {0}")]
    UnknownTag(String),

    #[error("Unknown candidate: {0}")]
    UnknownCandidate(String),
}

/// Tag → binding table with per-tag statistics
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakerIdentityResolver {
    candidates: Vec<Candidate>,
    /// Longest speaker first
    stats: Vec<TagStats>,
    bindings: BTreeMap<String, SpeakerBinding>,
}

/// Serializable view of one tag for review clients
#[derive(Debug, Clone, Serialize)]
pub struct SpeakerView {
    #[serde(flatten)]
    pub stats: TagStats,
    pub binding: SpeakerBinding,
    pub resolved: ResolvedIdentity,
}

impl SpeakerIdentityResolver {
    /// Build default bindings from recognizer output
    ///
    /// `percentage = round(duration_tag / duration_all * 100)`, or 0 for every
    /// tag when nothing was recognized. A tag is flagged technical only when its
    /// suggested name equals a marker exactly. The initial binding points at a
    /// candidate whose name equals the suggestion, otherwise a custom binding
    /// with a derived abbreviation.
    pub fn compute_initial_bindings(
        segments: &[DiarizedSegment],
        suggested_names: &HashMap<String, String>,
        candidates: Vec<Candidate>,
        technical_markers: &[String],
    ) -> Self {
        let durations = aggregate_durations(segments);
        let total_ms: u64 = durations.iter().map(|(_, d)| d).sum();

        let mut stats = Vec::with_capacity(durations.len());
        let mut bindings = BTreeMap::new();

        for (tag, duration_ms) in durations {
            let suggested_name = suggested_names
                .get(&tag)
                .cloned()
                .unwrap_or_else(|| default_speaker_name(&tag));

            let percentage = if total_ms == 0 {
                0
            } else {
                (duration_ms as f64 / total_ms as f64 * 100.0).round() as u32
            };

            let technical = technical_markers.iter().any(|m| *m == suggested_name);

            let binding = match candidates.iter().find(|c| c.name == suggested_name) {
                Some(candidate) => SpeakerBinding::CandidateBound {
                    candidate_id: candidate.id.clone(),
                },
                None => SpeakerBinding::CustomBound {
                    abbreviation: derive_abbreviation(&suggested_name),
                    name: suggested_name.clone(),
                },
            };

            bindings.insert(tag.clone(), binding);
            stats.push(TagStats {
                tag,
                duration_ms,
                percentage,
                suggested_name,
                technical,
            });
        }

        Self {
            candidates,
            stats,
            bindings,
        }
    }

    /// Exchange the complete bindings of two tags
    ///
    /// Involutive: applying the same swap twice restores the original table.
    /// Swapping a tag with itself is a no-op.
    pub fn swap(&mut self, tag_a: &str, tag_b: &str) -> Result<(), ResolverError> {
        let binding_a = self.binding(tag_a)?.clone();
        let binding_b = self.binding(tag_b)?.clone();
        if tag_a == tag_b {
            return Ok(());
        }
        self.bindings.insert(tag_a.to_string(), binding_b);
        self.bindings.insert(tag_b.to_string(), binding_a);
        Ok(())
    }

    /// Detach a tag from any candidate and set one field of its custom identity
    ///
    /// The other field keeps its currently resolved value.
    pub fn set_custom_override(
        &mut self,
        tag: &str,
        field: BindingField,
        value: impl Into<String>,
    ) -> Result<(), ResolverError> {
        let current = self.resolve(tag)?;
        let value = value.into();
        let binding = match field {
            BindingField::Name => SpeakerBinding::CustomBound {
                name: value,
                abbreviation: current.abbreviation,
            },
            BindingField::Abbreviation => SpeakerBinding::CustomBound {
                name: current.name,
                abbreviation: value,
            },
        };
        self.bindings.insert(tag.to_string(), binding);
        Ok(())
    }

    /// Rebind a tag to a known candidate or to an empty custom placeholder
    pub fn select_candidate(
        &mut self,
        tag: &str,
        selection: CandidateSelection,
    ) -> Result<(), ResolverError> {
        self.binding(tag)?;
        let binding = match selection {
            CandidateSelection::Candidate(id) => {
                if !self.candidates.iter().any(|c| c.id == id) {
                    return Err(ResolverError::UnknownCandidate(id));
                }
                SpeakerBinding::CandidateBound { candidate_id: id }
            }
            CandidateSelection::Custom => SpeakerBinding::CustomBound {
                name: String::new(),
                abbreviation: String::new(),
            },
        };
        self.bindings.insert(tag.to_string(), binding);
        Ok(())
    }

    pub fn binding(&self, tag: &str) -> Result<&SpeakerBinding, ResolverError> {
        self.bindings
            .get(tag)
            .ok_or_else(|| ResolverError::UnknownTag(tag.to_string()))
    }

    /// Current name and abbreviation of a tag
    pub fn resolve(&self, tag: &str) -> Result<ResolvedIdentity, ResolverError> {
        Ok(self.resolve_binding(tag, self.binding(tag)?))
    }

    /// Current `{tag → identity}` mapping, suitable as an export default
    pub fn resolved_mapping(&self) -> SpeakerMapping {
        let mut mapping = SpeakerMapping::default();
        for (tag, binding) in &self.bindings {
            mapping.insert(tag.clone(), self.resolve_binding(tag, binding));
        }
        mapping
    }

    pub fn stats(&self) -> &[TagStats] {
        &self.stats
    }

    pub fn bindings(&self) -> &BTreeMap<String, SpeakerBinding> {
        &self.bindings
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn total_duration_ms(&self) -> u64 {
        self.stats.iter().map(|s| s.duration_ms).sum()
    }

    /// Per-tag view for review clients, longest speaker first
    pub fn speaker_views(&self) -> Vec<SpeakerView> {
        self.stats
            .iter()
            .filter_map(|stats| {
                let binding = self.bindings.get(&stats.tag)?;
                Some(SpeakerView {
                    stats: stats.clone(),
                    binding: binding.clone(),
                    resolved: self.resolve_binding(&stats.tag, binding),
                })
            })
            .collect()
    }

    fn resolve_binding(&self, tag: &str, binding: &SpeakerBinding) -> ResolvedIdentity {
        match binding {
            SpeakerBinding::CandidateBound { candidate_id } => self
                .candidates
                .iter()
                .find(|c| &c.id == candidate_id)
                .map(|c| ResolvedIdentity {
                    name: c.name.clone(),
                    abbreviation: c.abbreviation.clone(),
                })
                .unwrap_or_else(|| {
                    let name = default_speaker_name(tag);
                    ResolvedIdentity {
                        abbreviation: derive_abbreviation(&name),
                        name,
                    }
                }),
            SpeakerBinding::CustomBound { name, abbreviation } => ResolvedIdentity {
                name: name.clone(),
                abbreviation: abbreviation.clone(),
            },
        }
    }
}

/// Sum segment durations per tag, longest first (ties by tag)
pub fn aggregate_durations(segments: &[DiarizedSegment]) -> Vec<(String, u64)> {
    let mut totals: BTreeMap<&str, u64> = BTreeMap::new();
    for segment in segments {
        *totals.entry(segment.tag.as_str()).or_default() += segment.duration_ms();
    }
    let mut durations: Vec<(String, u64)> = totals
        .into_iter()
        .map(|(tag, duration)| (tag.to_string(), duration))
        .collect();
    durations.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    durations
}
