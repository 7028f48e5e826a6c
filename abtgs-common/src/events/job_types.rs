//! Job lifecycle types shared across the event boundary

use serde::{Deserialize, Serialize};
use std::fmt;

/// Processing state of a transcription job
///
/// Wire names are part of the public status vocabulary and must not change.
///
/// ```text
/// Queued → Downloading → Converting → Uploading → Transcribing → Completed
///    └──────────┴────────────┴────────────┴────────────┴──→ Error | Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting for a scheduler slot
    Queued,
    /// Acquire stage: fetching the source media
    Downloading,
    /// Transcode stage: extracting mono audio
    Converting,
    /// Upload stage: placing audio in the object store
    Uploading,
    /// Recognize stage: provider diarization and recognition
    Transcribing,
    /// Transcript ready
    Completed,
    /// Stopped by a stage failure
    Error,
    /// Stopped by a cancel request
    Cancelled,
}

impl JobState {
    /// All states in happy-path order followed by the terminal failures
    pub const ALL: [JobState; 8] = [
        JobState::Queued,
        JobState::Downloading,
        JobState::Converting,
        JobState::Uploading,
        JobState::Transcribing,
        JobState::Completed,
        JobState::Error,
        JobState::Cancelled,
    ];

    /// Stable wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Downloading => "downloading",
            JobState::Converting => "converting",
            JobState::Uploading => "uploading",
            JobState::Transcribing => "transcribing",
            JobState::Completed => "completed",
            JobState::Error => "error",
            JobState::Cancelled => "cancelled",
        }
    }

    /// Operator-facing label
    pub fn label(&self) -> &'static str {
        match self {
            JobState::Queued => "В очереди",
            JobState::Downloading => "Скачивание",
            JobState::Converting => "Конвертация",
            JobState::Uploading => "Загрузка в облако",
            JobState::Transcribing => "Распознавание",
            JobState::Completed => "Готово",
            JobState::Error => "Ошибка",
            JobState::Cancelled => "Отменено",
        }
    }

    /// Completed, Error and Cancelled are absorbing
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Error | JobState::Cancelled)
    }

    /// Holding a worker slot: past Queued, not yet terminal
    pub fn is_running(&self) -> bool {
        !self.is_terminal() && *self != JobState::Queued
    }

    /// Next state on the happy path, if any
    pub fn successor(&self) -> Option<JobState> {
        match self {
            JobState::Queued => Some(JobState::Downloading),
            JobState::Downloading => Some(JobState::Converting),
            JobState::Converting => Some(JobState::Uploading),
            JobState::Uploading => Some(JobState::Transcribing),
            JobState::Transcribing => Some(JobState::Completed),
            _ => None,
        }
    }

    /// Transition graph: one step forward, or into Error/Cancelled from any non-terminal state
    pub fn can_transition_to(&self, next: JobState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            JobState::Error | JobState::Cancelled => true,
            _ => self.successor() == Some(next),
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_is_linear() {
        let mut state = JobState::Queued;
        let mut visited = vec![state];
        while let Some(next) = state.successor() {
            assert!(state.can_transition_to(next));
            state = next;
            visited.push(state);
        }
        assert_eq!(
            visited,
            vec![
                JobState::Queued,
                JobState::Downloading,
                JobState::Converting,
                JobState::Uploading,
                JobState::Transcribing,
                JobState::Completed,
            ]
        );
    }

    #[test]
    fn test_no_skipping_or_rewinding() {
        assert!(!JobState::Queued.can_transition_to(JobState::Transcribing));
        assert!(!JobState::Converting.can_transition_to(JobState::Downloading));
        assert!(!JobState::Downloading.can_transition_to(JobState::Downloading));
    }

    #[test]
    fn test_terminal_states_absorb() {
        for terminal in [JobState::Completed, JobState::Error, JobState::Cancelled] {
            for next in JobState::ALL {
                assert!(!terminal.can_transition_to(next), "{} -> {}", terminal, next);
            }
        }
    }

    #[test]
    fn test_error_reachable_from_every_non_terminal_state() {
        for state in JobState::ALL.iter().filter(|s| !s.is_terminal()) {
            assert!(state.can_transition_to(JobState::Error));
            assert!(state.can_transition_to(JobState::Cancelled));
        }
    }

    #[test]
    fn test_wire_names_are_stable() {
        let names: Vec<String> = JobState::ALL
            .iter()
            .map(|s| serde_json::to_value(s).unwrap().as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "queued",
                "downloading",
                "converting",
                "uploading",
                "transcribing",
                "completed",
                "error",
                "cancelled"
            ]
        );
        for state in JobState::ALL {
            assert_eq!(serde_json::to_value(state).unwrap(), state.as_str());
        }
    }

    #[test]
    fn test_running_excludes_queued_and_terminal() {
        assert!(!JobState::Queued.is_running());
        assert!(JobState::Downloading.is_running());
        assert!(JobState::Transcribing.is_running());
        assert!(!JobState::Completed.is_running());
        assert!(!JobState::Error.is_running());
    }
}
