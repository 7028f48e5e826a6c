//! Event types for the ABTGS event system
//!
//! Provides job lifecycle event definitions and the EventBus used to fan them
//! out to SSE clients and tests.

mod job_types;

pub use job_types::JobState;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// ABTGS event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AbtgsEvent {
    /// Job accepted and waiting for a scheduler slot
    JobQueued {
        job_id: Uuid,
        /// Link or uploaded filename, for display
        source: String,
        timestamp: DateTime<Utc>,
    },

    /// Job moved along its state graph
    JobStateChanged {
        job_id: Uuid,
        old_state: JobState,
        new_state: JobState,
        timestamp: DateTime<Utc>,
    },

    /// Download progress inside the Acquire stage
    ///
    /// Emitted only when the integer percentage changes.
    JobProgress {
        job_id: Uuid,
        state: JobState,
        progress_percent: u8,
        timestamp: DateTime<Utc>,
    },

    /// Transcript available
    JobCompleted {
        job_id: Uuid,
        segment_count: usize,
        speaker_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Job stopped in Error
    JobFailed {
        job_id: Uuid,
        /// Human-readable message, surfaced verbatim to clients
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Job stopped in Cancelled
    JobCancelled {
        job_id: Uuid,
        timestamp: DateTime<Utc>,
    },
}

impl AbtgsEvent {
    /// SSE event name
    pub fn event_type(&self) -> &'static str {
        match self {
            AbtgsEvent::JobQueued { .. } => "JobQueued",
            AbtgsEvent::JobStateChanged { .. } => "JobStateChanged",
            AbtgsEvent::JobProgress { .. } => "JobProgress",
            AbtgsEvent::JobCompleted { .. } => "JobCompleted",
            AbtgsEvent::JobFailed { .. } => "JobFailed",
            AbtgsEvent::JobCancelled { .. } => "JobCancelled",
        }
    }

    /// Job the event refers to
    pub fn job_id(&self) -> Uuid {
        match self {
            AbtgsEvent::JobQueued { job_id, .. }
            | AbtgsEvent::JobStateChanged { job_id, .. }
            | AbtgsEvent::JobProgress { job_id, .. }
            | AbtgsEvent::JobCompleted { job_id, .. }
            | AbtgsEvent::JobFailed { job_id, .. }
            | AbtgsEvent::JobCancelled { job_id, .. } => *job_id,
        }
    }
}

/// Broadcast bus for [`AbtgsEvent`]s
///
/// Cloning shares the underlying channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AbtgsEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before slow receivers lag
    ///
    /// # Examples
    ///
    /// ```
    /// use abtgs_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(256);
    /// assert_eq!(event_bus.capacity(), 256);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<AbtgsEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: AbtgsEvent,
    ) -> Result<usize, broadcast::error::SendError<AbtgsEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: AbtgsEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let job_id = Uuid::new_v4();
        let event = AbtgsEvent::JobStateChanged {
            job_id,
            old_state: JobState::Queued,
            new_state: JobState::Downloading,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "JobStateChanged");
        assert_eq!(json["old_state"], "queued");
        assert_eq!(json["new_state"], "downloading");
        assert_eq!(event.job_id(), job_id);
        assert_eq!(event.event_type(), "JobStateChanged");
    }

    #[test]
    fn test_emit_without_subscribers_is_err() {
        let bus = EventBus::new(8);
        let result = bus.emit(AbtgsEvent::JobCancelled {
            job_id: Uuid::new_v4(),
            timestamp: Utc::now(),
        });
        assert!(result.is_err());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_events_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let job_id = Uuid::new_v4();

        bus.emit_lossy(AbtgsEvent::JobQueued {
            job_id,
            source: "https://yadi.sk/d/abc".to_string(),
            timestamp: Utc::now(),
        });
        bus.emit_lossy(AbtgsEvent::JobFailed {
            job_id,
            error: "boom".to_string(),
            timestamp: Utc::now(),
        });

        assert_eq!(rx.recv().await.unwrap().event_type(), "JobQueued");
        match rx.recv().await.unwrap() {
            AbtgsEvent::JobFailed { error, .. } => assert_eq!(error, "boom"),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
