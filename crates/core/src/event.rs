//! Assistant event system: discrete notifications for UI layers.
//!
//! State snapshots travel over a `watch` channel; this bus carries the
//! individual transitions (status lines, activity changes, typing updates)
//! for consumers that want a log rather than the latest value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::message::{ConversationId, MessageId};
use crate::state::{ActivityState, RuntimeReadiness};

/// All assistant events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantEvent {
    /// Human-readable progress line (initialization, downloads, resets)
    StatusUpdate {
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// The activity state machine moved
    ActivityChanged {
        activity: ActivityState,
        timestamp: DateTime<Utc>,
    },

    /// Accumulated text of an in-flight stream
    Typing { message_id: MessageId, text: String },

    /// An error was recorded as the last error
    ErrorRecorded {
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// The conversation was cleared and a new session started
    ConversationReset {
        session_id: ConversationId,
        timestamp: DateTime<Utc>,
    },

    /// Initialization flags changed
    ReadinessChanged { readiness: RuntimeReadiness },
}

/// A broadcast-based event bus for assistant events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<AssistantEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: AssistantEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<AssistantEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(AssistantEvent::ActivityChanged {
            activity: ActivityState::Processing,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            AssistantEvent::ActivityChanged { activity, .. } => {
                assert_eq!(*activity, ActivityState::Processing);
            }
            _ => panic!("Expected ActivityChanged event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(AssistantEvent::ErrorRecorded {
            message: "no subscribers".into(),
            timestamp: Utc::now(),
        });
    }

    #[test]
    fn event_serialization_tag() {
        let event = AssistantEvent::Typing {
            message_id: MessageId("m1".into()),
            text: "Hel".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"typing""#));
        assert!(json.contains(r#""text":"Hel""#));
    }
}
