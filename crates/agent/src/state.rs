//! The single writer of [`AssistantState`].
//!
//! Snapshots go out on a `watch` channel, transitions on the [`EventBus`].
//! Components mutate state only through [`StatePublisher`], so the activity
//! machine and the readiness flags each have exactly one owner.

use std::sync::Arc;

use chrono::Utc;
use tabwise_core::event::{AssistantEvent, EventBus};
use tabwise_core::message::{ConversationId, MessageId};
use tabwise_core::state::{ActivityState, AssistantState, RuntimeReadiness, TypingSignal};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

pub struct StatePublisher {
    state: watch::Sender<AssistantState>,
    events: EventBus,
}

impl StatePublisher {
    pub fn new() -> Self {
        let (state, _) = watch::channel(AssistantState::default());
        Self {
            state,
            events: EventBus::default(),
        }
    }

    pub fn snapshot(&self) -> AssistantState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AssistantState> {
        self.state.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<Arc<AssistantEvent>> {
        self.events.subscribe()
    }

    pub fn activity(&self) -> ActivityState {
        self.state.borrow().activity.clone()
    }

    pub fn readiness(&self) -> RuntimeReadiness {
        self.state.borrow().readiness
    }

    /// Move the activity machine. Leaving `Streaming` also drops the typing buffer.
    pub fn set_activity(&self, activity: ActivityState) {
        let changed = self.state.send_if_modified(|state| {
            if state.activity == activity {
                return false;
            }
            if state.activity.streaming_message().is_some() {
                state.typing = None;
            }
            state.activity = activity.clone();
            true
        });

        if changed {
            debug!(activity = ?activity, "Activity changed");
            self.events.publish(AssistantEvent::ActivityChanged {
                activity,
                timestamp: Utc::now(),
            });
        }
    }

    pub fn record_error(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(error = %message, "Recording assistant error");
        self.state.send_modify(|state| state.last_error = Some(message.clone()));
        self.events.publish(AssistantEvent::ErrorRecorded {
            message,
            timestamp: Utc::now(),
        });
    }

    pub fn clear_error(&self) {
        self.state.send_if_modified(|state| state.last_error.take().is_some());
    }

    /// Publish a human-readable progress line.
    pub fn set_status(&self, message: impl Into<String>) {
        let message = message.into();
        info!(status = %message);
        self.state
            .send_modify(|state| state.status_message = message.clone());
        self.events.publish(AssistantEvent::StatusUpdate {
            message,
            timestamp: Utc::now(),
        });
    }

    pub fn update_readiness(&self, update: impl FnOnce(&mut RuntimeReadiness)) {
        let mut readiness = self.readiness();
        update(&mut readiness);
        let changed = self.state.send_if_modified(|state| {
            if state.readiness == readiness {
                return false;
            }
            state.readiness = readiness;
            true
        });
        if changed {
            self.events
                .publish(AssistantEvent::ReadinessChanged { readiness });
        }
    }

    pub fn set_message_count(&self, count: usize) {
        self.state
            .send_if_modified(|state| std::mem::replace(&mut state.message_count, count) != count);
    }

    pub fn set_download_progress(&self, progress: Option<f32>) {
        self.state
            .send_modify(|state| state.download_progress = progress);
    }

    /// Publish the text accumulated so far by a stream.
    pub fn set_typing(&self, message_id: &MessageId, text: &str) {
        self.state.send_modify(|state| {
            state.typing = Some(TypingSignal {
                message_id: message_id.clone(),
                text: text.to_string(),
            })
        });
        self.events.publish(AssistantEvent::Typing {
            message_id: message_id.clone(),
            text: text.to_string(),
        });
    }

    /// A new session started after the store was cleared.
    pub fn conversation_reset(&self, session_id: ConversationId) {
        self.set_message_count(0);
        self.events.publish(AssistantEvent::ConversationReset {
            session_id,
            timestamp: Utc::now(),
        });
    }
}

impl Default for StatePublisher {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds an activity for a scope and returns to `Idle` when dropped.
pub struct ActivityGuard {
    state: Arc<StatePublisher>,
}

impl ActivityGuard {
    pub fn enter(state: Arc<StatePublisher>, activity: ActivityState) -> Self {
        state.set_activity(activity);
        Self { state }
    }
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.state.set_activity(ActivityState::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_returns_to_idle() {
        let state = Arc::new(StatePublisher::new());
        {
            let _guard = ActivityGuard::enter(state.clone(), ActivityState::Processing);
            assert_eq!(state.activity(), ActivityState::Processing);
        }
        assert!(state.activity().is_idle());
    }

    #[test]
    fn leaving_streaming_clears_typing() {
        let state = StatePublisher::new();
        let id = MessageId::new();
        state.set_activity(ActivityState::Streaming(id.clone()));
        state.set_typing(&id, "Hel");
        assert_eq!(state.snapshot().typing.unwrap().text, "Hel");

        state.set_activity(ActivityState::Idle);
        assert!(state.snapshot().typing.is_none());
    }

    #[tokio::test]
    async fn activity_changes_are_published_once() {
        let state = StatePublisher::new();
        let mut events = state.subscribe_events();

        state.set_activity(ActivityState::Processing);
        state.set_activity(ActivityState::Processing);
        state.set_status("done");

        match events.recv().await.unwrap().as_ref() {
            AssistantEvent::ActivityChanged { activity, .. } => {
                assert_eq!(*activity, ActivityState::Processing)
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(
            events.recv().await.unwrap().as_ref(),
            AssistantEvent::StatusUpdate { .. }
        ));
    }

    #[tokio::test]
    async fn watchers_see_errors_and_readiness() {
        let state = StatePublisher::new();
        let mut rx = state.subscribe();

        state.record_error("boom");
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().last_error.as_deref(), Some("boom"));

        state.update_readiness(|r| r.hardware_validated = true);
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().readiness.hardware_validated);

        state.clear_error();
        assert!(state.snapshot().last_error.is_none());
    }
}
