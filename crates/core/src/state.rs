//! Observable assistant state.
//!
//! One [`AssistantState`] exists per assistant. The coordinator is its only
//! writer; UI layers read snapshots through a `watch` channel.

use serde::{Deserialize, Serialize};

use crate::message::MessageId;

/// What the assistant is doing right now.
///
/// A single value drives every busy indicator so two of them never compete
/// for the same piece of UI.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "message_id", rename_all = "snake_case")]
pub enum ActivityState {
    #[default]
    Idle,
    Typing,
    /// Streaming into the placeholder message with this id.
    Streaming(MessageId),
    Processing,
}

impl ActivityState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Id of the message being streamed into, if any.
    pub fn streaming_message(&self) -> Option<&MessageId> {
        match self {
            Self::Streaming(id) => Some(id),
            _ => None,
        }
    }
}

/// Per-step initialization flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuntimeReadiness {
    pub hardware_validated: bool,
    pub model_available: bool,
    pub framework_initialized: bool,
    pub privacy_initialized: bool,
    pub inference_engine_initialized: bool,
}

impl RuntimeReadiness {
    /// True only when every step succeeded.
    pub fn is_initialized(&self) -> bool {
        self.hardware_validated
            && self.model_available
            && self.framework_initialized
            && self.privacy_initialized
            && self.inference_engine_initialized
    }
}

/// The text accumulated so far by an in-flight stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingSignal {
    pub message_id: MessageId,
    pub text: String,
}

/// Full observable snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssistantState {
    pub readiness: RuntimeReadiness,
    pub activity: ActivityState,
    pub message_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Latest human-readable status line (initialization progress, resets).
    #[serde(default)]
    pub status_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_progress: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typing: Option<TypingSignal>,
}

impl AssistantState {
    pub fn status(&self) -> AssistantStatus {
        AssistantStatus {
            is_initialized: self.readiness.is_initialized(),
            activity: self.activity.clone(),
            message_count: self.message_count,
            last_error: self.last_error.clone(),
        }
    }
}

/// The narrow status projection returned by `get_status()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantStatus {
    pub is_initialized: bool,
    pub activity: ActivityState,
    pub message_count: usize,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_requires_every_flag() {
        let mut readiness = RuntimeReadiness {
            hardware_validated: true,
            model_available: true,
            framework_initialized: true,
            privacy_initialized: true,
            inference_engine_initialized: false,
        };
        assert!(!readiness.is_initialized());
        readiness.inference_engine_initialized = true;
        assert!(readiness.is_initialized());
    }

    #[test]
    fn activity_defaults_to_idle() {
        let state = AssistantState::default();
        assert!(state.activity.is_idle());
        assert!(!state.status().is_initialized);
    }

    #[test]
    fn streaming_activity_exposes_message_id() {
        let id = MessageId::new();
        let activity = ActivityState::Streaming(id.clone());
        assert_eq!(activity.streaming_message(), Some(&id));
        assert!(ActivityState::Processing.streaming_message().is_none());
    }

    #[test]
    fn activity_serialization() {
        let json = serde_json::to_string(&ActivityState::Processing).unwrap();
        assert_eq!(json, r#"{"state":"processing"}"#);
        let json = serde_json::to_string(&ActivityState::Streaming(MessageId("m1".into()))).unwrap();
        assert!(json.contains(r#""message_id":"m1""#));
    }
}
