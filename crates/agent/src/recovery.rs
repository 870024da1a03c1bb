//! Error recovery.
//!
//! Every pipeline failure passes through [`ErrorRecovery::on_error`]: it is
//! recorded as the last error and the busy state is cleared. Failures that
//! indicate a corrupted decoder (KV cache out of step with the sequence
//! position) additionally reset the conversation and reload the engine.

use std::sync::Arc;

use tabwise_core::engine::InferenceEngine;
use tabwise_core::error::{Error, InferenceErrorKind};
use tabwise_core::state::ActivityState;
use tabwise_memory::ConversationStore;
use tracing::{error, info, warn};

use crate::state::StatePublisher;

/// Substrings that identify decoder corruption in untyped error text.
const CORRUPTION_SIGNATURES: &[&str] = &[
    "kv cache",
    "kv-cache",
    "decoder state",
    "sequence position",
    "position mismatch",
    "inconsistent sequence",
    "cache mismatch",
];

/// What [`ErrorRecovery::on_error`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// The error was recorded; nothing else changed.
    Recorded,
    /// The conversation and runtime state were reset.
    Reset,
}

/// Is this error the decoder-corruption signature?
pub fn is_decoder_corruption(error: &Error) -> bool {
    if let Error::Inference(e) = error
        && e.kind == InferenceErrorKind::DecoderStateCorrupted
    {
        return true;
    }
    let text = error.to_string().to_lowercase();
    CORRUPTION_SIGNATURES.iter().any(|sig| text.contains(sig))
}

#[derive(Clone)]
pub struct ErrorRecovery {
    engine: Arc<dyn InferenceEngine>,
    state: Arc<StatePublisher>,
}

impl ErrorRecovery {
    pub fn new(engine: Arc<dyn InferenceEngine>, state: Arc<StatePublisher>) -> Self {
        Self { engine, state }
    }

    /// Handle a pipeline failure. Never fails itself.
    ///
    /// The caller passes the store it already holds locked.
    pub async fn on_error(&self, error: &Error, store: &mut ConversationStore) -> RecoveryAction {
        self.state.record_error(error.to_string());
        self.state.set_activity(ActivityState::Idle);

        if !is_decoder_corruption(error) {
            return RecoveryAction::Recorded;
        }

        warn!(error = %error, "Decoder state corrupted; resetting conversation");
        if self.reset(store).await {
            self.state.clear_error();
            self.state
                .set_status("Recovered from a model error. The conversation was reset.");
        }
        RecoveryAction::Reset
    }

    /// Clear the conversation, drop decode state, and reload the engine.
    ///
    /// Returns whether the engine came back.
    pub async fn reset(&self, store: &mut ConversationStore) -> bool {
        let session_id = store.clear();
        self.state.conversation_reset(session_id.clone());

        self.engine.reset_conversation_state().await;
        self.state
            .update_readiness(|r| r.inference_engine_initialized = false);

        match self.engine.initialize().await {
            Ok(()) => {
                self.state
                    .update_readiness(|r| r.inference_engine_initialized = true);
                info!(session_id = %session_id, "Conversation state reset");
                true
            }
            Err(e) => {
                error!(error = %e, "Engine failed to reload after reset");
                self.state.record_error(Error::from(e).to_string());
                false
            }
        }
    }
}
