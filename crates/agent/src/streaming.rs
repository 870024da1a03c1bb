//! The half of the streaming pipeline that runs after the caller has its receiver.
//!
//! The task owns the conversation lock until the stream ends, so the
//! synchronous pipeline cannot interleave with it. The stream ends once the
//! consumer has received every buffered fragment or dropped the receiver.

use std::sync::Arc;

use tabwise_core::engine::FragmentStream;
use tabwise_core::error::{Error, InferenceError, Result};
use tabwise_core::message::MessageId;
use tabwise_core::state::ActivityState;
use tabwise_memory::ConversationStore;
use tokio::sync::{OwnedMutexGuard, mpsc};
use tracing::{debug, info, warn};

use crate::recovery::ErrorRecovery;
use crate::state::StatePublisher;

/// Fragments as seen by the consumer. Dropping it cancels the response.
pub type ResponseStream = mpsc::Receiver<Result<String>>;

pub(crate) const STREAM_BUFFER: usize = 32;

/// Wait until the receiver has emptied the buffer. `false` if it was dropped instead.
async fn drained(tx: &mpsc::Sender<Result<String>>) -> bool {
    tx.reserve_many(tx.max_capacity()).await.is_ok()
}

/// Text stored in place of a response that failed mid-stream.
pub fn apology(error: &Error) -> String {
    format!("Sorry, I couldn't finish that response: {error}")
}

pub(crate) struct StreamTask {
    pub store: OwnedMutexGuard<ConversationStore>,
    pub message_id: MessageId,
    pub state: Arc<StatePublisher>,
    pub recovery: ErrorRecovery,
}

impl StreamTask {
    pub async fn run(mut self, mut fragments: FragmentStream, tx: mpsc::Sender<Result<String>>) {
        let mut buffer = String::new();
        let mut count = 0usize;

        let outcome: Result<()> = loop {
            tokio::select! {
                _ = tx.closed() => break Err(InferenceError::cancelled().into()),
                item = fragments.recv() => match item {
                    Some(Ok(fragment)) => {
                        buffer.push_str(&fragment);
                        count += 1;
                        self.state.set_typing(&self.message_id, &buffer);
                        if tx.send(Ok(fragment)).await.is_err() {
                            break Err(InferenceError::cancelled().into());
                        }
                    }
                    Some(Err(e)) => break Err(e.into()),
                    None => break Ok(()),
                },
            }
        };

        // Stay in Streaming until the consumer has taken every buffered fragment.
        let consumed = drained(&tx).await;
        let outcome = match outcome {
            Ok(()) if !consumed => Err(InferenceError::cancelled().into()),
            other => other,
        };

        match outcome {
            Ok(()) => {
                self.finalize(buffer);
                self.state.set_activity(ActivityState::Idle);
                info!(message_id = %self.message_id, fragments = count, "Streaming response complete");
            }
            Err(error) => {
                self.fail(&error).await;
                // The consumer may already be gone.
                let _ = tx.send(Err(error)).await;
            }
        }
    }

    /// Failure path shared with streams that never started.
    pub async fn fail(&mut self, error: &Error) {
        warn!(message_id = %self.message_id, error = %error, "Streaming response failed");
        self.state.set_activity(ActivityState::Idle);
        self.finalize(apology(error));
        self.recovery.on_error(error, &mut self.store).await;
    }

    fn finalize(&mut self, content: String) {
        if let Err(e) = self.store.rewrite_content(&self.message_id, content) {
            // Evicted while streaming, or already finalized.
            debug!(message_id = %self.message_id, error = %e, "Placeholder not rewritten");
        }
        self.state.set_message_count(self.store.len());
    }
}
