//! The assistant orchestration core for Tabwise.
//!
//! [`Assistant`] brings a local inference runtime online and serves queries
//! against it:
//!
//! 1. **Initialize**: hardware and memory checks, model download, then the
//!    framework runtime and privacy subsystem in parallel, then the engine
//! 2. **Gate** every call on live memory pressure
//! 3. **Answer** complete or streamed queries, recording the exchange in a
//!    bounded conversation
//! 4. **Recover** from decoder corruption by resetting the conversation and
//!    reloading the engine
//! 5. **Summarize** pages with validated, retried, and salvaged output
//!
//! All observable state flows through one [`StatePublisher`].

pub mod assistant;
pub mod context;
pub mod gate;
pub mod init;
pub mod recovery;
pub mod state;
pub mod streaming;
pub mod summarize;

pub use assistant::{Assistant, Collaborators};
pub use context::ContextBuilder;
pub use gate::ResourceGate;
pub use init::InitializationSequencer;
pub use recovery::{ErrorRecovery, RecoveryAction, is_decoder_corruption};
pub use state::{ActivityGuard, StatePublisher};
pub use streaming::{ResponseStream, apology};
pub use summarize::{Summarizer, UNABLE_TO_SUMMARIZE};

#[cfg(test)]
pub(crate) mod test_helpers;
