//! Conversation memory for Tabwise.
//!
//! A single bounded session log plus the token estimator it budgets with.

pub mod conversation;
pub mod token;

pub use conversation::{ConversationLimits, ConversationStore, StoreError};
pub use token::{HeuristicEstimator, TokenEstimator, estimate_tokens};
