//! Bounded conversation store.
//!
//! Holds the messages of the current session under two limits at once: a
//! maximum message count and a token budget. Both are enforced on every
//! mutation, never lazily on read.
//!
//! Eviction order:
//! 1. While over the token budget, drop the oldest message that is not a
//!    `system` message (system prompts survive as long as anything else can go).
//! 2. While over the message count, drop from the front.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tabwise_config::ConversationConfig;
use tabwise_core::message::{ConversationId, Message, MessageId, Role};
use tracing::debug;

use crate::token::{HeuristicEstimator, TokenEstimator};

/// Size limits for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversationLimits {
    pub max_messages: usize,
    pub max_session_tokens: usize,
}

impl Default for ConversationLimits {
    fn default() -> Self {
        Self {
            max_messages: 1000,
            max_session_tokens: 32_000,
        }
    }
}

impl From<&ConversationConfig> for ConversationLimits {
    fn from(config: &ConversationConfig) -> Self {
        Self {
            max_messages: config.max_messages,
            max_session_tokens: config.max_session_tokens,
        }
    }
}

/// Store errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Message not found: {0}")]
    UnknownMessage(MessageId),

    #[error("Message content was already rewritten: {0}")]
    AlreadyRewritten(MessageId),
}

/// The session log.
pub struct ConversationStore {
    session_id: ConversationId,
    created_at: DateTime<Utc>,
    messages: Vec<Message>,
    total_tokens: usize,
    limits: ConversationLimits,
    estimator: Arc<dyn TokenEstimator>,
    rewritten: HashSet<MessageId>,
}

impl ConversationStore {
    /// Create an empty store using the heuristic estimator.
    pub fn new(limits: ConversationLimits) -> Self {
        Self::with_estimator(limits, Arc::new(HeuristicEstimator))
    }

    /// Create an empty store with a custom estimator (e.g. an exact tokenizer).
    pub fn with_estimator(limits: ConversationLimits, estimator: Arc<dyn TokenEstimator>) -> Self {
        Self {
            session_id: ConversationId::new(),
            created_at: Utc::now(),
            messages: Vec::new(),
            total_tokens: 0,
            limits,
            estimator,
            rewritten: HashSet::new(),
        }
    }

    /// Append a message and enforce both limits. Returns the message id.
    pub fn add_message(&mut self, mut message: Message) -> MessageId {
        message.estimated_tokens = self.estimator.estimate(&message.content);
        self.total_tokens += message.estimated_tokens;
        let id = message.id.clone();
        self.messages.push(message);
        self.enforce_limits();
        id
    }

    /// Replace the content of a stored message.
    ///
    /// Allowed once per message; used to finalize streaming placeholders.
    pub fn rewrite_content(
        &mut self,
        id: &MessageId,
        content: impl Into<String>,
    ) -> Result<(), StoreError> {
        if self.rewritten.contains(id) {
            return Err(StoreError::AlreadyRewritten(id.clone()));
        }

        let estimator = self.estimator.clone();
        let message = self
            .messages
            .iter_mut()
            .find(|m| &m.id == id)
            .ok_or_else(|| StoreError::UnknownMessage(id.clone()))?;

        let content = content.into();
        let tokens = estimator.estimate(&content);
        self.total_tokens = self.total_tokens - message.estimated_tokens + tokens;
        message.content = content;
        message.estimated_tokens = tokens;
        self.rewritten.insert(id.clone());

        self.enforce_limits();
        Ok(())
    }

    /// The last `limit` messages, oldest first.
    pub fn get_recent(&self, limit: usize) -> Vec<Message> {
        let start = self.messages.len().saturating_sub(limit);
        self.messages[start..].to_vec()
    }

    /// Look up a message by id.
    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// Drop every message and start a new session. Returns the new session id.
    pub fn clear(&mut self) -> ConversationId {
        self.messages.clear();
        self.rewritten.clear();
        self.total_tokens = 0;
        self.session_id = ConversationId::new();
        self.created_at = Utc::now();
        debug!(session_id = %self.session_id, "Conversation cleared");
        self.session_id.clone()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn total_estimated_tokens(&self) -> usize {
        self.total_tokens
    }

    pub fn session_id(&self) -> &ConversationId {
        &self.session_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn limits(&self) -> ConversationLimits {
        self.limits
    }

    fn enforce_limits(&mut self) {
        let mut evicted = 0;

        while self.total_tokens > self.limits.max_session_tokens {
            let victim = self
                .messages
                .iter()
                .position(|m| m.role != Role::System)
                // Only system messages left: the budget still wins.
                .or(if self.messages.is_empty() { None } else { Some(0) });
            let Some(index) = victim else { break };
            self.evict(index);
            evicted += 1;
        }

        while self.messages.len() > self.limits.max_messages {
            self.evict(0);
            evicted += 1;
        }

        if evicted > 0 {
            debug!(
                session_id = %self.session_id,
                evicted,
                remaining = self.messages.len(),
                total_tokens = self.total_tokens,
                "Evicted messages to stay within limits"
            );
        }
    }

    fn evict(&mut self, index: usize) {
        let removed = self.messages.remove(index);
        self.total_tokens -= removed.estimated_tokens;
        self.rewritten.remove(&removed.id);
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(ConversationLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One token per whitespace-separated word; keeps budgets easy to reason about.
    struct WordCount;

    impl TokenEstimator for WordCount {
        fn estimate(&self, text: &str) -> usize {
            text.split_whitespace().count()
        }
    }

    fn store(max_messages: usize, max_session_tokens: usize) -> ConversationStore {
        ConversationStore::with_estimator(
            ConversationLimits {
                max_messages,
                max_session_tokens,
            },
            Arc::new(WordCount),
        )
    }

    fn words(n: usize) -> String {
        vec!["word"; n].join(" ")
    }

    fn recomputed_total(store: &ConversationStore) -> usize {
        store.messages().iter().map(|m| m.estimated_tokens).sum()
    }

    #[test]
    fn add_message_tracks_tokens() {
        let mut s = store(10, 100);
        s.add_message(Message::user("hello there"));
        s.add_message(Message::assistant("hi"));
        assert_eq!(s.len(), 2);
        assert_eq!(s.total_estimated_tokens(), 3);
        assert_eq!(s.messages()[0].estimated_tokens, 2);
    }

    #[test]
    fn limits_hold_after_every_insert() {
        let mut s = store(20, 100);
        for i in 0..200 {
            let msg = if i % 2 == 0 {
                Message::user(words(i % 17 + 1))
            } else {
                Message::assistant(words(i % 23 + 1))
            };
            s.add_message(msg);
            assert!(s.total_estimated_tokens() <= 100);
            assert!(s.len() <= 20);
            assert_eq!(s.total_estimated_tokens(), recomputed_total(&s));
        }
    }

    #[test]
    fn default_limits_hold_with_heuristic_estimator() {
        let mut s = ConversationStore::default();
        let long = "lorem ipsum dolor sit amet, consectetur adipiscing elit. ".repeat(40);
        for _ in 0..1500 {
            s.add_message(Message::user(long.as_str()));
            assert!(s.total_estimated_tokens() <= 32_000);
            assert!(s.len() <= 1000);
        }
    }

    #[test]
    fn token_eviction_skips_system_message() {
        let mut s = store(100, 20);
        let system_id = s.add_message(Message::system("be brief"));
        let first = s.add_message(Message::user(words(6)));
        let second = s.add_message(Message::assistant(words(6)));
        assert_eq!(s.total_estimated_tokens(), 14);

        // Pushes the total to 22: the oldest non-system message must go.
        s.add_message(Message::user(words(8)));

        assert!(s.get(&system_id).is_some());
        assert!(s.get(&first).is_none());
        assert!(s.get(&second).is_some());
        assert_eq!(s.total_estimated_tokens(), 16);
    }

    #[test]
    fn count_eviction_drops_from_front() {
        let mut s = store(3, 1000);
        let ids: Vec<_> = (0..5).map(|i| s.add_message(Message::user(format!("m{i}")))).collect();
        assert_eq!(s.len(), 3);
        assert!(s.get(&ids[0]).is_none());
        assert!(s.get(&ids[1]).is_none());
        assert!(s.get(&ids[4]).is_some());
    }

    #[test]
    fn oversized_message_is_evicted_itself() {
        let mut s = store(10, 5);
        s.add_message(Message::system("rules"));
        s.add_message(Message::user(words(50)));
        assert!(s.total_estimated_tokens() <= 5);
        assert_eq!(s.len(), 1);
        assert_eq!(s.messages()[0].role, Role::System);
    }

    #[test]
    fn only_system_messages_still_respect_budget() {
        let mut s = store(10, 5);
        s.add_message(Message::system(words(4)));
        s.add_message(Message::system(words(4)));
        assert!(s.total_estimated_tokens() <= 5);
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn get_recent_is_chronological() {
        let mut s = store(10, 100);
        for i in 0..5 {
            s.add_message(Message::user(format!("m{i}")));
        }
        let recent: Vec<_> = s.get_recent(3).into_iter().map(|m| m.content).collect();
        assert_eq!(recent, vec!["m2", "m3", "m4"]);
        assert_eq!(s.get_recent(50).len(), 5);
        assert!(s.get_recent(0).is_empty());
    }

    #[test]
    fn rewrite_allowed_once() {
        let mut s = store(10, 100);
        let id = s.add_message(Message::placeholder());
        assert_eq!(s.total_estimated_tokens(), 0);

        s.rewrite_content(&id, "final streamed answer").unwrap();
        assert_eq!(s.get(&id).unwrap().content, "final streamed answer");
        assert_eq!(s.total_estimated_tokens(), 3);

        assert_eq!(
            s.rewrite_content(&id, "again"),
            Err(StoreError::AlreadyRewritten(id.clone()))
        );
    }

    #[test]
    fn rewrite_unknown_message_fails() {
        let mut s = store(10, 100);
        let missing = MessageId::new();
        assert_eq!(
            s.rewrite_content(&missing, "x"),
            Err(StoreError::UnknownMessage(missing.clone()))
        );
    }

    #[test]
    fn rewrite_reenforces_budget() {
        let mut s = store(10, 10);
        let old = s.add_message(Message::user(words(4)));
        let id = s.add_message(Message::placeholder());
        s.rewrite_content(&id, words(8)).unwrap();
        assert!(s.total_estimated_tokens() <= 10);
        assert!(s.get(&old).is_none());
        assert!(s.get(&id).is_some());
    }

    #[test]
    fn clear_starts_new_session() {
        let mut s = store(10, 100);
        let old_session = s.session_id().clone();
        s.add_message(Message::user("hello"));

        let new_session = s.clear();
        assert_ne!(old_session, new_session);
        assert_eq!(s.session_id(), &new_session);
        assert!(s.is_empty());
        assert_eq!(s.total_estimated_tokens(), 0);
    }

    #[test]
    fn limits_from_config() {
        let config = ConversationConfig::default();
        let limits = ConversationLimits::from(&config);
        assert_eq!(limits, ConversationLimits::default());
    }
}
