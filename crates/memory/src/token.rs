//! Token estimation utilities.
//!
//! Without a real tokenizer we approximate BPE behaviour from word shape:
//! short words are usually one token, long words split into several, and
//! punctuation tends to become its own token. Good enough for budgeting the
//! conversation store; swap in an exact [`TokenEstimator`] when one exists.

/// Counts tokens for a span of text.
///
/// Implementations must be deterministic: the conversation store relies on
/// the same text always costing the same amount.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> usize;
}

/// Characters that are charged one extra token each.
const PUNCTUATION: &[char] = &[
    '.', ',', ';', ':', '!', '?', '\'', '"', '(', ')', '[', ']', '{', '}', '<', '>', '-', '_',
    '/', '\\', '@', '#', '$', '%', '^', '&', '*', '+', '=', '|', '~', '`',
];

/// Literal role markers that a chat template wraps with BOS/EOS tokens.
const ROLE_MARKERS: &[&str] = &["user:", "assistant:", "system:"];

/// Extra cost when role markers are present.
const ROLE_MARKER_OVERHEAD: usize = 2;

/// The word-shape heuristic.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicEstimator;

impl TokenEstimator for HeuristicEstimator {
    fn estimate(&self, text: &str) -> usize {
        estimate_tokens(text)
    }
}

/// Estimate the token count for a string.
pub fn estimate_tokens(text: &str) -> usize {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return 0;
    }

    let word_tokens: usize = words
        .iter()
        .map(|w| match w.chars().count() {
            0..=3 => 1,
            4..=8 => 2,
            _ => 3,
        })
        .sum();

    let punctuation_tokens = text.chars().filter(|c| PUNCTUATION.contains(c)).count();

    // Formatting overhead
    let overhead = (words.len() / 10).max(1);

    let lower = text.to_lowercase();
    let markers = if ROLE_MARKERS.iter().any(|m| lower.contains(m)) {
        ROLE_MARKER_OVERHEAD
    } else {
        0
    };

    word_tokens + punctuation_tokens + overhead + markers
}
