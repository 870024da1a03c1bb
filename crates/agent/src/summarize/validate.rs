//! Rejects degenerate model output.
//!
//! Small local models fail in recognisable ways: they echo markup from the
//! page, stutter, loop on a phrase, or fall back to canned "I need more
//! context" replies. Each failure mode is one [`InvalidReason`].

use regex_lite::Regex;

const MIN_CHARS: usize = 20;

const HTML_PATTERN: &str =
    r"(?i)<div|<span|<p>|<a\s|</[a-z][a-z0-9]*\s*>|\bclass\s*=|\bhref\s*=|\bstyle\s*=";

const CONFUSED_PHRASES: &[&str] = &[
    "i understand",
    "please provide more context",
    "please provide more information",
    "as an ai",
    "i'm sorry, but",
    "i cannot",
    "could you please provide",
];

const MAX_CONFUSED_OCCURRENCES: usize = 1;

const LOOP_REPEATS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    TooShort,
    HtmlLeakage,
    DuplicateWord,
    PhraseLoop,
    ConfusedBoilerplate,
}

pub fn is_valid(text: &str) -> bool {
    invalid_reason(text).is_none()
}

/// Why `text` is unusable, or `None` if it is fine.
pub fn invalid_reason(text: &str) -> Option<InvalidReason> {
    let text = text.trim();

    if text.chars().count() < MIN_CHARS {
        return Some(InvalidReason::TooShort);
    }
    if Regex::new(HTML_PATTERN).is_ok_and(|re| re.is_match(text)) {
        return Some(InvalidReason::HtmlLeakage);
    }

    let words = normalized_words(text);
    if words.windows(2).any(|pair| pair[0] == pair[1]) {
        return Some(InvalidReason::DuplicateWord);
    }
    if has_phrase_loop(&words) {
        return Some(InvalidReason::PhraseLoop);
    }

    let lower = text.to_lowercase();
    let confused: usize = CONFUSED_PHRASES
        .iter()
        .map(|phrase| lower.matches(phrase).count())
        .sum();
    if confused > MAX_CONFUSED_OCCURRENCES {
        return Some(InvalidReason::ConfusedBoilerplate);
    }

    None
}

/// Lowercased words with punctuation stripped; empty words dropped.
pub(crate) fn normalized_words(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(normalize_word)
        .filter(|w| !w.is_empty())
        .collect()
}

pub(crate) fn normalize_word(word: &str) -> String {
    word.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// A 3 to 6 word phrase repeated back to back at least three times.
fn has_phrase_loop(words: &[String]) -> bool {
    (3..=6).any(|n| {
        (0..words.len()).any(|start| {
            let mut repeats = 1;
            let phrase = match words.get(start..start + n) {
                Some(p) => p,
                None => return false,
            };
            let mut next = start + n;
            while words.get(next..next + n) == Some(phrase) {
                repeats += 1;
                if repeats >= LOOP_REPEATS {
                    return true;
                }
                next += n;
            }
            false
        })
    })
}
