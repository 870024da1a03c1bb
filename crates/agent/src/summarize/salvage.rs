//! Last-chance cleanup of looping or markup-laden output.

use regex_lite::Regex;

use super::validate::normalize_word;

const MAX_NGRAM: usize = 6;

/// Strip tags, collapse back-to-back repeated phrases, drop repeated lines.
pub fn salvage(text: &str) -> String {
    let stripped = match Regex::new(r"<[^>]*>") {
        Ok(tags) => tags.replace_all(text, "").into_owned(),
        Err(_) => text.to_string(),
    };

    let mut lines: Vec<String> = Vec::new();
    for line in stripped.lines() {
        let collapsed = collapse_line(line);
        if lines.last().is_some_and(|prev| prev.trim() == collapsed.trim()) {
            continue;
        }
        lines.push(collapsed);
    }

    lines.join("\n").trim().to_string()
}

fn collapse_line(line: &str) -> String {
    let mut words: Vec<&str> = line.split_whitespace().collect();
    for n in (1..=MAX_NGRAM).rev() {
        words = collapse_ngrams(&words, n);
    }
    words.join(" ")
}

/// Remove immediate repeats of any `n`-word phrase, keeping the first copy.
fn collapse_ngrams<'a>(words: &[&'a str], n: usize) -> Vec<&'a str> {
    let mut out: Vec<&'a str> = Vec::with_capacity(words.len());
    for &word in words {
        out.push(word);
        let len = out.len();
        if len >= 2 * n && same_phrase(&out[len - 2 * n..len - n], &out[len - n..]) {
            out.truncate(len - n);
        }
    }
    out
}

fn same_phrase(a: &[&str], b: &[&str]) -> bool {
    a.iter()
        .zip(b)
        .all(|(x, y)| normalize_word(x) == normalize_word(y))
}
