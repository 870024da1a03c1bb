//! TL;DR summaries of the current page.
//!
//! One raw generation over a prefix of the page, validated. If the output is
//! unusable the model gets one more try with a shorter prompt, then the
//! output is salvaged, and if nothing works the caller gets
//! [`UNABLE_TO_SUMMARIZE`].

mod salvage;
mod validate;

use std::sync::Arc;

use tabwise_config::SummaryConfig;
use tabwise_core::engine::InferenceEngine;
use tabwise_core::error::InferenceError;
use tracing::{debug, info, warn};

pub use salvage::salvage;
pub use validate::{InvalidReason, invalid_reason, is_valid};

use crate::context::prefix_chars;

/// Returned when no attempt produced usable output.
pub const UNABLE_TO_SUMMARIZE: &str = "Unable to summarize this page.";

pub struct Summarizer {
    engine: Arc<dyn InferenceEngine>,
    config: SummaryConfig,
}

impl Summarizer {
    pub fn new(engine: Arc<dyn InferenceEngine>, config: SummaryConfig) -> Self {
        Self { engine, config }
    }

    /// Produce a summary. Only engine failures are errors.
    pub async fn summarize(&self, title: &str, text: &str) -> Result<String, InferenceError> {
        let text = text.trim();

        let first = self
            .engine
            .raw_generate(
                &primary_prompt(title, prefix_chars(text, self.config.primary_prefix_chars)),
                self.config.max_tokens,
            )
            .await?;
        if is_valid(&first) {
            info!(title, attempt = 1, "Page summarized");
            return Ok(first.trim().to_string());
        }
        debug!(reason = ?invalid_reason(&first), "First summary rejected; retrying");

        let second = self
            .engine
            .raw_generate(
                &retry_prompt(prefix_chars(text, self.config.retry_prefix_chars)),
                self.config.retry_max_tokens,
            )
            .await?;
        if is_valid(&second) {
            info!(title, attempt = 2, "Page summarized");
            return Ok(second.trim().to_string());
        }
        debug!(reason = ?invalid_reason(&second), "Retry rejected; salvaging");

        for candidate in [&second, &first] {
            let salvaged = salvage(candidate);
            if is_valid(&salvaged) {
                info!(title, "Page summarized from salvaged output");
                return Ok(salvaged);
            }
        }

        warn!(title, "No usable summary after retry and salvage");
        Ok(UNABLE_TO_SUMMARIZE.to_string())
    }
}

fn primary_prompt(title: &str, excerpt: &str) -> String {
    format!(
        "Summarize the web page below as a TL;DR.\n\
         Start with exactly one sentiment emoji on its own line: \
         ✅ for positive, ⚠️ for negative, 📰 for neutral.\n\
         Then write 2-3 short bullet points, each starting with \"• \".\n\
         Do not repeat yourself and do not include HTML.\n\n\
         Title: {title}\n\n\
         {excerpt}\n\n\
         TL;DR:\n"
    )
}

fn retry_prompt(excerpt: &str) -> String {
    format!(
        "Give one emoji (✅, ⚠️ or 📰) then 2 bullet points starting with \"• \" \
         summarizing this text:\n\n{excerpt}\n\nTL;DR:\n"
    )
}
