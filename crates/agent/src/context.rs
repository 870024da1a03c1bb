//! Assembles the context text that accompanies a query.

use std::sync::Arc;

use tabwise_core::environment::{ContextProvider, PageContext};
use tabwise_core::message::Message;
use tabwise_memory::ConversationStore;
use tracing::debug;

pub struct ContextBuilder {
    pages: Arc<dyn ContextProvider>,
    max_context_chars: usize,
    history_window: usize,
}

impl ContextBuilder {
    pub fn new(
        pages: Arc<dyn ContextProvider>,
        max_context_chars: usize,
        history_window: usize,
    ) -> Self {
        Self {
            pages,
            max_context_chars,
            history_window,
        }
    }

    /// Page context, plus recent history when both flags are set.
    ///
    /// `None` when nothing was requested or the page is unavailable.
    pub async fn build(
        &self,
        include_context: bool,
        include_history: bool,
        store: &ConversationStore,
    ) -> Option<String> {
        if !include_context {
            return None;
        }

        let page = self.pages.extract_current_page_context().await?;
        let mut context = self.render_page(&page);

        if include_history {
            let recent = store.get_recent(self.history_window);
            if !recent.is_empty() {
                context.push_str("\n\n");
                context.push_str(&render_history(&recent));
            }
        }

        debug!(title = %page.title, chars = context.chars().count(), "Built query context");
        Some(context)
    }

    fn render_page(&self, page: &PageContext) -> String {
        format!(
            "Page: {}\n\n{}",
            page.title,
            prefix_chars(page.text.trim(), self.max_context_chars)
        )
    }

    pub fn pages(&self) -> &Arc<dyn ContextProvider> {
        &self.pages
    }
}

fn render_history(messages: &[Message]) -> String {
    let mut block = String::from("Recent conversation:");
    for message in messages {
        block.push('\n');
        block.push_str(message.role.as_str());
        block.push_str(": ");
        block.push_str(&message.content);
    }
    block
}

/// The first `limit` characters of `text`.
pub(crate) fn prefix_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}
