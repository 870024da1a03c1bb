//! Page context providers.
//!
//! The browser hands the assistant whatever tab is in front of the user. From
//! the CLI that is a file on disk; in tests it is a fixed value.

use std::path::PathBuf;

use async_trait::async_trait;
use tabwise_core::environment::{ContextProvider, PageContext};
use tracing::warn;

/// No page is open.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPageContext;

#[async_trait]
impl ContextProvider for NoPageContext {
    async fn extract_current_page_context(&self) -> Option<PageContext> {
        None
    }
}

/// Always returns the same page.
#[derive(Debug, Clone)]
pub struct StaticPageContext {
    page: Option<PageContext>,
}

impl StaticPageContext {
    pub fn new(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            page: Some(PageContext {
                title: title.into(),
                url: None,
                text: text.into(),
            }),
        }
    }
}

#[async_trait]
impl ContextProvider for StaticPageContext {
    async fn extract_current_page_context(&self) -> Option<PageContext> {
        self.page.clone()
    }
}

/// Reads the page text from a file on every extraction.
#[derive(Debug, Clone)]
pub struct FilePageContext {
    path: PathBuf,
    title: Option<String>,
}

impl FilePageContext {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            title: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    fn title(&self) -> String {
        self.title.clone().unwrap_or_else(|| {
            self.path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "Untitled page".to_string())
        })
    }
}

#[async_trait]
impl ContextProvider for FilePageContext {
    async fn extract_current_page_context(&self) -> Option<PageContext> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) if !text.trim().is_empty() => Some(PageContext {
                title: self.title(),
                url: Some(format!("file://{}", self.path.display())),
                text,
            }),
            Ok(_) => None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read page file");
                None
            }
        }
    }
}
