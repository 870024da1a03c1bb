//! `tabwise summarize`: TL;DR of a text file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tabwise_providers::FilePageContext;

use super::runtime;

pub async fn run(
    config_path: Option<&Path>,
    file: PathBuf,
    title: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = runtime::load_config(config_path)?;
    if !config.privacy.allow_page_context {
        return Err("Page context is disabled (privacy.allow_page_context = false)".into());
    }
    if !file.is_file() {
        return Err(format!("No such file: {}", file.display()).into());
    }

    let mut page = FilePageContext::new(file);
    if let Some(title) = title {
        page = page.with_title(title);
    }
    let assistant = runtime::build_assistant(&config, Arc::new(page))?;

    runtime::initialize(&assistant).await?;
    let summary = assistant.summarize_current_page().await;
    assistant.shutdown().await;

    println!("{}", summary?);
    Ok(())
}
