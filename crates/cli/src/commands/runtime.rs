//! Wiring shared by the commands that talk to the model.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tabwise_agent::{Assistant, Collaborators};
use tabwise_config::AppConfig;
use tabwise_core::{AssistantEvent, ContextProvider, InferenceEngine, ModelDownloader};
use tabwise_memory::TokenEstimator;
use tabwise_providers::{
    FilePageContext, HostHardware, HostTelemetry, LocalPrivacyManager, NoPageContext,
};
use tokio::task::JoinHandle;
use tracing::warn;

/// The inference side of the collaborators.
pub struct EngineParts {
    pub engine: Arc<dyn InferenceEngine>,
    pub downloader: Arc<dyn ModelDownloader>,
    pub estimator: Option<Arc<dyn TokenEstimator>>,
}

/// Path the config is read from.
pub fn config_path(path: Option<&Path>) -> PathBuf {
    path.map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}

pub fn load_config(path: Option<&Path>) -> Result<AppConfig, Box<dyn Error>> {
    let config = AppConfig::load_with_env(&config_path(path))
        .map_err(|e| format!("Failed to load config: {e}"))?;
    Ok(config)
}

/// The page source for a session. Privacy settings win over `--page`.
pub fn page_provider(config: &AppConfig, page: Option<PathBuf>) -> Arc<dyn ContextProvider> {
    match page {
        Some(path) if config.privacy.allow_page_context => Arc::new(FilePageContext::new(path)),
        Some(path) => {
            warn!(
                path = %path.display(),
                "Page context is disabled by privacy.allow_page_context; ignoring page"
            );
            Arc::new(NoPageContext)
        }
        None => Arc::new(NoPageContext),
    }
}

#[cfg(feature = "local")]
pub fn engine_parts(config: &AppConfig) -> Result<EngineParts, Box<dyn Error>> {
    let local = Arc::new(tabwise_providers::LocalEngine::new(&config.model));
    let estimator = local
        .token_estimator()
        .map(|e| Arc::new(e) as Arc<dyn TokenEstimator>);
    Ok(EngineParts {
        engine: local.clone(),
        downloader: local,
        estimator,
    })
}

#[cfg(not(feature = "local"))]
pub fn engine_parts(_config: &AppConfig) -> Result<EngineParts, Box<dyn Error>> {
    Err("tabwise was built without local inference; rebuild with `--features local`".into())
}

/// Build an assistant on this host with the given page source.
pub fn build_assistant(
    config: &AppConfig,
    pages: Arc<dyn ContextProvider>,
) -> Result<Assistant, Box<dyn Error>> {
    let EngineParts {
        engine,
        downloader,
        estimator,
    } = engine_parts(config)?;

    let collaborators = Collaborators {
        engine,
        downloader,
        privacy: Arc::new(LocalPrivacyManager::new(
            config.data_dir(),
            config.privacy.allow_page_context,
        )),
        telemetry: Arc::new(HostTelemetry::new(&config.resources)),
        hardware: Arc::new(HostHardware::detect(
            config.resources.total_memory_gb_override,
        )),
        pages,
    };

    Ok(match estimator {
        Some(estimator) => Assistant::with_estimator(config, collaborators, estimator),
        None => Assistant::new(config, collaborators),
    })
}

/// Echo status lines and recorded errors to stderr until aborted.
pub fn report_progress(assistant: &Assistant) -> JoinHandle<()> {
    let mut events = assistant.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event.as_ref() {
                AssistantEvent::StatusUpdate { message, .. } => eprintln!("  {message}"),
                AssistantEvent::ErrorRecorded { message, .. } => eprintln!("  ❌ {message}"),
                _ => {}
            }
        }
    })
}

/// Run initialization, printing progress, and fail unless fully ready.
pub async fn initialize(assistant: &Assistant) -> Result<(), Box<dyn Error>> {
    let progress = report_progress(assistant);
    let outcome = assistant.initialize().await;
    progress.abort();

    let readiness = outcome?;
    if readiness.is_initialized() {
        return Ok(());
    }
    let reason = assistant
        .get_status()
        .last_error
        .unwrap_or_else(|| "Assistant failed to initialize".into());
    Err(reason.into())
}
