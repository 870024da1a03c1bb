//! Brings the inference runtime from "not ready" to "ready".
//!
//! 1. Hardware and installed memory are validated (fatal on failure).
//! 2. Model weights are confirmed, downloading them if needed (fatal on failure).
//! 3. The framework runtime and the privacy subsystem start concurrently;
//!    one failing does not stop the other.
//! 4. The inference engine initializes once both branches have finished.
//! 5. Readiness is true only if every step succeeded.

use std::sync::Arc;
use std::time::Duration;

use tabwise_config::RuntimeConfig;
use tabwise_core::engine::{DownloadState, InferenceEngine, ModelDownloader};
use tabwise_core::environment::{HardwareDescriptor, PrivacyManager, RuntimeProfile};
use tabwise_core::error::{Error, Result};
use tabwise_core::state::RuntimeReadiness;
use tokio::sync::Mutex;
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

use crate::state::StatePublisher;

pub struct InitializationSequencer {
    engine: Arc<dyn InferenceEngine>,
    downloader: Arc<dyn ModelDownloader>,
    privacy: Arc<dyn PrivacyManager>,
    hardware: Arc<dyn HardwareDescriptor>,
    state: Arc<StatePublisher>,
    profile: RuntimeProfile,
    min_system_memory_gb: f64,
    poll_interval: Duration,
    /// Serializes `initialize` and `shutdown`.
    running: Mutex<()>,
}

impl InitializationSequencer {
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        downloader: Arc<dyn ModelDownloader>,
        privacy: Arc<dyn PrivacyManager>,
        hardware: Arc<dyn HardwareDescriptor>,
        state: Arc<StatePublisher>,
        config: &RuntimeConfig,
    ) -> Self {
        Self {
            engine,
            downloader,
            privacy,
            hardware,
            state,
            profile: config.profile,
            min_system_memory_gb: config.min_system_memory_gb,
            poll_interval: Duration::from_millis(config.download_poll_interval_ms),
            running: Mutex::new(()),
        }
    }

    /// Run the full sequence.
    ///
    /// Returns `Err` when hardware validation or model acquisition fails.
    /// Failures in the later steps are recorded as the last error and show up
    /// as `Ok(readiness)` with `is_initialized() == false`.
    pub async fn initialize(&self) -> Result<RuntimeReadiness> {
        let _running = self.running.lock().await;

        let readiness = self.state.readiness();
        if readiness.is_initialized() {
            debug!("Assistant already initialized");
            return Ok(readiness);
        }
        // Flags from an earlier partial run must be re-earned.
        self.state
            .update_readiness(|r| *r = RuntimeReadiness::default());

        info!(profile = %self.profile, engine = self.engine.name(), "Initializing assistant");

        self.state.set_status("Checking hardware compatibility...");
        if let Err(e) = self.validate_hardware() {
            self.state.record_error(e.to_string());
            return Err(e);
        }
        self.state.update_readiness(|r| r.hardware_validated = true);

        self.state.set_status("Checking model availability...");
        if let Err(e) = self.ensure_model().await {
            self.state.set_download_progress(None);
            self.state.record_error(e.to_string());
            return Err(e);
        }
        self.state.update_readiness(|r| r.model_available = true);

        self.state.set_status("Starting runtime and privacy services...");
        let (framework, privacy) = self.start_services().await;
        match framework {
            Ok(()) => self.state.update_readiness(|r| r.framework_initialized = true),
            Err(e) => {
                error!(error = %e, "Framework runtime failed to start");
                self.state.record_error(e.to_string());
            }
        }
        match privacy {
            Ok(()) => self.state.update_readiness(|r| r.privacy_initialized = true),
            Err(e) => {
                error!(error = %e, "Privacy subsystem failed to start");
                self.state.record_error(e.to_string());
            }
        }

        self.state.set_status("Loading model...");
        match self.engine.initialize().await {
            Ok(()) => self
                .state
                .update_readiness(|r| r.inference_engine_initialized = true),
            Err(e) => {
                error!(error = %e, "Inference engine failed to initialize");
                self.state.record_error(Error::from(e).to_string());
            }
        }

        let readiness = self.state.readiness();
        if readiness.is_initialized() {
            self.state.clear_error();
            self.state.set_status("Assistant ready");
        } else {
            warn!(?readiness, "Initialization finished without full readiness");
            self.state.set_status("Assistant failed to initialize");
        }
        Ok(readiness)
    }

    /// Drop the engine's state and clear every readiness flag.
    pub async fn shutdown(&self) {
        let _running = self.running.lock().await;
        self.engine.reset_conversation_state().await;
        self.state
            .update_readiness(|r| *r = RuntimeReadiness::default());
        self.state.set_status("Assistant shut down");
    }

    fn validate_hardware(&self) -> Result<()> {
        if !self.hardware.supports_profile(self.profile) {
            return Err(Error::UnsupportedHardware {
                profile: self.profile,
                reason: match self.profile {
                    RuntimeProfile::Accelerated => "requires an ARM64 (aarch64) processor".into(),
                    RuntimeProfile::Cpu => "the CPU runtime is unavailable on this host".into(),
                },
            });
        }

        let installed = self.hardware.total_memory_gb();
        if installed < self.min_system_memory_gb {
            return Err(Error::InsufficientMemory {
                required_gb: self.min_system_memory_gb,
                available_gb: installed,
            });
        }

        debug!(profile = %self.profile, installed_gb = installed, "Hardware validated");
        Ok(())
    }

    async fn ensure_model(&self) -> Result<()> {
        if self.engine.is_ready().await {
            return Ok(());
        }

        let info = self.engine.download_info();
        self.state.set_status(format!(
            "Downloading model ({:.1} GB)...",
            info.size_bytes as f64 / 1_000_000_000.0
        ));
        self.downloader
            .start_download()
            .await
            .map_err(|e| Error::DownloadFailed(e.to_string()))?;

        let mut last_percent = None;
        loop {
            match self.downloader.progress().await {
                DownloadState::Completed => break,
                DownloadState::Failed { reason } => return Err(Error::DownloadFailed(reason)),
                DownloadState::InProgress { fraction } => {
                    self.state.set_download_progress(Some(fraction));
                    let percent = (fraction.clamp(0.0, 1.0) * 100.0).round() as u32;
                    if last_percent != Some(percent) {
                        last_percent = Some(percent);
                        self.state
                            .set_status(format!("Downloading model: {percent}%"));
                    }
                }
                DownloadState::Idle => {}
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        self.state.set_download_progress(None);
        info!("Model download completed");

        if !self.engine.is_ready().await {
            return Err(Error::ModelNotAvailable(
                "download finished but the weights are still missing".into(),
            ));
        }
        Ok(())
    }

    /// Fork the framework and privacy branches, join both.
    async fn start_services(&self) -> (Result<()>, Result<()>) {
        let engine = self.engine.clone();
        let framework = tokio::spawn(async move { engine.prepare_runtime().await });

        let privacy = self.privacy.clone();
        let privacy = tokio::spawn(async move { privacy.initialize().await });

        let (framework, privacy) = tokio::join!(framework, privacy);

        let framework = framework
            .map_err(|e| branch_panicked("framework runtime", e))
            .and_then(|r| r.map_err(Error::from));
        let privacy = privacy
            .map_err(|e| branch_panicked("privacy", e))
            .and_then(|r| r);
        (framework, privacy)
    }
}

fn branch_panicked(branch: &str, e: JoinError) -> Error {
    Error::Internal(format!("{branch} initialization task failed: {e}"))
}
