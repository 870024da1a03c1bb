//! Collaborators describing the world around the assistant.
//!
//! Hardware, live memory telemetry, privacy, and the page the user is looking
//! at. Each one is a narrow capability passed in at construction; the core
//! never reaches into UI objects to get them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Which runtime configuration the engine will run under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeProfile {
    /// Plain CPU inference; runs anywhere.
    #[default]
    Cpu,
    /// GPU/unified-memory acceleration; requires an ARM64 host.
    Accelerated,
}

impl std::fmt::Display for RuntimeProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Accelerated => f.write_str("accelerated"),
        }
    }
}

impl std::str::FromStr for RuntimeProfile {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "accelerated" | "gpu" => Ok(Self::Accelerated),
            other => Err(format!(
                "unknown runtime profile '{other}' (expected 'cpu' or 'accelerated')"
            )),
        }
    }
}

/// How hard the system is pressed for memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PressureLevel {
    Normal,
    Warning,
    Critical,
}

impl std::fmt::Display for PressureLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => f.write_str("normal"),
            Self::Warning => f.write_str("warning"),
            Self::Critical => f.write_str("critical"),
        }
    }
}

/// A live memory sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryStatus {
    pub pressure_level: PressureLevel,
    pub available_gb: f64,
    pub total_gb: f64,
}

/// The safety verdict and the status it was derived from, taken from one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryAssessment {
    pub safe_to_run: bool,
    pub status: MemoryStatus,
}

/// Static description of the host machine.
pub trait HardwareDescriptor: Send + Sync {
    /// Can this machine run the given runtime profile?
    fn supports_profile(&self, profile: RuntimeProfile) -> bool;

    /// Installed physical memory in gigabytes.
    fn total_memory_gb(&self) -> f64;
}

/// Live memory telemetry, sampled on every inference-triggering call.
pub trait ResourceTelemetry: Send + Sync {
    fn is_safe_to_run(&self) -> bool;

    fn current_status(&self) -> MemoryStatus;

    /// Verdict and status from a single sample. Implementations that read a
    /// live source should override this so the two cannot disagree.
    fn assess(&self) -> MemoryAssessment {
        MemoryAssessment {
            safe_to_run: self.is_safe_to_run(),
            status: self.current_status(),
        }
    }
}

/// Privacy/consent subsystem.
#[async_trait]
pub trait PrivacyManager: Send + Sync {
    async fn initialize(&self) -> Result<()>;
}

/// The page currently in front of the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageContext {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub text: String,
}

/// Source of page context (the browser's current tab, a file, a fixture).
#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn extract_current_page_context(&self) -> Option<PageContext>;
}
