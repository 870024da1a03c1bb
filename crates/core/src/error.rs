//! Error types for the Tabwise domain.
//!
//! Uses `thiserror` for ergonomic error definitions. The top-level [`Error`]
//! is the taxonomy every assistant operation reports; failures coming out of
//! the inference runtime carry their own typed [`InferenceError`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::environment::{PressureLevel, RuntimeProfile};

/// The top-level error type for all assistant operations.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("Assistant is not initialized")]
    NotInitialized,

    #[error("Hardware does not support the {profile} runtime profile: {reason}")]
    UnsupportedHardware {
        profile: RuntimeProfile,
        reason: String,
    },

    #[error("Insufficient system memory: {available_gb:.1} GB installed, {required_gb:.1} GB required")]
    InsufficientMemory { required_gb: f64, available_gb: f64 },

    #[error("Memory pressure is {level}: only {available_gb:.1} GB available")]
    MemoryPressure {
        level: PressureLevel,
        available_gb: f64,
    },

    #[error("Model not available: {0}")]
    ModelNotAvailable(String),

    #[error("Model download failed: {0}")]
    DownloadFailed(String),

    #[error("Context processing failed: {0}")]
    ContextProcessingFailed(String),

    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    #[error("Assistant is busy with another request")]
    Busy,

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Inference runtime errors ---

/// Coarse classification reported by the inference runtime.
///
/// `DecoderStateCorrupted` is the signal the recovery manager resets on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceErrorKind {
    /// Sampling or forward pass failed.
    Generation,
    /// The prompt could not be encoded or the output decoded.
    Tokenization,
    /// Weights are not loaded (or failed to load).
    ModelNotLoaded,
    /// The runtime's cached decode state (KV cache, positions) is inconsistent.
    DecoderStateCorrupted,
    /// A fragment stream ended abnormally.
    StreamInterrupted,
    /// The consumer abandoned the request.
    Cancelled,
    /// Runtime or framework initialization failed.
    Initialization,
}

impl std::fmt::Display for InferenceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Generation => "generation",
            Self::Tokenization => "tokenization",
            Self::ModelNotLoaded => "model_not_loaded",
            Self::DecoderStateCorrupted => "decoder_state_corrupted",
            Self::StreamInterrupted => "stream_interrupted",
            Self::Cancelled => "cancelled",
            Self::Initialization => "initialization",
        };
        f.write_str(name)
    }
}

/// An error raised by an [`InferenceEngine`](crate::engine::InferenceEngine).
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message} ({kind})")]
pub struct InferenceError {
    pub kind: InferenceErrorKind,
    pub message: String,
}

impl InferenceError {
    pub fn new(kind: InferenceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn generation(message: impl Into<String>) -> Self {
        Self::new(InferenceErrorKind::Generation, message)
    }

    pub fn tokenization(message: impl Into<String>) -> Self {
        Self::new(InferenceErrorKind::Tokenization, message)
    }

    pub fn model_not_loaded(message: impl Into<String>) -> Self {
        Self::new(InferenceErrorKind::ModelNotLoaded, message)
    }

    pub fn decoder_state(message: impl Into<String>) -> Self {
        Self::new(InferenceErrorKind::DecoderStateCorrupted, message)
    }

    pub fn initialization(message: impl Into<String>) -> Self {
        Self::new(InferenceErrorKind::Initialization, message)
    }

    pub fn cancelled() -> Self {
        Self::new(
            InferenceErrorKind::Cancelled,
            "Response stream was abandoned by the consumer",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_pressure_formats_one_decimal() {
        let err = Error::MemoryPressure {
            level: PressureLevel::Critical,
            available_gb: 0.4567,
        };
        let text = err.to_string();
        assert!(text.contains("critical"), "{text}");
        assert!(text.contains("0.5 GB"), "{text}");
    }

    #[test]
    fn inference_error_wraps_into_top_level() {
        let err: Error = InferenceError::decoder_state("kv cache position mismatch").into();
        assert!(matches!(
            err,
            Error::Inference(InferenceError {
                kind: InferenceErrorKind::DecoderStateCorrupted,
                ..
            })
        ));
        assert!(err.to_string().contains("kv cache position mismatch"));
    }

    #[test]
    fn unsupported_hardware_names_profile() {
        let err = Error::UnsupportedHardware {
            profile: RuntimeProfile::Accelerated,
            reason: "requires aarch64".into(),
        };
        assert!(err.to_string().contains("accelerated"));
        assert!(err.to_string().contains("aarch64"));
    }
}
