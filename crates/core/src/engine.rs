//! Inference engine trait: the abstraction over the local model runtime.
//!
//! An engine knows how to answer a query (optionally with page context and
//! recent history), either as a complete response or as a stream of text
//! fragments. The orchestration core never looks behind this trait.
//!
//! Implementations: the Candle GGUF engine in `tabwise-providers` (feature
//! `local`) and scripted engines in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::InferenceError;
use crate::message::Message;

/// A stream of generated text fragments. Ends when the sender is dropped.
pub type FragmentStream = mpsc::Receiver<std::result::Result<String, InferenceError>>;

/// Everything the engine needs to answer one query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// The user's question
    pub query: String,

    /// Page and/or history context assembled by the pipeline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    /// Most recent conversation messages, oldest first
    #[serde(default)]
    pub history: Vec<Message>,
}

/// A complete (non-streaming) engine response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiResponse {
    /// The generated text
    pub text: String,

    /// Engine-specific metadata (model, token counts, timings)
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl AiResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: serde_json::Map::new(),
        }
    }
}

/// Static facts about the model weights the engine needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadInfo {
    pub size_bytes: u64,
}

/// Progress of a model download as reported by the downloader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DownloadState {
    /// No download has been requested.
    Idle,
    /// Fraction in `0.0..=1.0`.
    InProgress { fraction: f32 },
    Completed,
    Failed { reason: String },
}

/// The core inference engine trait.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// A human-readable name for this engine (e.g., "candle", "mock").
    fn name(&self) -> &str;

    /// Are the model weights present and usable?
    async fn is_ready(&self) -> bool;

    /// Size of the weights this engine would download.
    fn download_info(&self) -> DownloadInfo;

    /// Framework-specific runtime preparation (device selection, kernels).
    ///
    /// Runs concurrently with privacy initialization, before [`initialize`](Self::initialize).
    async fn prepare_runtime(&self) -> std::result::Result<(), InferenceError> {
        Ok(())
    }

    /// Load the model so that generation calls can be served.
    async fn initialize(&self) -> std::result::Result<(), InferenceError>;

    /// Generate a complete response.
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> std::result::Result<AiResponse, InferenceError>;

    /// Generate a response as a stream of fragments.
    ///
    /// Default implementation calls `generate()` and yields the text as a single fragment.
    async fn generate_streaming(
        &self,
        request: GenerationRequest,
    ) -> std::result::Result<FragmentStream, InferenceError> {
        let response = self.generate(request).await?;
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.send(Ok(response.text)).await;
        Ok(rx)
    }

    /// Drop any cached decode state (KV cache, positions).
    async fn reset_conversation_state(&self);

    /// Template-free generation straight from a prompt.
    async fn raw_generate(
        &self,
        prompt: &str,
        max_tokens: u32,
    ) -> std::result::Result<String, InferenceError>;
}

/// The download manager for model weights.
#[async_trait]
pub trait ModelDownloader: Send + Sync {
    /// Begin (or resume) fetching the weights. Returns once the download has started.
    async fn start_download(&self) -> std::result::Result<(), InferenceError>;

    /// Current download progress.
    async fn progress(&self) -> DownloadState;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoEngine;

    #[async_trait]
    impl InferenceEngine for EchoEngine {
        fn name(&self) -> &str {
            "echo"
        }

        async fn is_ready(&self) -> bool {
            true
        }

        fn download_info(&self) -> DownloadInfo {
            DownloadInfo { size_bytes: 0 }
        }

        async fn initialize(&self) -> Result<(), InferenceError> {
            Ok(())
        }

        async fn generate(&self, request: GenerationRequest) -> Result<AiResponse, InferenceError> {
            Ok(AiResponse::text(request.query))
        }

        async fn reset_conversation_state(&self) {}

        async fn raw_generate(&self, prompt: &str, _max_tokens: u32) -> Result<String, InferenceError> {
            Ok(prompt.to_string())
        }
    }

    #[tokio::test]
    async fn default_streaming_yields_single_fragment() {
        let engine = EchoEngine;
        let mut rx = engine
            .generate_streaming(GenerationRequest {
                query: "hello".into(),
                context: None,
                history: vec![],
            })
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().unwrap(), "hello");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn default_prepare_runtime_is_noop() {
        assert!(EchoEngine.prepare_runtime().await.is_ok());
    }

    #[test]
    fn download_state_serialization() {
        let json = serde_json::to_string(&DownloadState::InProgress { fraction: 0.5 }).unwrap();
        assert!(json.contains(r#""state":"in_progress""#));
        let parsed: DownloadState = serde_json::from_str(r#"{"state":"completed"}"#).unwrap();
        assert_eq!(parsed, DownloadState::Completed);
    }
}
