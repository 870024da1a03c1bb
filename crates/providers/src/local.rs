//! Local inference engine: runs GGUF-quantized models on this machine.
//!
//! Uses [Candle](https://github.com/huggingface/candle) (Rust-native ML) with
//! weights fetched from the Hugging Face Hub cache. Nothing leaves the device
//! once the weights are present.
//!
//! Supported model families:
//! - **Qwen2** (0.5B / 1.5B): the default, good quality per byte
//! - **SmolLM** (135M / 360M): smallest practical models
//! - **TinyLlama** (1.1B)
//! - Any local `.gguf` file with a `tokenizer.json` next to it

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use candle_core::quantized::gguf_file;
use candle_core::{DType, Device, Tensor};
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::quantized_llama as qlm;
use hf_hub::Cache;
use hf_hub::api::sync::Api;
use tabwise_config::ModelConfig;
use tabwise_core::engine::{
    AiResponse, DownloadInfo, DownloadState, FragmentStream, GenerationRequest, InferenceEngine,
    ModelDownloader,
};
use tabwise_core::error::InferenceError;
use tabwise_core::message::{Message, Role};
use tabwise_memory::{TokenEstimator, estimate_tokens};
use tokenizers::Tokenizer;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

/// Longest sequence the quantized llama implementation keeps positions for.
const CONTEXT_LIMIT: usize = 4096;

const SAMPLING_SEED: u64 = 42;

/// Raw prompts (summaries) sample cooler than chat.
const RAW_TEMPERATURE_CAP: f32 = 0.3;

const STREAM_BUFFER: usize = 32;

// ── Model presets ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ModelPreset {
    repo: &'static str,
    gguf_file: &'static str,
    tokenizer_repo: &'static str,
    chat_template: ChatTemplate,
    size_bytes: u64,
}

/// Chat template format used to structure messages for the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChatTemplate {
    /// `<|system|>\n{content}</s>\n<|user|>\n{content}</s>\n<|assistant|>\n`
    TinyLlama,
    /// `<|im_start|>system\n{content}<|im_end|>\n...<|im_start|>assistant\n`
    ChatML,
}

fn resolve_preset(alias: &str) -> Option<ModelPreset> {
    match alias.to_lowercase().as_str() {
        "qwen:0.5b" | "qwen-0.5b" | "qwen2-0.5b" => Some(ModelPreset {
            repo: "Qwen/Qwen2-0.5B-Instruct-GGUF",
            gguf_file: "qwen2-0_5b-instruct-q4_k_m.gguf",
            tokenizer_repo: "Qwen/Qwen2-0.5B-Instruct",
            chat_template: ChatTemplate::ChatML,
            size_bytes: 397_808_192,
        }),
        "qwen:1.5b" | "qwen-1.5b" | "qwen2-1.5b" => Some(ModelPreset {
            repo: "Qwen/Qwen2-1.5B-Instruct-GGUF",
            gguf_file: "qwen2-1_5b-instruct-q4_k_m.gguf",
            tokenizer_repo: "Qwen/Qwen2-1.5B-Instruct",
            chat_template: ChatTemplate::ChatML,
            size_bytes: 986_046_272,
        }),
        "smollm" | "smollm:135m" | "smollm-135m" => Some(ModelPreset {
            repo: "TheBloke/SmolLM-135M-Instruct-GGUF",
            gguf_file: "smollm-135m-instruct.Q4_K_M.gguf",
            tokenizer_repo: "HuggingFaceTB/SmolLM-135M-Instruct",
            chat_template: ChatTemplate::ChatML,
            size_bytes: 105_472_000,
        }),
        "smollm:360m" | "smollm-360m" => Some(ModelPreset {
            repo: "TheBloke/SmolLM-360M-Instruct-GGUF",
            gguf_file: "smollm-360m-instruct.Q4_K_M.gguf",
            tokenizer_repo: "HuggingFaceTB/SmolLM-360M-Instruct",
            chat_template: ChatTemplate::ChatML,
            size_bytes: 270_532_608,
        }),
        "tinyllama" | "tiny-llama" | "tinyllama-1.1b" => Some(ModelPreset {
            repo: "TheBloke/TinyLlama-1.1B-Chat-v1.0-GGUF",
            gguf_file: "tinyllama-1.1b-chat-v1.0.Q4_K_M.gguf",
            tokenizer_repo: "TinyLlama/TinyLlama-1.1B-Chat-v1.0",
            chat_template: ChatTemplate::TinyLlama,
            size_bytes: 668_788_096,
        }),
        _ => None,
    }
}

/// Names accepted by [`LocalEngine::new`] besides file paths.
pub const PRESET_NAMES: &[&str] = &[
    "qwen:0.5b",
    "qwen:1.5b",
    "smollm:135m",
    "smollm:360m",
    "tinyllama",
];

/// Where the weights come from.
#[derive(Debug, Clone)]
enum ModelSource {
    Preset(ModelPreset),
    File(PathBuf),
    Unknown(String),
}

impl ModelSource {
    fn resolve(name: &str) -> Self {
        if name.ends_with(".gguf") {
            return Self::File(PathBuf::from(name));
        }
        match resolve_preset(name) {
            Some(preset) => Self::Preset(preset),
            None => Self::Unknown(name.to_string()),
        }
    }

    /// Paths of weights and tokenizer if both are already on disk.
    fn cached_files(&self) -> Option<(PathBuf, PathBuf)> {
        match self {
            Self::Preset(preset) => {
                let cache = Cache::default();
                let weights = cache.model(preset.repo.to_string()).get(preset.gguf_file)?;
                let tokenizer = cache
                    .model(preset.tokenizer_repo.to_string())
                    .get("tokenizer.json")?;
                Some((weights, tokenizer))
            }
            Self::File(path) => {
                let tokenizer = path.with_file_name("tokenizer.json");
                (path.is_file() && tokenizer.is_file()).then(|| (path.clone(), tokenizer))
            }
            Self::Unknown(_) => None,
        }
    }

    fn chat_template(&self) -> ChatTemplate {
        match self {
            Self::Preset(preset) => preset.chat_template,
            _ => ChatTemplate::ChatML,
        }
    }

    fn unknown_model_error(name: &str) -> InferenceError {
        InferenceError::model_not_loaded(format!(
            "Unknown local model '{name}'. Available presets: {}. Or provide a path to a .gguf file.",
            PRESET_NAMES.join(", ")
        ))
    }
}

// ── Engine ─────────────────────────────────────────────────────────────

/// Runs a GGUF model via Candle.
///
/// The loaded model sits behind a Mutex because Candle inference is
/// single-threaded CPU work and the KV cache belongs to one sequence.
pub struct LocalEngine {
    inner: Arc<Mutex<Option<LocalModelState>>>,
    model_name: String,
    source: ModelSource,
    temperature: f32,
    max_tokens: u32,
    system_prompt: String,
    download: Arc<std::sync::Mutex<DownloadState>>,
}

impl LocalEngine {
    /// `config.name` is a preset alias (`"qwen:0.5b"`) or a path to a `.gguf` file.
    ///
    /// Nothing is loaded until [`InferenceEngine::initialize`].
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
            model_name: config.name.clone(),
            source: ModelSource::resolve(&config.name),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            system_prompt: config.system_prompt.clone(),
            download: Arc::new(std::sync::Mutex::new(DownloadState::Idle)),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// An exact token counter backed by this model's tokenizer, if cached.
    pub fn token_estimator(&self) -> Option<TokenizerEstimator> {
        let (_, tokenizer) = self.source.cached_files()?;
        TokenizerEstimator::from_file(&tokenizer).ok()
    }

    fn set_download(&self, state: DownloadState) {
        set_download(&self.download, state);
    }

    /// Messages handed to the chat template for one request.
    fn conversation_for(&self, request: &GenerationRequest) -> Vec<Message> {
        let system = match &request.context {
            Some(context) if !context.is_empty() => {
                format!("{}\n\n{}", self.system_prompt, context)
            }
            _ => self.system_prompt.clone(),
        };

        let mut messages = Vec::with_capacity(request.history.len() + 2);
        messages.push(Message::system(system));
        messages.extend(
            request
                .history
                .iter()
                .filter(|m| m.role != Role::System)
                .cloned(),
        );

        // The pipeline stores the user message before calling us.
        let already_asked = messages
            .last()
            .is_some_and(|m| m.role == Role::User && m.content == request.query);
        if !already_asked {
            messages.push(Message::user(request.query.clone()));
        }
        messages
    }

    async fn loaded(&self) -> Result<(), InferenceError> {
        if self.inner.lock().await.is_some() {
            Ok(())
        } else {
            Err(InferenceError::model_not_loaded(
                "Local model is not loaded; initialize the engine first",
            ))
        }
    }
}

fn set_download(slot: &std::sync::Mutex<DownloadState>, state: DownloadState) {
    let mut guard = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = state;
}

#[async_trait]
impl InferenceEngine for LocalEngine {
    fn name(&self) -> &str {
        "candle"
    }

    async fn is_ready(&self) -> bool {
        self.source.cached_files().is_some()
    }

    fn download_info(&self) -> DownloadInfo {
        let size_bytes = match &self.source {
            ModelSource::Preset(preset) => preset.size_bytes,
            ModelSource::File(path) => std::fs::metadata(path).map(|m| m.len()).unwrap_or(0),
            ModelSource::Unknown(_) => 0,
        };
        DownloadInfo { size_bytes }
    }

    async fn prepare_runtime(&self) -> Result<(), InferenceError> {
        tokio::task::spawn_blocking(|| {
            let device = Device::Cpu;
            let scratch = Tensor::ones((2, 2), DType::F32, &device)?;
            scratch.sum_all()?.to_scalar::<f32>()
        })
        .await
        .map_err(|e| InferenceError::initialization(format!("Runtime check task failed: {e}")))?
        .map_err(|e| InferenceError::initialization(format!("Candle CPU runtime unusable: {e}")))?;

        debug!("Candle CPU runtime ready");
        Ok(())
    }

    async fn initialize(&self) -> Result<(), InferenceError> {
        if self.inner.lock().await.is_some() {
            return Ok(());
        }

        let (weights, tokenizer) = match self.source.cached_files() {
            Some(files) => files,
            None if matches!(self.source, ModelSource::Unknown(_)) => {
                return Err(ModelSource::unknown_model_error(&self.model_name));
            }
            None => {
                return Err(InferenceError::model_not_loaded(format!(
                    "Weights for '{}' are not on disk",
                    self.model_name
                )));
            }
        };

        info!(model = %self.model_name, path = %weights.display(), "Loading local model");
        let template = self.source.chat_template();
        let loaded = tokio::task::spawn_blocking(move || {
            LocalModelState::load(&weights, &tokenizer, template)
        })
        .await
        .map_err(|e| InferenceError::initialization(format!("Model loading task failed: {e}")))??;

        *self.inner.lock().await = Some(loaded);
        info!(model = %self.model_name, "Local model loaded");
        Ok(())
    }

    async fn generate(&self, request: GenerationRequest) -> Result<AiResponse, InferenceError> {
        self.loaded().await?;

        let messages = self.conversation_for(&request);
        let (max_tokens, temperature) = (self.max_tokens, self.temperature);
        let inner = self.inner.clone();

        let output = tokio::task::spawn_blocking(move || {
            let mut guard = inner.blocking_lock();
            let state = guard
                .as_mut()
                .ok_or_else(|| InferenceError::model_not_loaded("Local model was unloaded"))?;
            let prompt = state.chat_template.format(&messages);
            state.run(&prompt, max_tokens, temperature, |_| true)
        })
        .await
        .map_err(|e| InferenceError::generation(format!("Inference task panicked: {e}")))??;

        let mut metadata = serde_json::Map::new();
        metadata.insert("engine".into(), "candle".into());
        metadata.insert("model".into(), self.model_name.clone().into());
        metadata.insert("prompt_tokens".into(), output.prompt_tokens.into());
        metadata.insert("completion_tokens".into(), output.completion_tokens.into());

        Ok(AiResponse {
            text: clean_output(&output.text),
            metadata,
        })
    }

    async fn generate_streaming(
        &self,
        request: GenerationRequest,
    ) -> Result<FragmentStream, InferenceError> {
        self.loaded().await?;

        let messages = self.conversation_for(&request);
        let (max_tokens, temperature) = (self.max_tokens, self.temperature);
        let inner = self.inner.clone();
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        tokio::task::spawn_blocking(move || {
            let mut guard = inner.blocking_lock();
            let Some(state) = guard.as_mut() else {
                let _ = tx.blocking_send(Err(InferenceError::model_not_loaded(
                    "Local model was unloaded",
                )));
                return;
            };
            let prompt = state.chat_template.format(&messages);
            let result = state.run(&prompt, max_tokens, temperature, |fragment| {
                tx.blocking_send(Ok(fragment.to_string())).is_ok()
            });
            if let Err(e) = result {
                let _ = tx.blocking_send(Err(e));
            }
        });

        Ok(rx)
    }

    async fn reset_conversation_state(&self) {
        // Dropping the weights also drops the KV cache they own.
        if self.inner.lock().await.take().is_some() {
            info!(model = %self.model_name, "Dropped local model state");
        }
    }

    async fn raw_generate(&self, prompt: &str, max_tokens: u32) -> Result<String, InferenceError> {
        self.loaded().await?;

        let prompt = prompt.to_string();
        let temperature = self.temperature.min(RAW_TEMPERATURE_CAP);
        let inner = self.inner.clone();

        let output = tokio::task::spawn_blocking(move || {
            let mut guard = inner.blocking_lock();
            let state = guard
                .as_mut()
                .ok_or_else(|| InferenceError::model_not_loaded("Local model was unloaded"))?;
            state.run(&prompt, max_tokens, temperature, |_| true)
        })
        .await
        .map_err(|e| InferenceError::generation(format!("Inference task panicked: {e}")))??;

        Ok(clean_output(&output.text))
    }
}

#[async_trait]
impl ModelDownloader for LocalEngine {
    async fn start_download(&self) -> Result<(), InferenceError> {
        let preset = match &self.source {
            ModelSource::Preset(preset) => *preset,
            ModelSource::File(path) => {
                return if self.source.cached_files().is_some() {
                    self.set_download(DownloadState::Completed);
                    Ok(())
                } else {
                    Err(InferenceError::model_not_loaded(format!(
                        "{} (with tokenizer.json beside it) does not exist",
                        path.display()
                    )))
                };
            }
            ModelSource::Unknown(name) => return Err(ModelSource::unknown_model_error(name)),
        };

        if matches!(self.progress().await, DownloadState::InProgress { .. }) {
            return Ok(());
        }
        self.set_download(DownloadState::InProgress { fraction: 0.0 });
        info!(repo = preset.repo, file = preset.gguf_file, "Downloading model weights");

        let slot = self.download.clone();
        tokio::task::spawn_blocking(move || {
            let outcome = (|| -> Result<(), String> {
                let api = Api::new().map_err(|e| format!("Hugging Face Hub unavailable: {e}"))?;
                api.model(preset.repo.to_string())
                    .get(preset.gguf_file)
                    .map_err(|e| format!("Failed to fetch {}: {e}", preset.gguf_file))?;
                set_download(&slot, DownloadState::InProgress { fraction: 0.95 });
                api.model(preset.tokenizer_repo.to_string())
                    .get("tokenizer.json")
                    .map_err(|e| format!("Failed to fetch tokenizer: {e}"))?;
                Ok(())
            })();

            match outcome {
                Ok(()) => {
                    info!(repo = preset.repo, "Model download complete");
                    set_download(&slot, DownloadState::Completed);
                }
                Err(reason) => {
                    warn!(repo = preset.repo, %reason, "Model download failed");
                    set_download(&slot, DownloadState::Failed { reason });
                }
            }
        });

        Ok(())
    }

    async fn progress(&self) -> DownloadState {
        self.download
            .lock()
            .map(|state| state.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

// ── Loaded model ───────────────────────────────────────────────────────

struct LocalModelState {
    model: qlm::ModelWeights,
    tokenizer: Tokenizer,
    device: Device,
    chat_template: ChatTemplate,
    eos_token_id: u32,
}

struct Generated {
    text: String,
    prompt_tokens: usize,
    completion_tokens: usize,
}

impl LocalModelState {
    fn load(
        weights: &Path,
        tokenizer_path: &Path,
        chat_template: ChatTemplate,
    ) -> Result<Self, InferenceError> {
        let device = Device::Cpu;

        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| InferenceError::initialization(format!("Failed to load tokenizer: {e}")))?;

        let mut file = std::fs::File::open(weights)
            .map_err(|e| InferenceError::initialization(format!("Failed to open model file: {e}")))?;
        let gguf = gguf_file::Content::read(&mut file)
            .map_err(|e| InferenceError::initialization(format!("Failed to parse GGUF file: {e}")))?;
        let model = qlm::ModelWeights::from_gguf(gguf, &mut file, &device).map_err(|e| {
            InferenceError::initialization(format!("Failed to load model weights: {e}"))
        })?;

        let eos_token_id = chat_template
            .stop_tokens()
            .iter()
            .find_map(|t| tokenizer.token_to_id(t))
            .unwrap_or(2);

        Ok(Self {
            model,
            tokenizer,
            device,
            chat_template,
            eos_token_id,
        })
    }

    /// Tokenize, sample up to `max_tokens`, and decode.
    ///
    /// `on_fragment` sees each newly decoded piece of text; returning `false`
    /// stops generation early.
    fn run(
        &mut self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
        mut on_fragment: impl FnMut(&str) -> bool,
    ) -> Result<Generated, InferenceError> {
        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| InferenceError::tokenization(format!("Tokenization failed: {e}")))?;

        let max_tokens = (max_tokens as usize).min(CONTEXT_LIMIT / 2);
        let prompt_tokens = fit_prompt(encoding.get_ids(), CONTEXT_LIMIT - max_tokens);
        if prompt_tokens.len() < encoding.get_ids().len() {
            debug!(
                dropped = encoding.get_ids().len() - prompt_tokens.len(),
                "Prompt truncated to fit the context window"
            );
        }

        let mut logits_processor = if temperature <= 0.0 {
            LogitsProcessor::new(SAMPLING_SEED, None, None)
        } else {
            LogitsProcessor::new(SAMPLING_SEED, Some(temperature as f64), None)
        };

        let mut generated: Vec<u32> = Vec::new();
        let mut emitted = String::new();
        let mut input = Tensor::new(prompt_tokens, &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(map_candle_err)?;
        let mut index_pos = 0;

        for _ in 0..max_tokens {
            let fed = input.dim(1).map_err(map_candle_err)?;
            let logits = self
                .model
                .forward(&input, index_pos)
                .and_then(|l| l.squeeze(0))
                .and_then(|l| l.to_dtype(DType::F32))
                .map_err(map_candle_err)?;
            index_pos += fed;

            let next = logits_processor.sample(&logits).map_err(map_candle_err)?;
            if next == self.eos_token_id {
                break;
            }
            generated.push(next);

            let decoded = self
                .tokenizer
                .decode(&generated, true)
                .map_err(|e| InferenceError::tokenization(format!("Detokenization failed: {e}")))?;
            if let Some(fragment) = decoded.get(emitted.len()..).filter(|f| !f.is_empty()) {
                if self.chat_template.stop_tokens().iter().any(|s| decoded.contains(s)) {
                    break;
                }
                if !on_fragment(fragment) {
                    debug!("Fragment consumer went away; stopping generation");
                    break;
                }
                emitted = decoded;
            }

            input = Tensor::new(&[next][..], &self.device)
                .and_then(|t| t.unsqueeze(0))
                .map_err(map_candle_err)?;
        }

        debug!(
            prompt_tokens = prompt_tokens.len(),
            completion_tokens = generated.len(),
            "Generation complete"
        );

        Ok(Generated {
            text: emitted,
            prompt_tokens: prompt_tokens.len(),
            completion_tokens: generated.len(),
        })
    }
}

/// Keep the tail of the prompt when it would overflow the window.
fn fit_prompt(tokens: &[u32], budget: usize) -> &[u32] {
    &tokens[tokens.len().saturating_sub(budget)..]
}

impl ChatTemplate {
    fn format(&self, messages: &[Message]) -> String {
        match self {
            Self::TinyLlama => format_tinyllama(messages),
            Self::ChatML => format_chatml(messages),
        }
    }

    fn stop_tokens(&self) -> &'static [&'static str] {
        match self {
            Self::TinyLlama => &["</s>"],
            Self::ChatML => &["<|im_end|>", "<|endoftext|>"],
        }
    }
}

fn format_tinyllama(messages: &[Message]) -> String {
    let mut prompt = String::new();
    for msg in messages {
        prompt.push_str("<|");
        prompt.push_str(msg.role.as_str());
        prompt.push_str("|>\n");
        prompt.push_str(&msg.content);
        prompt.push_str("</s>\n");
    }
    prompt.push_str("<|assistant|>\n");
    prompt
}

fn format_chatml(messages: &[Message]) -> String {
    let mut prompt = String::new();
    for msg in messages {
        prompt.push_str("<|im_start|>");
        prompt.push_str(msg.role.as_str());
        prompt.push('\n');
        prompt.push_str(&msg.content);
        prompt.push_str("<|im_end|>\n");
    }
    prompt.push_str("<|im_start|>assistant\n");
    prompt
}

/// Strip template tokens the decoder let through.
fn clean_output(text: &str) -> String {
    text.trim()
        .trim_end_matches("</s>")
        .trim_end_matches("<|im_end|>")
        .trim_end_matches("<|endoftext|>")
        .trim()
        .to_string()
}

/// Map Candle errors onto the inference taxonomy.
///
/// Shape and narrowing failures inside the attention layers mean the KV cache
/// and the position index disagree.
fn map_candle_err(e: candle_core::Error) -> InferenceError {
    let message = format!("Candle inference error: {e}");
    let lower = message.to_lowercase();
    if lower.contains("narrow")
        || lower.contains("shape mismatch")
        || lower.contains("kv cache")
        || lower.contains("kv-cache")
    {
        InferenceError::decoder_state(message)
    } else {
        InferenceError::generation(message)
    }
}

// ── Tokenizer-backed estimator ─────────────────────────────────────────

/// Exact token counts from the model's own tokenizer.
pub struct TokenizerEstimator {
    tokenizer: Tokenizer,
}

impl TokenizerEstimator {
    pub fn from_file(path: &Path) -> Result<Self, InferenceError> {
        let tokenizer = Tokenizer::from_file(path)
            .map_err(|e| InferenceError::tokenization(format!("Failed to load tokenizer: {e}")))?;
        Ok(Self { tokenizer })
    }
}

impl TokenEstimator for TokenizerEstimator {
    fn estimate(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        match self.tokenizer.encode(text, false) {
            Ok(encoding) => encoding.len(),
            Err(_) => estimate_tokens(text),
        }
    }
}
