//! Scripted collaborators for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tabwise_config::AppConfig;
use tabwise_core::engine::{
    AiResponse, DownloadInfo, DownloadState, FragmentStream, GenerationRequest, InferenceEngine,
    ModelDownloader,
};
use tabwise_core::environment::{
    ContextProvider, HardwareDescriptor, MemoryStatus, PageContext, PressureLevel,
    PrivacyManager, ResourceTelemetry, RuntimeProfile,
};
use tabwise_core::error::{Error, InferenceError, Result};
use tokio::sync::mpsc;

use crate::assistant::{Assistant, Collaborators};
use crate::state::StatePublisher;

/// Ordered record of collaborator calls, shared between mocks.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: &str) {
        self.0.lock().unwrap().push(entry.to_string());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

// ── Engine ─────────────────────────────────────────────────────────────

pub enum StreamStep {
    Fragment(String),
    Fail(InferenceError),
    Delay(Duration),
}

/// An engine whose every answer is queued up by the test.
pub struct ScriptedEngine {
    log: CallLog,
    ready: AtomicBool,
    prepare_delay: Mutex<Duration>,
    init_error: Mutex<Option<InferenceError>>,
    responses: Mutex<VecDeque<std::result::Result<String, InferenceError>>>,
    streams: Mutex<VecDeque<Vec<StreamStep>>>,
    stream_error: Mutex<Option<InferenceError>>,
    raw: Mutex<VecDeque<std::result::Result<String, InferenceError>>>,
    requests: Mutex<Vec<GenerationRequest>>,
    raw_prompts: Mutex<Vec<(String, u32)>>,
    resets: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::with_log(CallLog::default())
    }

    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            ready: AtomicBool::new(true),
            prepare_delay: Mutex::new(Duration::ZERO),
            init_error: Mutex::new(None),
            responses: Mutex::new(VecDeque::new()),
            streams: Mutex::new(VecDeque::new()),
            stream_error: Mutex::new(None),
            raw: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            raw_prompts: Mutex::new(Vec::new()),
            resets: AtomicUsize::new(0),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn set_prepare_delay(&self, delay: Duration) {
        *self.prepare_delay.lock().unwrap() = delay;
    }

    pub fn fail_initialize(&self, error: InferenceError) {
        *self.init_error.lock().unwrap() = Some(error);
    }

    pub fn push_response(&self, response: std::result::Result<String, InferenceError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn push_stream(&self, steps: Vec<StreamStep>) {
        self.streams.lock().unwrap().push_back(steps);
    }

    pub fn fail_next_stream(&self, error: InferenceError) {
        *self.stream_error.lock().unwrap() = Some(error);
    }

    pub fn push_raw(&self, output: std::result::Result<String, InferenceError>) {
        self.raw.lock().unwrap().push_back(output);
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn raw_prompts(&self) -> Vec<(String, u32)> {
        self.raw_prompts.lock().unwrap().clone()
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn is_ready(&self) -> bool {
        self.log.push("engine:is_ready");
        self.ready.load(Ordering::SeqCst)
    }

    fn download_info(&self) -> DownloadInfo {
        DownloadInfo {
            size_bytes: 400_000_000,
        }
    }

    async fn prepare_runtime(&self) -> std::result::Result<(), InferenceError> {
        self.log.push("framework:start");
        let delay = *self.prepare_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.log.push("framework:end");
        Ok(())
    }

    async fn initialize(&self) -> std::result::Result<(), InferenceError> {
        self.log.push("engine:initialize");
        match self.init_error.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> std::result::Result<AiResponse, InferenceError> {
        self.requests.lock().unwrap().push(request);
        let next = self.responses.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Err(InferenceError::generation("no scripted response")))
            .map(AiResponse::text)
    }

    async fn generate_streaming(
        &self,
        request: GenerationRequest,
    ) -> std::result::Result<FragmentStream, InferenceError> {
        self.requests.lock().unwrap().push(request);
        if let Some(e) = self.stream_error.lock().unwrap().take() {
            return Err(e);
        }
        let steps = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| InferenceError::generation("no scripted stream"))?;

        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            for step in steps {
                match step {
                    StreamStep::Fragment(text) => {
                        if tx.send(Ok(text)).await.is_err() {
                            return;
                        }
                    }
                    StreamStep::Fail(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                    StreamStep::Delay(d) => tokio::time::sleep(d).await,
                }
            }
        });
        Ok(rx)
    }

    async fn reset_conversation_state(&self) {
        self.log.push("engine:reset");
        self.resets.fetch_add(1, Ordering::SeqCst);
    }

    async fn raw_generate(
        &self,
        prompt: &str,
        max_tokens: u32,
    ) -> std::result::Result<String, InferenceError> {
        self.raw_prompts
            .lock()
            .unwrap()
            .push((prompt.to_string(), max_tokens));
        let next = self.raw.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Err(InferenceError::generation("no scripted raw output")))
    }
}

// ── Downloader ─────────────────────────────────────────────────────────

/// Replays a list of progress states; the last one repeats.
pub struct MockDownloader {
    log: CallLog,
    script: Mutex<VecDeque<DownloadState>>,
    polls: AtomicUsize,
    on_complete: Mutex<Option<Arc<ScriptedEngine>>>,
}

impl MockDownloader {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            script: Mutex::new(VecDeque::from([DownloadState::Completed])),
            polls: AtomicUsize::new(0),
            on_complete: Mutex::new(None),
        }
    }

    pub fn script(&self, states: Vec<DownloadState>) {
        *self.script.lock().unwrap() = states.into();
    }

    /// Make the engine report ready once the download completes.
    pub fn mark_ready_on_complete(&self, engine: Arc<ScriptedEngine>) {
        *self.on_complete.lock().unwrap() = Some(engine);
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelDownloader for MockDownloader {
    async fn start_download(&self) -> std::result::Result<(), InferenceError> {
        self.log.push("download:start");
        Ok(())
    }

    async fn progress(&self) -> DownloadState {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let state = {
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap_or(DownloadState::Idle)
            }
        };
        if state == DownloadState::Completed
            && let Some(engine) = self.on_complete.lock().unwrap().as_ref()
        {
            engine.set_ready(true);
        }
        state
    }
}

// ── Environment ────────────────────────────────────────────────────────

pub struct MockPrivacy {
    log: CallLog,
    delay: Mutex<Duration>,
    failing: AtomicBool,
}

impl MockPrivacy {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            delay: Mutex::new(Duration::ZERO),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl PrivacyManager for MockPrivacy {
    async fn initialize(&self) -> Result<()> {
        self.log.push("privacy:start");
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.log.push("privacy:end");
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Internal("privacy store unavailable".into()));
        }
        Ok(())
    }
}

pub struct MockTelemetry {
    safe: AtomicBool,
    status: Mutex<MemoryStatus>,
}

impl MockTelemetry {
    pub fn safe() -> Self {
        Self {
            safe: AtomicBool::new(true),
            status: Mutex::new(MemoryStatus {
                pressure_level: PressureLevel::Normal,
                available_gb: 8.0,
                total_gb: 16.0,
            }),
        }
    }

    pub fn pressured(level: PressureLevel, available_gb: f64) -> Self {
        let telemetry = Self::safe();
        telemetry.set_safe(false);
        telemetry.set_status(level, available_gb);
        telemetry
    }

    pub fn set_safe(&self, safe: bool) {
        self.safe.store(safe, Ordering::SeqCst);
    }

    pub fn set_status(&self, level: PressureLevel, available_gb: f64) {
        let mut status = self.status.lock().unwrap();
        status.pressure_level = level;
        status.available_gb = available_gb;
    }
}

impl ResourceTelemetry for MockTelemetry {
    fn is_safe_to_run(&self) -> bool {
        self.safe.load(Ordering::SeqCst)
    }

    fn current_status(&self) -> MemoryStatus {
        *self.status.lock().unwrap()
    }
}

pub struct MockHardware {
    supports: bool,
    total_gb: f64,
}

impl MockHardware {
    pub fn new(supports: bool, total_gb: f64) -> Self {
        Self { supports, total_gb }
    }
}

impl HardwareDescriptor for MockHardware {
    fn supports_profile(&self, _profile: RuntimeProfile) -> bool {
        self.supports
    }

    fn total_memory_gb(&self) -> f64 {
        self.total_gb
    }
}

pub struct StaticPages(Option<PageContext>);

impl StaticPages {
    pub fn page(title: &str, text: &str) -> Self {
        Self(Some(PageContext {
            title: title.into(),
            url: None,
            text: text.into(),
        }))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

#[async_trait]
impl ContextProvider for StaticPages {
    async fn extract_current_page_context(&self) -> Option<PageContext> {
        self.0.clone()
    }
}

// ── Harness ────────────────────────────────────────────────────────────

/// One of every collaborator, sharing a call log.
pub struct Harness {
    pub log: CallLog,
    pub engine: Arc<ScriptedEngine>,
    pub downloader: Arc<MockDownloader>,
    pub privacy: Arc<MockPrivacy>,
    pub telemetry: Arc<MockTelemetry>,
    pub hardware: Arc<MockHardware>,
    pub pages: Arc<StaticPages>,
    pub state: Arc<StatePublisher>,
    pub config: AppConfig,
}

impl Harness {
    pub fn new() -> Self {
        let log = CallLog::default();
        Self {
            engine: Arc::new(ScriptedEngine::with_log(log.clone())),
            downloader: Arc::new(MockDownloader::new(log.clone())),
            privacy: Arc::new(MockPrivacy::new(log.clone())),
            telemetry: Arc::new(MockTelemetry::safe()),
            hardware: Arc::new(MockHardware::new(true, 16.0)),
            pages: Arc::new(StaticPages::page(
                "Rust Blog",
                "Rust 1.88 stabilizes let chains.",
            )),
            state: Arc::new(StatePublisher::new()),
            config: AppConfig::default(),
            log,
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            engine: self.engine.clone(),
            downloader: self.downloader.clone(),
            privacy: self.privacy.clone(),
            telemetry: self.telemetry.clone(),
            hardware: self.hardware.clone(),
            pages: self.pages.clone(),
        }
    }

    /// An assistant wired to these mocks. It owns its own state publisher.
    pub fn assistant(&self) -> Assistant {
        Assistant::new(&self.config, self.collaborators())
    }
}
