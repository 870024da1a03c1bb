//! The assistant coordinator.
//!
//! Owns the conversation and the observable state, and exposes the query,
//! streaming, and summary pipelines. Every pipeline call:
//!
//! 1. requires a fully initialized runtime,
//! 2. passes the resource gate,
//! 3. holds the conversation lock for its whole duration,
//! 4. routes failures through error recovery before returning them.

use std::sync::Arc;

use tabwise_config::AppConfig;
use tabwise_core::engine::{AiResponse, GenerationRequest, InferenceEngine, ModelDownloader};
use tabwise_core::environment::{
    ContextProvider, HardwareDescriptor, PrivacyManager, ResourceTelemetry,
};
use tabwise_core::error::{Error, Result};
use tabwise_core::event::AssistantEvent;
use tabwise_core::message::{Message, MessageId};
use tabwise_core::state::{ActivityState, AssistantState, AssistantStatus, RuntimeReadiness};
use tabwise_memory::{ConversationLimits, ConversationStore, HeuristicEstimator, TokenEstimator};
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tracing::{debug, info};

use crate::context::ContextBuilder;
use crate::gate::ResourceGate;
use crate::init::InitializationSequencer;
use crate::recovery::ErrorRecovery;
use crate::state::{ActivityGuard, StatePublisher};
use crate::streaming::{ResponseStream, STREAM_BUFFER, StreamTask};
use crate::summarize::Summarizer;

/// Everything the assistant talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub engine: Arc<dyn InferenceEngine>,
    pub downloader: Arc<dyn ModelDownloader>,
    pub privacy: Arc<dyn PrivacyManager>,
    pub telemetry: Arc<dyn ResourceTelemetry>,
    pub hardware: Arc<dyn HardwareDescriptor>,
    pub pages: Arc<dyn ContextProvider>,
}

pub struct Assistant {
    engine: Arc<dyn InferenceEngine>,
    store: Arc<Mutex<ConversationStore>>,
    state: Arc<StatePublisher>,
    gate: ResourceGate,
    sequencer: InitializationSequencer,
    recovery: ErrorRecovery,
    context: ContextBuilder,
    summarizer: Summarizer,
    history_window: usize,
}

impl Assistant {
    pub fn new(config: &AppConfig, collaborators: Collaborators) -> Self {
        Self::with_estimator(config, collaborators, Arc::new(HeuristicEstimator))
    }

    /// Budget the conversation with a specific token estimator.
    pub fn with_estimator(
        config: &AppConfig,
        collaborators: Collaborators,
        estimator: Arc<dyn TokenEstimator>,
    ) -> Self {
        let Collaborators {
            engine,
            downloader,
            privacy,
            telemetry,
            hardware,
            pages,
        } = collaborators;

        let state = Arc::new(StatePublisher::new());
        let store = ConversationStore::with_estimator(
            ConversationLimits::from(&config.conversation),
            estimator,
        );

        Self {
            sequencer: InitializationSequencer::new(
                engine.clone(),
                downloader,
                privacy,
                hardware,
                state.clone(),
                &config.runtime,
            ),
            recovery: ErrorRecovery::new(engine.clone(), state.clone()),
            gate: ResourceGate::new(telemetry),
            context: ContextBuilder::new(
                pages,
                config.conversation.max_context_chars,
                config.conversation.history_window,
            ),
            summarizer: Summarizer::new(engine.clone(), config.summary.clone()),
            history_window: config.conversation.history_window,
            store: Arc::new(Mutex::new(store)),
            engine,
            state,
        }
    }

    /// Bring the runtime online. See [`InitializationSequencer::initialize`].
    pub async fn initialize(&self) -> Result<RuntimeReadiness> {
        self.sequencer.initialize().await
    }

    /// Answer a query with a complete response.
    pub async fn process_query(
        &self,
        query: &str,
        include_context: bool,
        include_history: bool,
    ) -> Result<AiResponse> {
        self.ensure_initialized()?;
        self.gate.check_safe_to_run()?;

        let mut store = self.store.lock().await;
        let _activity = ActivityGuard::enter(self.state.clone(), ActivityState::Processing);

        match self
            .answer(&mut store, query, include_context, include_history)
            .await
        {
            Ok(response) => Ok(response),
            Err(e) => {
                self.recovery.on_error(&e, &mut store).await;
                Err(e)
            }
        }
    }

    async fn answer(
        &self,
        store: &mut ConversationStore,
        query: &str,
        include_context: bool,
        include_history: bool,
    ) -> Result<AiResponse> {
        let context = self
            .context
            .build(include_context, include_history, store)
            .await;

        store.add_message(Message::user(query).with_context(context.clone()));
        self.state.set_message_count(store.len());

        let request = GenerationRequest {
            query: query.to_string(),
            context,
            history: store.get_recent(self.history_window),
        };
        let response = self.engine.generate(request).await?;

        store.add_message(
            Message::assistant(response.text.clone()).with_metadata(response.metadata.clone()),
        );
        self.state.set_message_count(store.len());
        info!(
            session_id = %store.session_id(),
            chars = response.text.len(),
            "Query answered"
        );
        Ok(response)
    }

    /// Answer a query as a stream of text fragments.
    ///
    /// The user message and an empty assistant placeholder are stored before
    /// this returns; the placeholder receives the full text (or an apology)
    /// when the stream ends.
    ///
    /// The stream holds the conversation until it is read to the end or
    /// dropped. Activity stays `Streaming` until every fragment has been
    /// received. Other calls that need the conversation (`process_query`,
    /// `clear_conversation`, `reset_conversation_state`) wait for it, so a
    /// caller must drain or drop the stream before awaiting them on the same
    /// task.
    pub async fn process_streaming_query(
        &self,
        query: &str,
        include_context: bool,
        include_history: bool,
    ) -> Result<ResponseStream> {
        self.ensure_initialized()?;
        self.gate.check_safe_to_run()?;

        let mut store = self.store.clone().lock_owned().await;

        let context = self
            .context
            .build(include_context, include_history, &store)
            .await;
        store.add_message(Message::user(query).with_context(context.clone()));
        let message_id = store.add_message(Message::placeholder());
        self.state.set_message_count(store.len());
        self.state
            .set_activity(ActivityState::Streaming(message_id.clone()));

        let request = GenerationRequest {
            query: query.to_string(),
            context,
            history: history_without(&store, self.history_window, &message_id),
        };

        let mut task = StreamTask {
            store,
            message_id,
            state: self.state.clone(),
            recovery: self.recovery.clone(),
        };

        let fragments = match self.engine.generate_streaming(request).await {
            Ok(fragments) => fragments,
            Err(e) => {
                let error = Error::from(e);
                task.fail(&error).await;
                return Err(error);
            }
        };

        debug!(message_id = %task.message_id, "Streaming response started");
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(task.run(fragments, tx));
        Ok(rx)
    }

    /// TL;DR of the given page text. Never touches the conversation.
    pub async fn summarize_page(&self, title: &str, text: &str) -> Result<String> {
        self.ensure_initialized()?;
        if !self.state.activity().is_idle() {
            return Err(Error::Busy);
        }
        self.gate.check_safe_to_run()?;
        if text.trim().is_empty() {
            return Err(Error::ContextProcessingFailed(
                "the page has no text to summarize".into(),
            ));
        }

        let Ok(mut store) = self.store.try_lock() else {
            return Err(Error::Busy);
        };
        let _activity = ActivityGuard::enter(self.state.clone(), ActivityState::Processing);

        match self.summarizer.summarize(title, text).await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                let error = Error::from(e);
                self.recovery.on_error(&error, &mut store).await;
                Err(error)
            }
        }
    }

    /// Summarize whatever page the context provider reports.
    pub async fn summarize_current_page(&self) -> Result<String> {
        let page = self
            .context
            .pages()
            .extract_current_page_context()
            .await
            .ok_or_else(|| Error::ContextProcessingFailed("no page is open".into()))?;
        self.summarize_page(&page.title, &page.text).await
    }

    /// Drop the conversation and start a new session.
    pub async fn clear_conversation(&self) {
        let mut store = self.store.lock().await;
        let session_id = store.clear();
        self.state.conversation_reset(session_id.clone());
        info!(session_id = %session_id, "Conversation cleared");
    }

    /// Clear the conversation and reload the engine's decode state.
    pub async fn reset_conversation_state(&self) {
        let mut store = self.store.lock().await;
        self.recovery.reset(&mut store).await;
    }

    /// Tear the runtime down; `initialize` must run again before queries.
    pub async fn shutdown(&self) {
        self.sequencer.shutdown().await;
    }

    pub fn get_status(&self) -> AssistantStatus {
        self.state.snapshot().status()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<AssistantState> {
        self.state.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<Arc<AssistantEvent>> {
        self.state.subscribe_events()
    }

    /// The last `limit` stored messages, oldest first.
    pub async fn recent_messages(&self, limit: usize) -> Vec<Message> {
        self.store.lock().await.get_recent(limit)
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.state.readiness().is_initialized() {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }
}

/// Recent history for the engine, minus the placeholder being streamed into.
fn history_without(store: &ConversationStore, limit: usize, skip: &MessageId) -> Vec<Message> {
    let mut history: Vec<Message> = store
        .get_recent(limit + 1)
        .into_iter()
        .filter(|m| &m.id != skip)
        .collect();
    if history.len() > limit {
        history.remove(0);
    }
    history
}
