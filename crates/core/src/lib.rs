//! # Tabwise Core
//!
//! Domain types, collaborator traits, and error definitions for the Tabwise
//! on-device assistant. This crate has **no runtime dependencies** beyond
//! `tokio::sync`: it defines the model that every other crate implements
//! against.
//!
//! ## Design Philosophy
//!
//! Everything the orchestration core talks to (the inference runtime, the
//! model downloader, privacy, hardware and memory telemetry, the current page)
//! is a trait here. Implementations live in `tabwise-providers`, and tests
//! substitute scripted mocks.

pub mod engine;
pub mod environment;
pub mod error;
pub mod event;
pub mod message;
pub mod state;

// Re-export key types at crate root for ergonomics
pub use engine::{
    AiResponse, DownloadInfo, DownloadState, FragmentStream, GenerationRequest, InferenceEngine,
    ModelDownloader,
};
pub use environment::{
    ContextProvider, HardwareDescriptor, MemoryAssessment, MemoryStatus, PageContext, PressureLevel,
    PrivacyManager, ResourceTelemetry, RuntimeProfile,
};
pub use error::{Error, InferenceError, InferenceErrorKind, Result};
pub use event::{AssistantEvent, EventBus};
pub use message::{ConversationId, Message, MessageId, Role};
pub use state::{ActivityState, AssistantState, AssistantStatus, RuntimeReadiness, TypingSignal};
