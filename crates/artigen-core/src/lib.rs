//! artigen-core: streaming artifact generation for chat-driven modules
//!
//! This crate holds everything between a streaming chat-completion transport
//! and a preview surface: incremental detection of fenced SVG, Mermaid,
//! ECharts and HTML blocks, per-module conversation and artifact storage, and
//! the history operations (delete, rollback, regenerate) that keep the two
//! consistent.

pub mod artifacts;
pub mod client;
pub mod config;
pub mod conversation;
pub mod error;
pub mod export;
mod fence;
pub mod kv;
pub mod models;
pub mod parse;
pub mod paths;
pub mod reconciler;
pub mod registry;
pub mod session;
pub mod stream_parser;
pub mod studio;

pub use artifacts::{ArtifactStore, UiState};
pub use client::{CompletionClient, CompletionRequest, StreamHandle, StreamSender, TransportEvent};
pub use config::Config;
pub use conversation::ConversationStore;
pub use error::Error;
pub use error::Result;
pub use kv::{Namespace, Storage};
pub use models::{Artifact, ArtifactKind, ArtifactPayload, Message, MessageRole};
pub use reconciler::ConversationReconciler;
pub use registry::{ModuleDescriptor, ModuleRegistry};
pub use session::{PreviewSurface, SessionOutcome, StreamSession};
pub use stream_parser::ArtifactStreamParser;
pub use studio::Studio;

/// Application name used for config directories and paths.
pub const APP_NAME: &str = "artigen";

/// Returns the environment variable prefix for this application.
pub fn env_prefix() -> String {
    "ARTIGEN".to_string()
}
