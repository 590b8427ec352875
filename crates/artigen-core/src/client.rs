//! Contract between a generation and its streaming chat-completion transport.
//!
//! A transport turns a [`CompletionRequest`] into a [`StreamHandle`]: a channel
//! of [`TransportEvent`]s plus a cancellation token. Starting the request may
//! fail on its own (network, auth) before any event is delivered.

use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::models::ContextMessage;

/// One OpenAI-style chat-completion chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChatChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkDelta {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatChunk {
    /// Chunk carrying a single piece of assistant text.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            choices: vec![ChunkChoice {
                delta: ChunkDelta {
                    role: None,
                    content: Some(content.into()),
                },
                finish_reason: None,
            }],
        }
    }

    /// Text of the first choice; absent or empty content yields `None`.
    pub fn content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.delta.content.as_deref())
            .filter(|content| !content.is_empty())
    }
}

/// Sampling options sent with every request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompletionOptions {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            max_tokens: 13000,
            temperature: 0.7,
        }
    }
}

/// Everything a transport needs to start one generation.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub module_id: String,
    /// Selects the system prompt.
    pub prompt_key: String,
    pub user_text: String,
    /// Prior turns, oldest first.
    pub context: Vec<ContextMessage>,
    pub options: CompletionOptions,
}

/// Events delivered by a running transport, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Delta(ChatChunk),
    /// The stream ended, naturally or because it was cancelled.
    Complete { aborted: bool },
    /// The stream broke after it had started.
    Failed(String),
}

/// Consumer side of a started generation.
///
/// The stream's completion signal is its terminal event: `Complete` or
/// `Failed`, after which `next_event` returns `None`. A transport that goes
/// away without a terminal event has finished too; [`StreamHandle::finished`]
/// reports that as a completion.
#[derive(Debug)]
pub struct StreamHandle {
    events: mpsc::UnboundedReceiver<TransportEvent>,
    cancel: CancellationToken,
}

impl StreamHandle {
    /// Ask the transport to stop. Safe to call any number of times.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this stream when triggered.
    pub fn canceller(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Next event, or `None` once the transport has gone away.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    /// Wait for the stream to end, skipping any remaining deltas.
    pub async fn finished(mut self) -> TransportEvent {
        while let Some(event) = self.events.recv().await {
            if !matches!(event, TransportEvent::Delta(_)) {
                return event;
            }
        }
        TransportEvent::Complete {
            aborted: self.cancel.is_cancelled(),
        }
    }
}

/// Producer side of a generation, owned by the transport task.
#[derive(Debug, Clone)]
pub struct StreamSender {
    events: mpsc::UnboundedSender<TransportEvent>,
    cancel: CancellationToken,
}

impl StreamSender {
    /// Forward a chunk. Returns `false` once the consumer is gone.
    pub fn chunk(&self, chunk: ChatChunk) -> bool {
        self.events.send(TransportEvent::Delta(chunk)).is_ok()
    }

    pub fn delta(&self, content: impl Into<String>) -> bool {
        self.chunk(ChatChunk::text(content))
    }

    /// Report the end of the stream. Consumes the sender so it fires once.
    pub fn complete(self, aborted: bool) {
        let _ = self.events.send(TransportEvent::Complete { aborted });
    }

    /// Report a mid-stream failure. Consumes the sender so it fires once.
    pub fn fail(self, description: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Failed(description.into()));
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the consumer asks the stream to stop.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}

/// Create a connected sender/handle pair.
pub fn stream_channel() -> (StreamSender, StreamHandle) {
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    (
        StreamSender {
            events: tx,
            cancel: cancel.clone(),
        },
        StreamHandle { events: rx, cancel },
    )
}

/// A streaming chat-completion backend.
pub trait CompletionClient {
    /// Start a generation. Resolves once the transport is ready to stream.
    fn start(&self, request: CompletionRequest) -> impl Future<Output = Result<StreamHandle>> + Send;
}
