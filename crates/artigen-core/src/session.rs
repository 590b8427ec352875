//! Per-generation orchestration between a transport and a preview surface.
//!
//! A [`StreamSession`] owns the cumulative text of one generation, feeds it to
//! the module's [`ArtifactStreamParser`] and forwards render snapshots to a
//! [`PreviewSurface`]. However delta, cancel, completion and error events
//! interleave, a session yields exactly one [`SessionOutcome`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::{ChatChunk, CompletionClient, CompletionRequest, TransportEvent};
use crate::models::{ArtifactKind, generate_id};
use crate::registry::ModuleDescriptor;
use crate::stream_parser::{ArtifactStreamParser, ParserEvent, RenderSnapshot};

/// A renderer refused a snapshot. Only ever logged.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct RenderError(pub String);

/// Where a live generation is shown. Every method defaults to doing nothing.
pub trait PreviewSurface {
    /// Replace the live transcript bubble with `text`.
    fn transcript(&mut self, _text: &str) {}

    /// The artifact block opened; show a drawing placeholder.
    fn drawing_started(&mut self, _kind: ArtifactKind, _lead_in: &str) {}

    /// Render a snapshot. May return SVG markup worth keeping, such as a
    /// rendered Mermaid diagram.
    fn render(&mut self, _snapshot: &RenderSnapshot) -> Result<Option<String>, RenderError> {
        Ok(None)
    }

    /// Drop the live transcript bubble without keeping it.
    fn discard_transcript(&mut self) {}

    /// The stream finished; the live bubble is about to be replaced.
    fn end_transcript(&mut self) {}
}

/// Surface that shows nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSurface;

impl PreviewSurface for NullSurface {}

/// Renders computed while streaming, reused at finalize.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamScratch {
    rendered: Option<(String, String)>,
}

impl StreamScratch {
    fn remember(&mut self, source: &str, svg: String) {
        self.rendered = Some((source.to_string(), svg));
    }

    /// The rendering of `source`, if exactly that source was rendered.
    pub fn rendered_svg_for(&self, source: &str) -> Option<&str> {
        self.rendered
            .as_ref()
            .filter(|(rendered_source, _)| rendered_source.trim() == source.trim())
            .map(|(_, svg)| svg.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    /// Waiting for the transport to start.
    Sending,
    Streaming,
    Rendering,
    Finalizing,
    Aborting,
}

/// How a generation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Completed {
        message_id: String,
        full_text: String,
        scratch: StreamScratch,
    },
    /// The user stopped the generation.
    Interrupted {
        message_id: String,
        partial_text: String,
    },
    /// The transport failed.
    Failed {
        message_id: String,
        description: String,
    },
}

#[derive(Debug)]
pub struct StreamSession {
    module: Arc<ModuleDescriptor>,
    message_id: String,
    buffer: String,
    parser: ArtifactStreamParser,
    scratch: StreamScratch,
    phase: SessionPhase,
    finished: bool,
    cancel_requested: bool,
    transport: Option<CancellationToken>,
}

impl StreamSession {
    pub fn new(module: Arc<ModuleDescriptor>, render_throttle: Duration) -> Self {
        let parser =
            ArtifactStreamParser::new(module.kind, module.start_pattern.clone(), render_throttle);
        Self {
            module,
            message_id: generate_id("msg"),
            buffer: String::new(),
            parser,
            scratch: StreamScratch::default(),
            phase: SessionPhase::Idle,
            finished: false,
            cancel_requested: false,
            transport: None,
        }
    }

    pub fn module(&self) -> &Arc<ModuleDescriptor> {
        &self.module
    }

    /// Id the assistant message will be stored under.
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn parser(&self) -> &ArtifactStreamParser {
        &self.parser
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    /// Mark the request as sent; the transport is not ready yet.
    pub fn begin(&mut self) {
        if !self.finished && self.phase == SessionPhase::Idle {
            self.phase = SessionPhase::Sending;
        }
    }

    /// Ask the generation to stop. Before the transport is attached the
    /// request is held and applied on attach.
    pub fn request_cancel(&mut self) {
        if self.finished || self.cancel_requested {
            return;
        }
        self.cancel_requested = true;
        self.phase = SessionPhase::Aborting;
        match &self.transport {
            Some(token) => token.cancel(),
            None => debug!(message_id = %self.message_id, "cancel deferred until transport is ready"),
        }
    }

    /// Attach the running transport's cancellation token.
    pub fn attach_transport(&mut self, token: CancellationToken) {
        if self.cancel_requested {
            token.cancel();
        } else if !self.finished {
            self.phase = SessionPhase::Streaming;
        }
        self.transport = Some(token);
    }

    pub fn on_delta(&mut self, chunk: &ChatChunk, surface: &mut (impl PreviewSurface + ?Sized)) {
        self.on_delta_at(chunk, surface, Instant::now());
    }

    /// Apply one delta observed at `now`.
    pub fn on_delta_at(
        &mut self,
        chunk: &ChatChunk,
        surface: &mut (impl PreviewSurface + ?Sized),
        now: Instant,
    ) {
        if self.finished {
            return;
        }
        let Some(content) = chunk.content() else {
            return;
        };
        self.buffer.push_str(content);
        if matches!(self.phase, SessionPhase::Idle | SessionPhase::Sending) {
            self.phase = SessionPhase::Streaming;
        }

        let events = self.parser.feed(&self.buffer, now);
        surface.transcript(&self.parser.visible_prose(&self.buffer));

        for event in events {
            match event {
                ParserEvent::Started { lead_in } => {
                    surface.drawing_started(self.module.kind, &lead_in);
                }
                ParserEvent::Preview(snapshot) | ParserEvent::Completed(snapshot) => {
                    self.render(&snapshot, surface);
                }
            }
        }
    }

    fn render(&mut self, snapshot: &RenderSnapshot, surface: &mut (impl PreviewSurface + ?Sized)) {
        let resume = self.phase;
        if resume == SessionPhase::Streaming {
            self.phase = SessionPhase::Rendering;
        }
        match surface.render(snapshot) {
            Ok(Some(svg)) => self.scratch.remember(&snapshot.source, svg),
            Ok(None) => {}
            Err(err) => {
                debug!(kind = %snapshot.kind, partial = snapshot.partial, "render failed, keeping last preview: {err}");
            }
        }
        self.phase = resume;
    }

    /// The transport reported the end of the stream.
    pub fn on_complete(
        &mut self,
        aborted: bool,
        surface: &mut (impl PreviewSurface + ?Sized),
    ) -> Option<SessionOutcome> {
        if self.finished {
            return None;
        }
        self.finished = true;

        if aborted || self.cancel_requested {
            self.phase = SessionPhase::Aborting;
            surface.discard_transcript();
            debug!(message_id = %self.message_id, len = self.buffer.len(), "generation interrupted");
            return Some(SessionOutcome::Interrupted {
                message_id: self.message_id.clone(),
                partial_text: std::mem::take(&mut self.buffer),
            });
        }

        self.phase = SessionPhase::Finalizing;
        surface.end_transcript();
        Some(SessionOutcome::Completed {
            message_id: self.message_id.clone(),
            full_text: std::mem::take(&mut self.buffer),
            scratch: std::mem::take(&mut self.scratch),
        })
    }

    /// The transport failed. After a cancel request this still counts as an
    /// interruption.
    pub fn on_error(
        &mut self,
        description: &str,
        surface: &mut (impl PreviewSurface + ?Sized),
    ) -> Option<SessionOutcome> {
        if self.cancel_requested {
            return self.on_complete(true, surface);
        }
        if self.finished {
            return None;
        }
        self.finished = true;
        self.phase = SessionPhase::Aborting;
        surface.discard_transcript();
        debug!(message_id = %self.message_id, "generation failed: {description}");
        Some(SessionOutcome::Failed {
            message_id: self.message_id.clone(),
            description: description.to_string(),
        })
    }

    pub fn handle_event(
        &mut self,
        event: TransportEvent,
        surface: &mut (impl PreviewSurface + ?Sized),
    ) -> Option<SessionOutcome> {
        match event {
            TransportEvent::Delta(chunk) => {
                self.on_delta(&chunk, surface);
                None
            }
            TransportEvent::Complete { aborted } => self.on_complete(aborted, surface),
            TransportEvent::Failed(description) => self.on_error(&description, surface),
        }
    }

    /// Return to idle once the outcome has been applied.
    pub fn settle(&mut self) {
        if self.finished {
            self.phase = SessionPhase::Idle;
        }
    }
}

/// Run one generation to its single outcome.
///
/// `cancel` may fire at any point, including before `client` has started the
/// stream. Returns `None` only if the session had already finished.
pub async fn drive<C, S>(
    client: &C,
    request: CompletionRequest,
    session: &mut StreamSession,
    surface: &mut S,
    cancel: &CancellationToken,
) -> Option<SessionOutcome>
where
    C: CompletionClient + ?Sized,
    S: PreviewSurface + ?Sized,
{
    if session.is_finished() {
        return None;
    }
    session.begin();

    let start = client.start(request);
    tokio::pin!(start);
    let started = loop {
        tokio::select! {
            result = &mut start => break result,
            () = cancel.cancelled(), if !session.cancel_requested() => session.request_cancel(),
        }
    };

    let mut handle = match started {
        Ok(handle) => handle,
        Err(err) => return session.on_error(&err.to_string(), surface),
    };
    session.attach_transport(handle.canceller());

    loop {
        tokio::select! {
            event = handle.next_event() => match event {
                Some(event) => {
                    if let Some(outcome) = session.handle_event(event, surface) {
                        return Some(outcome);
                    }
                }
                None => {
                    let aborted = session.cancel_requested();
                    return session.on_complete(aborted, surface);
                }
            },
            () = cancel.cancelled(), if !session.cancel_requested() => session.request_cancel(),
        }
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
