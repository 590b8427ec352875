//! Incremental detection of an artifact block inside a growing response.
//!
//! The parser is fed the cumulative text after every delta and always
//! re-scans from the offset where the block was first seen, so fences and
//! closing tags may straddle chunk boundaries freely. It produces at most one
//! artifact per stream and never rewinds.

use std::time::{Duration, Instant};

use regex::Regex;
use tracing::debug;

use crate::fence;
use crate::models::ArtifactKind;

/// Parser lifecycle for one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParserPhase {
    NotStarted,
    /// Block detected at `offset`, not yet closed.
    Started { offset: usize },
    /// Block closed; `end` is where trailing prose begins.
    Completed { offset: usize, end: usize },
}

/// What the preview surface should show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderSnapshot {
    pub kind: ArtifactKind,
    /// Payload text to render. For partial SVG this carries synthesized
    /// closing tags and must never be persisted.
    pub source: String,
    /// Whether the block is still being generated.
    pub partial: bool,
}

/// Transitions reported by [`ArtifactStreamParser::feed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParserEvent {
    /// The block opened; `lead_in` is the prose before it.
    Started { lead_in: String },
    /// A refreshed best-effort render of the unfinished block.
    Preview(RenderSnapshot),
    /// The block closed. Emitted exactly once and never throttled.
    Completed(RenderSnapshot),
}

#[derive(Debug, Clone)]
pub struct ArtifactStreamParser {
    kind: ArtifactKind,
    start_pattern: Regex,
    throttle: Duration,
    phase: ParserPhase,
    last_render_at: Option<Instant>,
    last_preview: Option<String>,
}

enum Scan {
    Open(Option<String>),
    Closed { end: usize, source: String },
}

impl ArtifactStreamParser {
    pub fn new(kind: ArtifactKind, start_pattern: Regex, throttle: Duration) -> Self {
        Self {
            kind,
            start_pattern,
            throttle,
            phase: ParserPhase::NotStarted,
            last_render_at: None,
            last_preview: None,
        }
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn phase(&self) -> &ParserPhase {
        &self.phase
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.phase, ParserPhase::Completed { .. })
    }

    /// Advance with the cumulative `text` observed at `now`.
    pub fn feed(&mut self, text: &str, now: Instant) -> Vec<ParserEvent> {
        let mut events = Vec::new();

        let offset = match self.phase {
            ParserPhase::Completed { .. } => return events,
            ParserPhase::Started { offset } => offset,
            ParserPhase::NotStarted => {
                let Some(found) = self.start_pattern.find(text) else {
                    return events;
                };
                let offset = found.start();
                debug!(kind = %self.kind, offset, "artifact block started");
                self.phase = ParserPhase::Started { offset };
                events.push(ParserEvent::Started {
                    lead_in: text[..offset].trim_end().to_string(),
                });
                offset
            }
        };

        match self.scan(&text[offset..]) {
            Scan::Closed { end, source } => {
                debug!(kind = %self.kind, len = source.len(), "artifact block completed");
                self.phase = ParserPhase::Completed {
                    offset,
                    end: offset + end,
                };
                self.last_render_at = Some(now);
                events.push(ParserEvent::Completed(RenderSnapshot {
                    kind: self.kind,
                    source,
                    partial: false,
                }));
            }
            Scan::Open(Some(source)) if self.should_preview(&source, now) => {
                self.last_render_at = Some(now);
                self.last_preview = Some(source.clone());
                events.push(ParserEvent::Preview(RenderSnapshot {
                    kind: self.kind,
                    source,
                    partial: true,
                }));
            }
            Scan::Open(_) => {}
        }

        events
    }

    fn should_preview(&self, source: &str, now: Instant) -> bool {
        if source.is_empty() || self.last_preview.as_deref() == Some(source) {
            return false;
        }
        self.last_render_at
            .is_none_or(|last| now.saturating_duration_since(last) >= self.throttle)
    }

    /// Examine the text from the block start onwards.
    fn scan(&self, segment: &str) -> Scan {
        let body_start = if segment.starts_with(fence::FENCE) {
            fence::parse_open(segment, 0).2
        } else {
            0
        };
        let body = &segment[body_start..];

        match self.kind {
            ArtifactKind::Svg => {
                let scan = fence::svg_scan(body);
                match scan.end {
                    Some(end) => Scan::Closed {
                        end: body_start + end,
                        source: body[..end].to_string(),
                    },
                    None => Scan::Open(preview_svg(body)),
                }
            }
            ArtifactKind::Mermaid | ArtifactKind::EchartsOption | ArtifactKind::Html => {
                match fence::find_close(segment, body_start) {
                    Some(close) => Scan::Closed {
                        end: close + fence::FENCE.len(),
                        source: segment[body_start..close].trim().to_string(),
                    },
                    None if self.kind.previews_partially() => {
                        let partial = fence::strip_partial_fence(body);
                        Scan::Open((!partial.is_empty()).then(|| partial.to_string()))
                    }
                    None => Scan::Open(None),
                }
            }
        }
    }

    /// Prose outside the block: the lead-in, plus trailing text once the
    /// block has closed.
    pub fn visible_prose(&self, text: &str) -> String {
        match self.phase {
            ParserPhase::NotStarted => text.to_string(),
            ParserPhase::Started { offset } => text[..offset].trim_end().to_string(),
            ParserPhase::Completed { offset, end } => {
                let lead_in = text[..offset].trim_end();
                // An SVG block completes at its closing tag, before the fence.
                let trailing = text
                    .get(end..)
                    .unwrap_or_default()
                    .trim()
                    .trim_start_matches('`')
                    .trim();
                match (lead_in.is_empty(), trailing.is_empty()) {
                    (_, true) => lead_in.to_string(),
                    (true, false) => trailing.to_string(),
                    (false, false) => format!("{lead_in}\n\n{trailing}"),
                }
            }
        }
    }
}

/// Close an unfinished SVG so a renderer can show what exists so far.
fn preview_svg(body: &str) -> Option<String> {
    let cut = &body[..=body.rfind('>')?];
    let depth = fence::svg_scan(cut).depth;
    if depth == 0 {
        return None;
    }
    let mut preview = cut.to_string();
    for _ in 0..depth {
        preview.push_str("</svg>");
    }
    Some(preview)
}

#[cfg(test)]
#[path = "stream_parser_tests.rs"]
mod tests;
