//! Authoritative, non-streaming parsers for complete model responses.
//!
//! One parser per artifact kind. Each locates the first well-formed payload
//! and splits the remaining text into the prose before and after it. When no
//! payload is found the whole trimmed text becomes `before_text`.

use serde_json::Value;
use tracing::debug;

use crate::fence::{self, Block};
use crate::models::{ArtifactKind, ArtifactPayload};

const SVG_TAGS: &[&str] = &["", "svg", "xml"];
const MERMAID_TAGS: &[&str] = &["mermaid"];
const ECHARTS_TAGS: &[&str] = &["", "json", "js", "javascript", "echarts", "option"];
const HTML_TAGS: &[&str] = &["", "html", "htm"];
const HTML_FENCE_TAGS: &[&str] = &["html", "htm"];

/// A response split around its artifact payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub payload: Option<ArtifactPayload>,
    pub before_text: String,
    pub after_text: String,
}

impl ParsedResponse {
    fn plain(text: &str) -> Self {
        Self {
            payload: None,
            before_text: text.trim().to_string(),
            after_text: String::new(),
        }
    }
}

/// Located payload and the span of text it replaces.
struct Extracted {
    start: usize,
    end: usize,
    payload: ArtifactPayload,
}

/// Parse a complete response for an artifact of `kind`.
pub fn parse_response(kind: ArtifactKind, text: &str) -> ParsedResponse {
    let extracted = match kind {
        ArtifactKind::Svg => extract_svg(text),
        ArtifactKind::Mermaid => extract_mermaid(text),
        ArtifactKind::EchartsOption => extract_echarts(text),
        ArtifactKind::Html => extract_html(text),
    };

    let Some(Extracted {
        start,
        end,
        payload,
    }) = extracted
    else {
        return ParsedResponse::plain(text);
    };

    let mut before_text = text[..start].trim().to_string();
    let mut after_text = text[end..].trim().to_string();
    if kind == ArtifactKind::Html {
        before_text = strip_fence_residue(&before_text);
        after_text = strip_fence_residue(&after_text);
    }

    ParsedResponse {
        payload: Some(payload),
        before_text,
        after_text,
    }
}

fn extract_svg(text: &str) -> Option<Extracted> {
    fence::blocks(text)
        .into_iter()
        .filter(|block| block.tag_is(SVG_TAGS))
        .find_map(|block| {
            let body = block.body(text);
            if !starts_with_ignore_case(body, "<svg") {
                return None;
            }
            let end = fence::svg_scan(body).end?;
            let region_end = if block.closed {
                block.end
            } else {
                block.body_start + end
            };
            Some(Extracted {
                start: block.start,
                end: region_end,
                payload: ArtifactPayload::Svg {
                    content: body[..end].to_string(),
                },
            })
        })
}

fn extract_mermaid(text: &str) -> Option<Extracted> {
    let block = first_closed(text, MERMAID_TAGS)?;
    let code = block.body(text).trim();
    if code.is_empty() {
        return None;
    }
    Some(Extracted {
        start: block.start,
        end: block.end,
        payload: ArtifactPayload::Mermaid {
            code: code.to_string(),
            rendered_svg: None,
        },
    })
}

fn extract_echarts(text: &str) -> Option<Extracted> {
    fence::blocks(text)
        .into_iter()
        .filter(|block| block.closed && block.tag_is(ECHARTS_TAGS))
        .find_map(|block| {
            let (option, source) = parse_option(block.body(text))?;
            Some(Extracted {
                start: block.start,
                end: block.end,
                payload: ArtifactPayload::EchartsOption {
                    option,
                    option_text: source,
                },
            })
        })
}

/// Parse chart option text as a JSON object.
///
/// Accepts an `option = {...};` style assignment around the object. Strict
/// JSON is tried first, then JSON5 for object-literal syntax (unquoted keys,
/// single quotes, trailing commas). Nothing is evaluated. Returns the parsed
/// object and the object text it came from.
pub fn parse_option(text: &str) -> Option<(Value, String)> {
    let mut source = text.trim();
    if !source.starts_with('{') {
        let brace = source.find('{')?;
        let assignment = &source[..brace];
        if !assignment.trim_end().ends_with('=') {
            return None;
        }
        source = &source[brace..];
    }
    let source = source.trim_end().trim_end_matches(';').trim_end();
    let option: Value = match serde_json::from_str(source) {
        Ok(option) => option,
        Err(_) => json5::from_str(source)
            .map_err(|err| debug!("Option text is not JSON5 either: {err}"))
            .ok()?,
    };
    option.is_object().then(|| (option, source.to_string()))
}

fn extract_html(text: &str) -> Option<Extracted> {
    let blocks = fence::blocks(text);

    let closed = blocks.iter().find(|block| {
        block.closed && block.tag_is(HTML_TAGS) && !block.body(text).trim().is_empty()
    });
    if let Some(block) = closed {
        return Some(Extracted {
            start: block.start,
            end: block.end,
            payload: ArtifactPayload::Html {
                content: block.body(text).trim().to_string(),
            },
        });
    }

    let unclosed = blocks
        .iter()
        .find(|block| !block.closed && block.tag_is(HTML_FENCE_TAGS));
    if let Some(block) = unclosed {
        let content = fence::strip_partial_fence(block.body(text)).trim();
        if !content.is_empty() {
            return Some(Extracted {
                start: block.start,
                end: text.len(),
                payload: ArtifactPayload::Html {
                    content: content.to_string(),
                },
            });
        }
    }

    let start = find_document_start(text)?;
    let content = fence::strip_partial_fence(&text[start..]).trim();
    Some(Extracted {
        start,
        end: text.len(),
        payload: ArtifactPayload::Html {
            content: content.to_string(),
        },
    })
}

fn find_document_start(text: &str) -> Option<usize> {
    let lower = text.to_ascii_lowercase();
    ["<!doctype", "<html", "<body"]
        .iter()
        .filter_map(|marker| lower.find(marker))
        .min()
}

fn first_closed<'a>(text: &'a str, tags: &[&str]) -> Option<Block<'a>> {
    fence::blocks(text)
        .into_iter()
        .find(|block| block.closed && block.tag_is(tags))
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

/// Remove empty fenced blocks and stray fence lines left around a page.
fn strip_fence_residue(text: &str) -> String {
    let mut kept = String::with_capacity(text.len());
    let mut pos = 0;
    for block in fence::blocks(text) {
        if block.body(text).trim().is_empty() {
            kept.push_str(&text[pos..block.start]);
            pos = block.end;
        }
    }
    kept.push_str(&text[pos..]);

    kept.lines()
        .filter(|line| {
            let line = line.trim();
            !(line.starts_with(fence::FENCE)
                && line
                    .trim_start_matches('`')
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric()))
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
#[path = "parse_tests.rs"]
mod tests;
