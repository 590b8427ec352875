//! Scanning of triple-backtick fenced blocks and SVG element balance.
//!
//! Offsets are byte offsets into the scanned text. Every marker looked for is
//! ASCII, so offsets found in an ASCII-lowercased copy are valid in the
//! original.

pub(crate) const FENCE: &str = "```";

/// One fenced block, located pairwise: an opener and the next fence after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Block<'a> {
    /// Offset of the opening fence.
    pub start: usize,
    /// Language tag following the opener, possibly empty.
    pub tag: &'a str,
    /// First byte of the body, after the tag and any whitespace.
    pub body_start: usize,
    /// End of the body: the closing fence, or the end of text when unclosed.
    pub body_end: usize,
    /// End of the whole block including the closing fence.
    pub end: usize,
    pub closed: bool,
}

impl<'a> Block<'a> {
    pub fn body(&self, text: &'a str) -> &'a str {
        &text[self.body_start..self.body_end]
    }

    pub fn tag_is(&self, accepted: &[&str]) -> bool {
        accepted.iter().any(|tag| self.tag.eq_ignore_ascii_case(tag))
    }
}

/// Parse the opener at `at`, which must point at a fence.
///
/// Returns the start and end of the tag, then the start of the body.
pub(crate) fn parse_open(text: &str, at: usize) -> (usize, usize, usize) {
    let bytes = text.as_bytes();
    let mut pos = (at + FENCE.len()).min(bytes.len());
    while pos < bytes.len() && matches!(bytes[pos], b' ' | b'\t') {
        pos += 1;
    }
    let tag_start = pos;
    while pos < bytes.len() && is_tag_byte(bytes[pos]) {
        pos += 1;
    }
    let tag_end = pos;
    while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    (tag_start, tag_end, pos)
}

fn is_tag_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'+' | b'.' | b'-')
}

/// Offset of the next fence at or after `from`.
pub(crate) fn find_close(text: &str, from: usize) -> Option<usize> {
    text.get(from..)?.find(FENCE).map(|i| from + i)
}

/// Every fenced block in `text`, in order. A trailing opener without a
/// closing fence yields one unclosed block running to the end.
pub(crate) fn blocks(text: &str) -> Vec<Block<'_>> {
    let mut found = Vec::new();
    let mut pos = 0;
    while let Some(start) = find_close(text, pos) {
        let (tag_start, tag_end, body_start) = parse_open(text, start);
        let tag = &text[tag_start..tag_end];
        if let Some(close) = find_close(text, body_start) {
            let end = close + FENCE.len();
            found.push(Block {
                start,
                tag,
                body_start,
                body_end: close,
                end,
                closed: true,
            });
            pos = end;
        } else {
            found.push(Block {
                start,
                tag,
                body_start,
                body_end: text.len(),
                end: text.len(),
                closed: false,
            });
            break;
        }
    }
    found
}

/// Result of balancing `<svg` against `</svg>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SvgScan {
    /// Offset just past the tag closing the first `<svg` element.
    pub end: Option<usize>,
    /// Elements still open when the text ran out.
    pub depth: usize,
}

pub(crate) fn svg_scan(text: &str) -> SvgScan {
    let lower = text.to_ascii_lowercase();
    let mut depth = 0usize;
    let mut opened = false;
    let mut pos = 0;

    while let Some(rel) = lower.get(pos..).and_then(|rest| rest.find('<')) {
        let at = pos + rel;
        let tail = &lower[at..];

        if tail.starts_with("</svg") && ends_name(&tail[5..]) {
            let Some(close) = tail.find('>') else {
                break;
            };
            depth = depth.saturating_sub(1);
            pos = at + close + 1;
            if opened && depth == 0 {
                return SvgScan {
                    end: Some(pos),
                    depth,
                };
            }
        } else if tail.starts_with("<svg") && ends_name(&tail[4..]) {
            opened = true;
            let Some(close) = tail.find('>') else {
                depth += 1;
                break;
            };
            pos = at + close + 1;
            if tail[..close].ends_with('/') {
                if depth == 0 {
                    return SvgScan {
                        end: Some(pos),
                        depth,
                    };
                }
            } else {
                depth += 1;
            }
        } else {
            pos = at + 1;
        }
    }

    SvgScan { end: None, depth }
}

fn ends_name(rest: &str) -> bool {
    rest.chars()
        .next()
        .is_none_or(|c| c.is_ascii_whitespace() || c == '>' || c == '/')
}

/// Drop a closing fence that has only partly arrived.
pub(crate) fn strip_partial_fence(text: &str) -> &str {
    text.trim_end().trim_end_matches('`').trim_end()
}
