//! Domain models for module conversations and the artifacts they produce.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message roles in a module transcript.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    /// Older histories stored assistant turns as `"ai"`.
    #[serde(alias = "ai")]
    Assistant,
    Error,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Error => write!(f, "error"),
        }
    }
}

/// One turn in a module conversation.
///
/// Messages are never edited after creation; history surgery only removes them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub role: MessageRole,
    /// Text shown in the transcript. For assistant turns this is the prose
    /// around the artifact, not the artifact source.
    pub content: String,
    /// Full model output, used to rebuild prompt context faithfully.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_content: Option<String>,
    /// Weak reference into the module's artifact store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Set when the user stopped the generation.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub interrupted: bool,
}

impl Message {
    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: generate_id("msg"),
            role: MessageRole::User,
            content: content.into(),
            raw_content: None,
            artifact_id: None,
            timestamp: Utc::now(),
            interrupted: false,
        }
    }

    /// Create an assistant message carrying the full model output.
    pub fn assistant(
        id: impl Into<String>,
        content: impl Into<String>,
        raw_content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            role: MessageRole::Assistant,
            content: content.into(),
            raw_content: Some(raw_content.into()),
            artifact_id: None,
            timestamp: Utc::now(),
            interrupted: false,
        }
    }

    /// Create an error message describing a failed generation.
    pub fn error(content: impl Into<String>) -> Self {
        Self {
            id: generate_id("msg"),
            role: MessageRole::Error,
            content: content.into(),
            raw_content: None,
            artifact_id: None,
            timestamp: Utc::now(),
            interrupted: false,
        }
    }

    /// Text to send back to the model for this turn.
    pub fn prompt_text(&self) -> &str {
        self.raw_content.as_deref().unwrap_or(&self.content)
    }

    /// Whether this turn takes part in prompt context.
    pub fn is_conversational(&self) -> bool {
        matches!(self.role, MessageRole::User | MessageRole::Assistant)
    }
}

/// The kinds of visual artifact a module can produce.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ArtifactKind {
    Svg,
    Mermaid,
    #[serde(alias = "echarts-option")]
    EchartsOption,
    Html,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Svg => "svg",
            Self::Mermaid => "mermaid",
            Self::EchartsOption => "echartsOption",
            Self::Html => "html",
        }
    }

    /// Parse from the names used in configuration files.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "svg" => Some(Self::Svg),
            "mermaid" => Some(Self::Mermaid),
            "echarts" | "echarts-option" | "echartsoption" | "echarts_option" => {
                Some(Self::EchartsOption)
            }
            "html" | "htm" => Some(Self::Html),
            _ => None,
        }
    }

    /// Whether a live preview is attempted before the block closes.
    pub fn previews_partially(&self) -> bool {
        !matches!(self, Self::EchartsOption)
    }

    /// Transcript text used when a reply held nothing but the artifact.
    pub fn placeholder_text(&self) -> &'static str {
        match self {
            Self::Svg => "Graphic generated, click to view.",
            Self::Mermaid => "Diagram generated, click to view.",
            Self::EchartsOption => "Chart generated, click to view.",
            Self::Html => "Page generated, click to view.",
        }
    }

    /// Extension used when exporting the artifact source.
    pub fn source_extension(&self) -> &'static str {
        match self {
            Self::Svg => "svg",
            Self::Mermaid => "mmd",
            Self::EchartsOption => "json",
            Self::Html => "html",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific artifact content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ArtifactPayload {
    Svg {
        content: String,
    },
    Mermaid {
        code: String,
        /// Rendering computed while streaming, reused instead of re-rendering.
        #[serde(
            rename = "renderedSvg",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        rendered_svg: Option<String>,
    },
    #[serde(alias = "echarts-option")]
    EchartsOption {
        option: Value,
        #[serde(rename = "optionText")]
        option_text: String,
    },
    Html {
        content: String,
    },
}

impl ArtifactPayload {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Self::Svg { .. } => ArtifactKind::Svg,
            Self::Mermaid { .. } => ArtifactKind::Mermaid,
            Self::EchartsOption { .. } => ArtifactKind::EchartsOption,
            Self::Html { .. } => ArtifactKind::Html,
        }
    }
}

/// A persisted visual produced by exactly one assistant message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub id: String,
    /// Back-reference to the message that produced this artifact.
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: ArtifactPayload,
}

impl Artifact {
    pub fn new(message_id: impl Into<String>, payload: ArtifactPayload) -> Self {
        let prefix = match payload.kind() {
            ArtifactKind::Svg => "svg",
            ArtifactKind::Mermaid => "diagram",
            ArtifactKind::EchartsOption => "chart",
            ArtifactKind::Html => "page",
        };
        Self {
            id: generate_id(prefix),
            message_id: message_id.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn kind(&self) -> ArtifactKind {
        self.payload.kind()
    }

    /// Source text of the artifact, as a user would view or copy it.
    pub fn source_text(&self) -> &str {
        match &self.payload {
            ArtifactPayload::Svg { content } | ArtifactPayload::Html { content } => content,
            ArtifactPayload::Mermaid { code, .. } => code,
            ArtifactPayload::EchartsOption { option_text, .. } => option_text,
        }
    }

    /// SVG markup for the artifact, if one exists.
    pub fn svg_markup(&self) -> Option<&str> {
        match &self.payload {
            ArtifactPayload::Svg { content } => Some(content),
            ArtifactPayload::Mermaid { rendered_svg, .. } => rendered_svg.as_deref(),
            _ => None,
        }
    }
}

/// Roles understood by chat-completion backends.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A prior turn reduced to what the model needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ContextMessage {
    /// Reduce a transcript message; non-conversational turns yield `None`.
    pub fn from_message(message: &Message) -> Option<Self> {
        let role = match message.role {
            MessageRole::User => ChatRole::User,
            MessageRole::Assistant => ChatRole::Assistant,
            MessageRole::Error => return None,
        };
        Some(Self {
            role,
            content: message.prompt_text().to_string(),
        })
    }
}

/// The window of turns sent to the model alongside a user message.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationContext {
    pub user_message: Message,
    /// Preceding turns in original order, oldest first.
    pub context_messages: Vec<ContextMessage>,
    /// Index of `user_message` in the history it was built from.
    pub target_index: usize,
}

/// Generate an opaque, process-unique identifier.
pub fn generate_id(prefix: &str) -> String {
    format!("{prefix}_{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
#[path = "models_tests.rs"]
mod tests;
