//! System prompts keyed by module prompt key.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

const DEFAULT_PROMPT: &str =
    "You are a reliable assistant. Answer the user's request directly and give structured output.";

fn builtin_prompt(key: &str) -> Option<&'static str> {
    let prompt = match key {
        "canvas" => "You are a product strategy analyst who builds product canvases. Reply with a short introduction followed by one complete ```svg code block.",
        "swot" => "You are a business strategy analyst who performs SWOT analyses. Reply with a short introduction followed by one complete ```svg code block.",
        "thinksvg" => "You are a mind-map expert who draws clear mind maps as SVG. Reply with one complete ```svg code block.",
        "echarts" => "You are a data visualisation expert who turns natural-language requests into ECharts option objects. Output the option as structured JSON in one ```json code block.",
        "mermaid" => "You are a visualisation engineer who draws clear diagrams with Mermaid syntax. Output exactly one ```mermaid code block.",
        "onepage" => "You are a landing page architect. Produce a complete single-file HTML page with inline styles and only the scripts it needs, wrapped in one ```html code block.",
        _ => return None,
    };
    Some(prompt)
}

/// Prompts loaded once at startup, falling back to built-in text.
#[derive(Debug, Clone, Default)]
pub struct PromptLibrary {
    loaded: HashMap<String, String>,
}

impl PromptLibrary {
    /// Read `<key>-prompt.txt` from `dir` for every key.
    pub fn load<'a>(dir: Option<&Path>, keys: impl IntoIterator<Item = &'a str>) -> Self {
        let mut loaded = HashMap::new();
        let Some(dir) = dir else {
            return Self { loaded };
        };
        for key in keys {
            let path = prompt_path(dir, key);
            match std::fs::read_to_string(&path) {
                Ok(text) if !text.trim().is_empty() => {
                    debug!("Loaded prompt {key} from {}", path.display());
                    loaded.insert(key.to_string(), text.trim().to_string());
                }
                Ok(_) => warn!("Prompt file {} is empty, using built-in text", path.display()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => warn!("Failed to read prompt {}: {err}", path.display()),
            }
        }
        Self { loaded }
    }

    /// System prompt for `key`: the file, then the built-in text, then a
    /// generic assistant prompt.
    pub fn system_prompt(&self, key: &str) -> &str {
        self.loaded
            .get(key)
            .map(String::as_str)
            .or_else(|| builtin_prompt(key))
            .unwrap_or(DEFAULT_PROMPT)
    }
}

fn prompt_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{key}-prompt.txt"))
}
