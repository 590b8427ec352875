//! Configuration types and loading for artigen.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Error;
use crate::error::Result;
use crate::paths;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the persistent key-value store.
    pub data_dir: PathBuf,

    /// Directory with `<prompt_key>-prompt.txt` system prompts.
    pub prompts_dir: Option<PathBuf>,

    /// Module activated when no last-active module has been stored.
    pub default_module: Option<String>,

    /// Chat-completion endpoint settings.
    pub api: ApiConfig,

    /// Streaming preview settings.
    pub stream: StreamConfig,

    /// Conversation settings.
    pub chat: ChatConfig,

    /// Extra module descriptors registered after the built-in ones.
    pub modules: Vec<ModuleConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: paths::data_dir(),
            prompts_dir: None,
            default_module: None,
            api: ApiConfig::default(),
            stream: StreamConfig::default(),
            chat: ChatConfig::default(),
            modules: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a specific file.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;
        config.expand_paths();
        Ok(config)
    }

    /// Get the default config file path.
    pub fn default_config_path() -> PathBuf {
        paths::config_dir().join("config.toml")
    }

    /// Save configuration to a specific file path.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Ensure config exists at the given path, creating defaults if missing.
    pub fn ensure_at(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from_path(path)
        } else {
            let mut config = Self::default();
            config.expand_paths();
            config.save_to_path(path)?;
            Ok(config)
        }
    }

    /// Expand a path, replacing ~ with home directory.
    pub fn expand_path(path: &str) -> PathBuf {
        let expanded = shellexpand::full(path)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| path.to_string());
        PathBuf::from(expanded)
    }

    fn expand_paths(&mut self) {
        self.data_dir = Self::expand_path(&self.data_dir.to_string_lossy());
        self.prompts_dir = self
            .prompts_dir
            .as_ref()
            .map(|p| Self::expand_path(&p.to_string_lossy()));
    }

    /// Override endpoint settings from `ARTIGEN_*` environment variables.
    pub fn apply_env(&mut self) {
        let prefix = crate::env_prefix();
        let read = |name: &str| {
            std::env::var(format!("{prefix}_{name}"))
                .ok()
                .filter(|value| !value.trim().is_empty())
        };
        if let Some(url) = read("API_URL") {
            self.api.url = url;
        }
        if let Some(key) = read("API_KEY") {
            self.api.key = key;
        }
        if let Some(model) = read("MODEL") {
            self.api.model = model;
        }
    }

    /// Path of the key-value store file.
    pub fn store_path(&self) -> PathBuf {
        paths::store_file(&self.data_dir)
    }
}

/// OpenAI-compatible chat-completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL, e.g. `https://api.openai.com/v1`.
    pub url: String,

    pub key: String,

    pub model: String,

    pub max_tokens: u32,

    pub temperature: f32,

    /// Seconds allowed to connect and between reads of the streamed body.
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            key: String::new(),
            model: String::new(),
            max_tokens: 13000,
            temperature: 0.7,
            timeout_secs: 300,
        }
    }
}

impl ApiConfig {
    /// Whether the endpoint is configured well enough to send requests.
    pub fn is_valid(&self) -> bool {
        !self.url.trim().is_empty() && !self.key.trim().is_empty() && !self.model.trim().is_empty()
    }
}

/// Streaming preview configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Minimum spacing between mid-stream re-renders, in milliseconds.
    pub render_throttle_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            render_throttle_ms: 250,
        }
    }
}

/// Conversation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Context window for modules that do not declare one.
    pub context_window: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self { context_window: 10 }
    }
}

/// A user-declared module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub id: String,

    pub label: String,

    /// Artifact kind: "svg", "mermaid", "echarts" or "html".
    pub kind: String,

    /// Regex marking the start of the artifact block. Defaults per kind.
    #[serde(default)]
    pub start_pattern: Option<String>,

    #[serde(default)]
    pub context_window: Option<usize>,

    /// Prompt file key. Defaults to the module id.
    #[serde(default)]
    pub prompt_key: Option<String>,

    #[serde(default)]
    pub exports: ExportConfig,
}

/// Export capability flags of a user-declared module.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub svg: bool,
    pub png: bool,
    pub clipboard: bool,
    pub code: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            svg: true,
            png: true,
            clipboard: true,
            code: true,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
