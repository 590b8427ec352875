//! Catalog of generation modules.
//!
//! A module pairs an artifact kind with the pattern that marks its block in a
//! streamed response, a prompt, a storage namespace and export capabilities.
//! Descriptors are immutable once registered and shared by `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use tracing::warn;

use crate::config::ModuleConfig;
use crate::error::{Error, Result};
use crate::models::ArtifactKind;
use crate::parse::{self, ParsedResponse};

/// Export capabilities of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportCapabilities {
    pub allow_svg: bool,
    pub allow_png: bool,
    pub allow_clipboard: bool,
    pub allow_code: bool,
}

impl ExportCapabilities {
    pub const ALL: Self = Self {
        allow_svg: true,
        allow_png: true,
        allow_clipboard: true,
        allow_code: true,
    };
}

#[derive(Debug, Clone)]
pub struct ModuleDescriptor {
    pub id: String,
    pub label: String,
    pub kind: ArtifactKind,
    /// Marks the start of the artifact block in a streamed response.
    pub start_pattern: Regex,
    pub prompt_key: String,
    pub storage_namespace: String,
    /// Number of prior turns sent with each request.
    pub context_window: usize,
    pub exports: ExportCapabilities,
    /// Shown in the preview before anything has been generated.
    pub placeholder: String,
}

impl ModuleDescriptor {
    /// Build a descriptor with the kind's default pattern and namespace.
    pub fn new(id: &str, label: &str, kind: ArtifactKind) -> Result<Self> {
        Ok(Self {
            id: id.to_string(),
            label: label.to_string(),
            kind,
            start_pattern: Regex::new(default_start_pattern(kind))?,
            prompt_key: id.to_string(),
            storage_namespace: format!("module:{id}"),
            context_window: 10,
            exports: ExportCapabilities::ALL,
            placeholder: format!("The generated {label} will appear here"),
        })
    }

    /// Build a descriptor from a `[[modules]]` config entry.
    pub fn from_config(entry: &ModuleConfig, default_window: usize) -> Result<Self> {
        let kind = ArtifactKind::parse(&entry.kind).ok_or_else(|| {
            Error::Config(format!(
                "Unknown artifact kind '{}' for module '{}'",
                entry.kind, entry.id
            ))
        })?;
        let mut module = Self::new(&entry.id, &entry.label, kind)?;
        if let Some(pattern) = &entry.start_pattern {
            module.start_pattern = Regex::new(pattern)?;
        }
        if let Some(key) = &entry.prompt_key {
            module.prompt_key.clone_from(key);
        }
        module.context_window = entry.context_window.unwrap_or(default_window);
        module.exports = ExportCapabilities {
            allow_svg: entry.exports.svg,
            allow_png: entry.exports.png,
            allow_clipboard: entry.exports.clipboard,
            allow_code: entry.exports.code,
        };
        Ok(module)
    }

    /// Parse a complete response with this module's artifact parser.
    pub fn parse(&self, text: &str) -> ParsedResponse {
        parse::parse_response(self.kind, text)
    }
}

fn default_start_pattern(kind: ArtifactKind) -> &'static str {
    match kind {
        ArtifactKind::Svg => r"(?i)```\s*(svg|xml)?\s*<svg",
        ArtifactKind::Mermaid => r"(?i)```mermaid",
        ArtifactKind::EchartsOption => r"(?i)```(json|js|javascript|echarts|option)",
        ArtifactKind::Html => r"(?i)```(html|htm)",
    }
}

struct Builtin {
    id: &'static str,
    label: &'static str,
    kind: ArtifactKind,
    pattern: &'static str,
    prompt_key: &'static str,
    context_window: usize,
    exports: ExportCapabilities,
    placeholder: &'static str,
}

const BUILTINS: &[Builtin] = &[
    Builtin {
        id: "product-canvas",
        label: "Product Canvas",
        kind: ArtifactKind::Svg,
        pattern: r"(?i)```(svg)?\s*<svg",
        prompt_key: "canvas",
        context_window: 10,
        exports: ExportCapabilities::ALL,
        placeholder: "The generated product canvas will appear here",
    },
    Builtin {
        id: "swot",
        label: "SWOT Analysis",
        kind: ArtifactKind::Svg,
        pattern: r"(?i)```(svg)?\s*<svg",
        prompt_key: "swot",
        context_window: 10,
        exports: ExportCapabilities::ALL,
        placeholder: "The generated SWOT analysis will appear here",
    },
    Builtin {
        id: "thinksvg",
        label: "Mind Map",
        kind: ArtifactKind::Svg,
        pattern: r"(?i)```\s*(svg|xml)?\s*<svg",
        prompt_key: "thinksvg",
        context_window: 10,
        exports: ExportCapabilities::ALL,
        placeholder: "The generated mind map will appear here",
    },
    Builtin {
        id: "mermaid",
        label: "Mermaid Diagram",
        kind: ArtifactKind::Mermaid,
        pattern: r"(?i)```mermaid",
        prompt_key: "mermaid",
        context_window: 8,
        exports: ExportCapabilities::ALL,
        placeholder: "The generated diagram will appear here",
    },
    Builtin {
        id: "echarts",
        label: "ECharts Chart",
        kind: ArtifactKind::EchartsOption,
        pattern: r"(?i)```(json|js|javascript|echarts|option)",
        prompt_key: "echarts",
        context_window: 8,
        exports: ExportCapabilities {
            allow_svg: false,
            allow_png: true,
            allow_clipboard: false,
            allow_code: true,
        },
        placeholder: "The generated chart will appear here",
    },
    Builtin {
        id: "onepage",
        label: "Landing Page",
        kind: ArtifactKind::Html,
        pattern: r"(?i)```(html|htm)",
        prompt_key: "onepage",
        context_window: 6,
        exports: ExportCapabilities {
            allow_svg: false,
            allow_png: false,
            allow_clipboard: false,
            allow_code: true,
        },
        placeholder: "The generated landing page will appear here",
    },
];

/// Registered modules in registration order.
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, Arc<ModuleDescriptor>>,
    order: Vec<String>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in modules.
    pub fn builtin() -> Result<Self> {
        let mut registry = Self::new();
        for builtin in BUILTINS {
            registry.register(ModuleDescriptor {
                id: builtin.id.to_string(),
                label: builtin.label.to_string(),
                kind: builtin.kind,
                start_pattern: Regex::new(builtin.pattern)?,
                prompt_key: builtin.prompt_key.to_string(),
                storage_namespace: format!("module:{}", builtin.id),
                context_window: builtin.context_window,
                exports: builtin.exports,
                placeholder: builtin.placeholder.to_string(),
            })?;
        }
        Ok(registry)
    }

    /// Built-in modules followed by those declared in configuration.
    pub fn with_config(entries: &[ModuleConfig], default_window: usize) -> Result<Self> {
        let mut registry = Self::builtin()?;
        for entry in entries {
            registry.register(ModuleDescriptor::from_config(entry, default_window)?)?;
        }
        Ok(registry)
    }

    /// Add a module. A module with the same id is replaced in place.
    pub fn register(&mut self, module: ModuleDescriptor) -> Result<Arc<ModuleDescriptor>> {
        if module.id.trim().is_empty() {
            return Err(Error::Config("Module id must not be empty".to_string()));
        }
        let module = Arc::new(module);
        if self
            .modules
            .insert(module.id.clone(), Arc::clone(&module))
            .is_some()
        {
            warn!("Module '{}' registered twice; keeping the later one", module.id);
        } else {
            self.order.push(module.id.clone());
        }
        Ok(module)
    }

    pub fn get(&self, id: &str) -> Option<Arc<ModuleDescriptor>> {
        self.modules.get(id).cloned()
    }

    /// Look up a module, failing with [`Error::ModuleNotFound`].
    pub fn require(&self, id: &str) -> Result<Arc<ModuleDescriptor>> {
        self.get(id)
            .ok_or_else(|| Error::ModuleNotFound(id.to_string()))
    }

    pub fn has(&self, id: &str) -> bool {
        self.modules.contains_key(id)
    }

    /// Modules in registration order.
    pub fn list(&self) -> Vec<Arc<ModuleDescriptor>> {
        self.order
            .iter()
            .filter_map(|id| self.modules.get(id).cloned())
            .collect()
    }

    pub fn first(&self) -> Option<Arc<ModuleDescriptor>> {
        self.order.first().and_then(|id| self.get(id))
    }
}
