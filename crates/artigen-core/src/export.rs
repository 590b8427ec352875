//! Export of stored artifacts as files.

use crate::error::{Error, Result};
use crate::models::{Artifact, ArtifactKind};
use crate::registry::ModuleDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// SVG markup, directly or from a cached Mermaid rendering.
    Svg,
    /// The artifact source as generated.
    Code,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFile {
    pub filename: String,
    pub mime_type: &'static str,
    pub contents: String,
}

fn source_mime_type(kind: ArtifactKind) -> &'static str {
    match kind {
        ArtifactKind::Svg => "image/svg+xml",
        ArtifactKind::Mermaid => "text/plain",
        ArtifactKind::EchartsOption => "application/json",
        ArtifactKind::Html => "text/html",
    }
}

/// Export `artifact` in `format`, honoring the module's export flags.
pub fn export_artifact(
    module: &ModuleDescriptor,
    artifact: &Artifact,
    format: ExportFormat,
) -> Result<ExportedFile> {
    let stamp = artifact.timestamp.format("%Y%m%d-%H%M%S");
    match format {
        ExportFormat::Svg => {
            if !module.exports.allow_svg {
                return Err(Error::Refused(format!(
                    "SVG export is not available for {}",
                    module.label
                )));
            }
            let markup = artifact.svg_markup().ok_or_else(|| {
                Error::Refused("No SVG rendering is available for this artifact".to_string())
            })?;
            Ok(ExportedFile {
                filename: format!("{}-{stamp}.svg", module.id),
                mime_type: "image/svg+xml",
                contents: markup.to_string(),
            })
        }
        ExportFormat::Code => {
            if !module.exports.allow_code {
                return Err(Error::Refused(format!(
                    "Code export is not available for {}",
                    module.label
                )));
            }
            let kind = artifact.kind();
            Ok(ExportedFile {
                filename: format!("{}-{stamp}.{}", module.id, kind.source_extension()),
                mime_type: source_mime_type(kind),
                contents: artifact.source_text().to_string(),
            })
        }
    }
}
