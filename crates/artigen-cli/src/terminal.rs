//! Terminal output: the live preview surface and history listings.

use artigen_core::models::{Artifact, ArtifactKind, Message, MessageRole};
use artigen_core::reconciler::{AppliedOutcome, HistoryEdit};
use artigen_core::session::{PreviewSurface, RenderError};
use artigen_core::stream_parser::RenderSnapshot;
use artigen_core::ModuleDescriptor;
use chrono::{DateTime, Utc};
use console::{Style, Term, style};

/// Streams the transcript to stdout and reports drawing progress on stderr.
#[derive(Debug)]
pub struct TerminalSurface {
    out: Term,
    status: Term,
    /// Transcript text already written.
    shown: String,
    drawing: Option<ArtifactKind>,
}

impl TerminalSurface {
    pub fn new() -> Self {
        Self {
            out: Term::stdout(),
            status: Term::stderr(),
            shown: String::new(),
            drawing: None,
        }
    }

    fn status_line(&self, text: &str) {
        if self.status.is_term() {
            let _ = self.status.clear_line();
            let _ = self.status.write_str(&style(text).dim().to_string());
        }
    }
}

impl Default for TerminalSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl PreviewSurface for TerminalSurface {
    fn transcript(&mut self, text: &str) {
        // Only append; the lead-in can shrink once a fence is recognised.
        let Some(fresh) = text.strip_prefix(self.shown.as_str()) else {
            return;
        };
        if fresh.is_empty() {
            return;
        }
        if self.drawing.is_some() && self.status.is_term() {
            let _ = self.status.clear_line();
        }
        let _ = self.out.write_str(fresh);
        let _ = self.out.flush();
        self.shown = text.to_string();
    }

    fn drawing_started(&mut self, kind: ArtifactKind, _lead_in: &str) {
        self.drawing = Some(kind);
        let _ = self.out.write_line("");
        self.status_line(&format!("drawing {kind}..."));
    }

    fn render(&mut self, snapshot: &RenderSnapshot) -> Result<Option<String>, RenderError> {
        let state = if snapshot.partial { "drawing" } else { "drawn" };
        self.status_line(&format!(
            "{state} {} ({} bytes)",
            snapshot.kind,
            snapshot.source.len()
        ));
        Ok(None)
    }

    fn discard_transcript(&mut self) {
        self.end_transcript();
    }

    fn end_transcript(&mut self) {
        if self.status.is_term() {
            let _ = self.status.clear_line();
        }
        if !self.shown.is_empty() {
            let _ = self.out.write_line("");
        }
        self.shown.clear();
        self.drawing = None;
    }
}

/// Format a relative time string (e.g., "2 days ago", "just now").
fn relative_time(dt: DateTime<Utc>) -> String {
    let duration = Utc::now().signed_duration_since(dt);

    if duration.num_seconds() < 60 {
        return "just now".to_string();
    }
    if duration.num_minutes() < 60 {
        let mins = duration.num_minutes();
        return format!("{mins} min{s} ago", s = if mins == 1 { "" } else { "s" });
    }
    if duration.num_hours() < 24 {
        let hours = duration.num_hours();
        return format!("{hours} hour{s} ago", s = if hours == 1 { "" } else { "s" });
    }
    if duration.num_days() < 7 {
        let days = duration.num_days();
        return format!("{days} day{s} ago", s = if days == 1 { "" } else { "s" });
    }

    dt.format("%Y-%m-%d").to_string()
}

fn role_style(role: MessageRole) -> Style {
    match role {
        MessageRole::User => Style::new().cyan().bold(),
        MessageRole::Assistant => Style::new().green().bold(),
        MessageRole::Error => Style::new().red().bold(),
    }
}

pub fn print_modules(modules: &[std::sync::Arc<ModuleDescriptor>], active: Option<&str>) {
    for module in modules {
        let marker = if Some(module.id.as_str()) == active { "*" } else { " " };
        println!(
            "{marker} {:<16} {:<14} {}",
            style(&module.id).bold(),
            module.kind,
            style(&module.label).dim()
        );
    }
}

pub fn print_history(module: &ModuleDescriptor, history: &[Message], active: Option<&str>) {
    if history.is_empty() {
        println!("{}", style(&module.placeholder).dim());
        return;
    }
    for message in history {
        let role = message.role.to_string();
        let mut flags = Vec::new();
        if message.interrupted {
            flags.push("interrupted".to_string());
        }
        if let Some(artifact_id) = &message.artifact_id {
            let marker = if Some(artifact_id.as_str()) == active { "*" } else { "" };
            flags.push(format!("artifact {artifact_id}{marker}"));
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        println!(
            "{} {} {}{}",
            role_style(message.role).apply_to(&role),
            style(&message.id).dim(),
            style(relative_time(message.timestamp)).dim().italic(),
            style(flags).yellow()
        );
        for line in message.content.lines() {
            println!("    {line}");
        }
        println!();
    }
}

pub fn print_artifact(artifact: &Artifact) {
    println!(
        "{} {} {}",
        style(&artifact.id).bold(),
        artifact.kind(),
        style(relative_time(artifact.timestamp)).dim()
    );
    println!("{}", artifact.source_text());
}

pub fn print_outcome(outcome: &AppliedOutcome) {
    match outcome {
        AppliedOutcome::Finalized { artifact, .. } => match artifact {
            Some(artifact) => println!(
                "{} {} {}",
                style("saved").green(),
                artifact.kind(),
                style(&artifact.id).bold()
            ),
            None => println!("{}", style("no artifact in this reply").dim()),
        },
        AppliedOutcome::Interrupted(Some(message)) => {
            println!("{} {}", style("stopped, kept").yellow(), style(&message.id).dim());
        }
        AppliedOutcome::Interrupted(None) => println!("{}", style("stopped").yellow()),
        AppliedOutcome::Failed(message) => {
            eprintln!("{} {}", style("error:").red().bold(), message.content);
        }
    }
}

pub fn print_edit(edit: &HistoryEdit) {
    println!(
        "removed {} message(s), {} artifact(s)",
        edit.removed_messages.len(),
        edit.removed_artifacts.len()
    );
    if let Some(active) = &edit.active_artifact {
        println!("active artifact: {}", style(active).bold());
    }
}

/// Ask a yes/no question on the terminal. Defaults to no.
pub fn confirm(question: &str) -> bool {
    let term = Term::stderr();
    if term.write_str(&format!("{question} [y/N] ")).is_err() {
        return false;
    }
    term.read_line()
        .map(|answer| matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
        .unwrap_or(false)
}
