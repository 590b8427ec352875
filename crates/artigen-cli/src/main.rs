//! artigen CLI - chat-driven SVG, Mermaid, ECharts and HTML generation

use std::path::PathBuf;

use anyhow::{Context, Result};
use artigen_core::export::ExportFormat;
use artigen_core::reconciler::AppliedOutcome;
use artigen_core::{Config, Studio};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;

mod openai;
mod prompts;
mod terminal;

use openai::OpenAiClient;
use prompts::PromptLibrary;
use terminal::TerminalSurface;

#[derive(Debug, Parser)]
#[command(
    name = "artigen",
    author,
    version,
    about = "Generate SVG, Mermaid, ECharts and HTML artifacts by chatting with a model",
    propagate_version = true
)]
struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Module to operate on instead of the active one
    #[arg(short, long, global = true)]
    module: Option<String>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List available modules
    Modules,

    /// Make a module the active one
    Use {
        /// Module ID
        module: String,
    },

    /// Send a message and stream the reply (Ctrl-C stops it)
    Chat {
        /// Message text
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// Show the conversation of the module
    History,

    /// Show an artifact, the active one by default
    Artifact {
        /// Artifact ID; selecting it makes it active
        id: Option<String>,
    },

    /// Write an artifact to a file
    Export {
        #[arg(long, value_enum, default_value = "code")]
        format: FormatArg,

        /// Artifact ID (defaults to the active artifact)
        #[arg(long)]
        id: Option<String>,

        /// Output file (defaults to a generated name in the current directory)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Delete one message
    Delete {
        /// Message ID
        id: String,

        /// Skip confirmation
        #[arg(long)]
        yes: bool,
    },

    /// Remove every message after an assistant message
    Rollback {
        /// Message ID
        id: String,
    },

    /// Drop the newest reply and ask again
    Regenerate {
        /// Message ID of the newest reply
        id: String,
    },

    /// Clear the conversation and all artifacts of the module
    Clear {
        /// Skip confirmation
        #[arg(long)]
        yes: bool,
    },

    /// Change the preview zoom of an SVG module
    Zoom {
        #[arg(value_enum)]
        action: ZoomArg,
    },

    /// Show the configuration in use
    Config,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Svg,
    Code,
}

impl From<FormatArg> for ExportFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Svg => ExportFormat::Svg,
            FormatArg::Code => ExportFormat::Code,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ZoomArg {
    In,
    Out,
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = match cli.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Load config
    let config_path = cli.config.unwrap_or_else(Config::default_config_path);
    let mut config = Config::ensure_at(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    config.apply_env();

    if let Command::Config = cli.command {
        return cmd_config(&config, &config_path);
    }

    let mut studio = Studio::open(&config).context("Failed to open store")?;
    match cli.module.as_deref() {
        Some(module) => studio.activate(module)?,
        None => studio.restore_last_module()?,
    };

    match cli.command {
        Command::Modules => cmd_modules(&studio),
        Command::Use { module } => {
            let context = studio.activate(&module)?;
            println!("Active module: {} ({})", context.module.label, context.module.id);
            Ok(())
        }
        Command::Chat { text } => cmd_chat(&mut studio, &config, &text.join(" ")).await,
        Command::History => cmd_history(&mut studio),
        Command::Artifact { id } => cmd_artifact(&mut studio, id.as_deref()),
        Command::Export { format, id, out } => cmd_export(&mut studio, format, id.as_deref(), out),
        Command::Delete { id, yes } => cmd_delete(&mut studio, &id, yes),
        Command::Rollback { id } => {
            let edit = studio.rollback(&id)?;
            terminal::print_edit(&edit);
            Ok(())
        }
        Command::Regenerate { id } => cmd_regenerate(&mut studio, &config, &id).await,
        Command::Clear { yes } => {
            let module = studio.active_module()?;
            let question = format!("Clear the {} conversation and its artifacts?", module.label);
            if studio.clear_conversation(|| yes || terminal::confirm(&question))? {
                println!("Cleared {}", module.id);
            }
            Ok(())
        }
        Command::Zoom { action } => {
            let zoom = match action {
                ZoomArg::In => studio.adjust_zoom(artigen_core::artifacts::ZOOM_STEP)?,
                ZoomArg::Out => studio.adjust_zoom(-artigen_core::artifacts::ZOOM_STEP)?,
                ZoomArg::Reset => studio.reset_zoom()?,
            };
            println!("Zoom: {:.0}%", zoom * 100.0);
            Ok(())
        }
        Command::Config => Ok(()),
    }
}

fn cmd_config(config: &Config, config_path: &std::path::Path) -> Result<()> {
    println!("Config: {}", config_path.display());
    println!("Store:  {}", config.store_path().display());
    println!();
    let mut shown = config.clone();
    if !shown.api.key.is_empty() {
        shown.api.key = "********".to_string();
    }
    println!("{}", toml::to_string_pretty(&shown)?);
    Ok(())
}

fn cmd_modules(studio: &Studio) -> Result<()> {
    let active = studio.active_module()?;
    terminal::print_modules(&studio.registry().list(), Some(active.id.as_str()));
    Ok(())
}

fn client(config: &Config, studio: &Studio) -> Result<OpenAiClient> {
    if !config.api.is_valid() {
        anyhow::bail!(
            "API settings are incomplete. Set url, key and model under [api] in the config \
             or use ARTIGEN_API_URL, ARTIGEN_API_KEY and ARTIGEN_MODEL."
        );
    }
    let keys: Vec<String> = studio
        .registry()
        .list()
        .iter()
        .map(|module| module.prompt_key.clone())
        .collect();
    let prompts = PromptLibrary::load(config.prompts_dir.as_deref(), keys.iter().map(String::as_str));
    OpenAiClient::new(&config.api, prompts)
}

/// Token cancelled on Ctrl-C.
fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let on_signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });
    token
}

async fn run_generation(
    studio: &mut Studio,
    client: &OpenAiClient,
    pending: artigen_core::studio::PendingGeneration,
) -> Result<()> {
    let cancel = interrupt_token();
    let mut surface = TerminalSurface::new();
    let Some(outcome) = studio
        .generate(client, pending, &mut surface, &cancel)
        .await?
    else {
        return Ok(());
    };
    if let AppliedOutcome::Failed(message) = &outcome {
        anyhow::bail!("{}", message.content);
    }
    terminal::print_outcome(&outcome);
    Ok(())
}

async fn cmd_chat(studio: &mut Studio, config: &Config, text: &str) -> Result<()> {
    // Fail on missing settings before the user message is stored.
    let client = client(config, studio)?;
    let pending = studio.send(text)?;
    run_generation(studio, &client, pending).await
}

async fn cmd_regenerate(studio: &mut Studio, config: &Config, message_id: &str) -> Result<()> {
    let client = client(config, studio)?;
    let (pending, edit) = studio.regenerate(message_id)?;
    terminal::print_edit(&edit);
    run_generation(studio, &client, pending).await
}

fn cmd_history(studio: &mut Studio) -> Result<()> {
    let context = studio.context()?;
    let active = context.active_artifact.as_ref().map(|a| a.id.as_str());
    terminal::print_history(&context.module, &context.history, active);
    Ok(())
}

fn cmd_artifact(studio: &mut Studio, id: Option<&str>) -> Result<()> {
    let artifact = match id {
        Some(id) => Some(studio.select_artifact(id)?),
        None => studio.active_artifact()?,
    };
    match artifact {
        Some(artifact) => terminal::print_artifact(&artifact),
        None => {
            let module = studio.active_module()?;
            println!("{}", module.placeholder);
        }
    }
    Ok(())
}

fn cmd_export(
    studio: &mut Studio,
    format: FormatArg,
    id: Option<&str>,
    out: Option<PathBuf>,
) -> Result<()> {
    let file = studio.export(id, format.into())?;
    let path = out.unwrap_or_else(|| PathBuf::from(&file.filename));
    std::fs::write(&path, &file.contents)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Exported {} ({})", path.display(), file.mime_type);
    Ok(())
}

fn cmd_delete(studio: &mut Studio, message_id: &str, yes: bool) -> Result<()> {
    let edit = studio.delete_message(message_id, |message| {
        yes || terminal::confirm(&format!("Delete this {} message?", message.role))
    })?;
    match edit {
        Some(edit) => terminal::print_edit(&edit),
        None => println!("Nothing deleted."),
    }
    Ok(())
}
