//! The active-module context a front end works through.
//!
//! A [`Studio`] owns the registry, the stores and the reconciler, tracks which
//! module is active and remembers it across runs.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::artifacts::{ArtifactStore, UiState};
use crate::client::{CompletionClient, CompletionOptions, CompletionRequest};
use crate::config::Config;
use crate::conversation::ConversationStore;
use crate::error::{Error, Result};
use crate::export::{ExportFormat, ExportedFile, export_artifact};
use crate::kv::Storage;
use crate::models::{Artifact, ArtifactKind, ContextMessage, Message};
use crate::reconciler::{AppliedOutcome, ConversationReconciler, HistoryEdit};
use crate::registry::{ModuleDescriptor, ModuleRegistry};
use crate::session::{PreviewSurface, SessionOutcome, StreamSession, drive};

const ACTIVE_MODULE_KEY: &str = "activeModuleId";

/// Tunables applied to every generation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StudioSettings {
    pub render_throttle: Duration,
    pub options: CompletionOptions,
}

impl Default for StudioSettings {
    fn default() -> Self {
        Self {
            render_throttle: Duration::from_millis(250),
            options: CompletionOptions::default(),
        }
    }
}

impl From<&Config> for StudioSettings {
    fn from(config: &Config) -> Self {
        Self {
            render_throttle: Duration::from_millis(config.stream.render_throttle_ms),
            options: CompletionOptions {
                max_tokens: config.api.max_tokens,
                temperature: config.api.temperature,
            },
        }
    }
}

/// Snapshot of a module right after activation.
#[derive(Debug, Clone)]
pub struct ModuleContext {
    pub module: Arc<ModuleDescriptor>,
    pub history: Vec<Message>,
    pub active_artifact: Option<Artifact>,
    pub ui: UiState,
}

/// A generation ready to be driven.
#[derive(Debug)]
pub struct PendingGeneration {
    pub module: Arc<ModuleDescriptor>,
    pub request: CompletionRequest,
    pub session: StreamSession,
}

#[derive(Debug)]
pub struct Studio {
    registry: ModuleRegistry,
    storage: Storage,
    reconciler: ConversationReconciler,
    settings: StudioSettings,
    default_module: Option<String>,
    active: Option<Arc<ModuleDescriptor>>,
}

impl Studio {
    pub fn new(registry: ModuleRegistry, storage: Storage) -> Self {
        let reconciler = ConversationReconciler::new(
            ConversationStore::new(storage.clone()),
            ArtifactStore::new(storage.clone()),
        );
        Self {
            registry,
            storage,
            reconciler,
            settings: StudioSettings::default(),
            default_module: None,
            active: None,
        }
    }

    /// Open the persistent store and module catalog described by `config`.
    pub fn open(config: &Config) -> Result<Self> {
        let registry = ModuleRegistry::with_config(&config.modules, config.chat.context_window)?;
        let storage = Storage::open(&config.store_path())?;
        let mut studio = Self::new(registry, storage).with_settings(StudioSettings::from(config));
        studio.default_module.clone_from(&config.default_module);
        Ok(studio)
    }

    #[must_use]
    pub fn with_settings(mut self, settings: StudioSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn with_default_module(mut self, id: impl Into<String>) -> Self {
        self.default_module = Some(id.into());
        self
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn reconciler(&mut self) -> &mut ConversationReconciler {
        &mut self.reconciler
    }

    /// Make `module_id` the active module and remember it.
    pub fn activate(&mut self, module_id: &str) -> Result<ModuleContext> {
        let module = self.registry.require(module_id)?;
        if !self.storage.global().set(ACTIVE_MODULE_KEY, module_id) {
            warn!("Could not remember active module {module_id}");
        }
        info!(module = %module.id, "activated module");
        self.active = Some(module);
        self.context()
    }

    /// Activate the remembered module, the configured default or the first
    /// registered one, whichever exists first.
    pub fn restore_last_module(&mut self) -> Result<ModuleContext> {
        let remembered: Option<String> = self.storage.global().get_or_default(ACTIVE_MODULE_KEY);
        let chosen = remembered
            .into_iter()
            .chain(self.default_module.clone())
            .find(|id| self.registry.has(id))
            .or_else(|| self.registry.first().map(|m| m.id.clone()))
            .ok_or(Error::NoActiveModule)?;
        self.activate(&chosen)
    }

    pub fn active_module(&self) -> Result<Arc<ModuleDescriptor>> {
        self.active.clone().ok_or(Error::NoActiveModule)
    }

    /// Snapshot of the active module.
    pub fn context(&mut self) -> Result<ModuleContext> {
        let module = self.active_module()?;
        Ok(ModuleContext {
            history: self.history()?,
            active_artifact: self.active_artifact()?,
            ui: self.reconciler.artifacts().ui_state(&module),
            module,
        })
    }

    pub fn history(&mut self) -> Result<Vec<Message>> {
        let module = self.active_module()?;
        Ok(self.reconciler.conversations().history(&module))
    }

    pub fn artifacts(&mut self) -> Result<Vec<Artifact>> {
        let module = self.active_module()?;
        Ok(self.reconciler.artifacts().list(&module))
    }

    pub fn active_artifact(&mut self) -> Result<Option<Artifact>> {
        let module = self.active_module()?;
        let artifacts = self.reconciler.artifacts();
        let Some(id) = artifacts.active_id(&module) else {
            return Ok(None);
        };
        Ok(artifacts.get(&module, &id))
    }

    /// Show a stored artifact in the preview.
    pub fn select_artifact(&mut self, artifact_id: &str) -> Result<Artifact> {
        let module = self.active_module()?;
        let artifacts = self.reconciler.artifacts();
        let artifact = artifacts
            .get(&module, artifact_id)
            .ok_or_else(|| Error::Refused(format!("Artifact not found: {artifact_id}")))?;
        if !artifacts.set_active(&module, Some(artifact_id)) {
            return Err(Error::Storage("Failed to save active artifact".to_string()));
        }
        Ok(artifact)
    }

    fn pending(
        &self,
        module: Arc<ModuleDescriptor>,
        user_text: String,
        context: Vec<ContextMessage>,
    ) -> PendingGeneration {
        let request = CompletionRequest {
            module_id: module.id.clone(),
            prompt_key: module.prompt_key.clone(),
            user_text,
            context,
            options: self.settings.options,
        };
        let session = StreamSession::new(Arc::clone(&module), self.settings.render_throttle);
        PendingGeneration {
            module,
            request,
            session,
        }
    }

    /// Record a user message and prepare its generation.
    pub fn send(&mut self, text: &str) -> Result<PendingGeneration> {
        let module = self.active_module()?;
        let context = self.reconciler.submit(&module, text)?;
        Ok(self.pending(
            module,
            context.user_message.content,
            context.context_messages,
        ))
    }

    /// Drop the newest answer and prepare a new one for the same question.
    pub fn regenerate(&mut self, message_id: &str) -> Result<(PendingGeneration, HistoryEdit)> {
        let module = self.active_module()?;
        let regeneration = self.reconciler.prepare_regenerate(&module, message_id)?;
        let pending = self.pending(
            module,
            regeneration.user_message.content,
            regeneration.context,
        );
        Ok((pending, regeneration.edit))
    }

    /// Stream `pending` to its outcome and store the result.
    pub async fn generate<C, S>(
        &mut self,
        client: &C,
        pending: PendingGeneration,
        surface: &mut S,
        cancel: &CancellationToken,
    ) -> Result<Option<AppliedOutcome>>
    where
        C: CompletionClient + ?Sized,
        S: PreviewSurface + ?Sized,
    {
        let PendingGeneration {
            module,
            request,
            mut session,
        } = pending;
        let Some(outcome) = drive(client, request, &mut session, surface, cancel).await else {
            return Ok(None);
        };
        let applied = self.apply_outcome(&module, outcome);
        session.settle();
        applied.map(Some)
    }

    pub fn apply_outcome(
        &mut self,
        module: &ModuleDescriptor,
        outcome: SessionOutcome,
    ) -> Result<AppliedOutcome> {
        self.reconciler.apply(module, outcome)
    }

    pub fn delete_message(
        &mut self,
        message_id: &str,
        confirm: impl FnOnce(&Message) -> bool,
    ) -> Result<Option<HistoryEdit>> {
        let module = self.active_module()?;
        self.reconciler.delete(&module, message_id, confirm)
    }

    pub fn rollback(&mut self, message_id: &str) -> Result<HistoryEdit> {
        let module = self.active_module()?;
        self.reconciler.rollback(&module, message_id)
    }

    /// Clear history and artifacts of the active module once confirmed.
    ///
    /// Returns whether anything was cleared.
    pub fn clear_conversation(&mut self, confirm: impl FnOnce() -> bool) -> Result<bool> {
        let module = self.active_module()?;
        if !confirm() {
            return Ok(false);
        }
        self.reconciler.clear(&module)?;
        Ok(true)
    }

    fn zoomable_module(&self) -> Result<Arc<ModuleDescriptor>> {
        let module = self.active_module()?;
        if module.kind != ArtifactKind::Svg {
            return Err(Error::Refused(format!(
                "Zoom is not available for {}",
                module.label
            )));
        }
        Ok(module)
    }

    pub fn adjust_zoom(&mut self, delta: f64) -> Result<f64> {
        let module = self.zoomable_module()?;
        Ok(self.reconciler.artifacts().adjust_zoom(&module, delta))
    }

    pub fn reset_zoom(&mut self) -> Result<f64> {
        let module = self.zoomable_module()?;
        Ok(self.reconciler.artifacts().reset_zoom(&module))
    }

    /// Export the selected artifact, or the active one.
    pub fn export(&mut self, artifact_id: Option<&str>, format: ExportFormat) -> Result<ExportedFile> {
        let module = self.active_module()?;
        let artifact = match artifact_id {
            Some(id) => self.reconciler.artifacts().get(&module, id),
            None => self.active_artifact()?,
        }
        .ok_or_else(|| Error::Refused("No artifact to export".to_string()))?;
        export_artifact(&module, &artifact, format)
    }
}
