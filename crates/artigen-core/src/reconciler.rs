//! Persistence of finished generations and history surgery.
//!
//! The reconciler is the only writer that touches both the conversation and
//! the artifact store, and it keeps their references consistent: a message's
//! `artifact_id` names an artifact that exists, and every artifact's
//! `message_id` names a surviving message.

use std::collections::HashSet;

use tracing::info;

use crate::artifacts::ArtifactStore;
use crate::conversation::{ConversationStore, context_before};
use crate::error::{Error, Result};
use crate::models::{
    Artifact, ArtifactKind, ArtifactPayload, ContextMessage, ConversationContext, Message,
    MessageRole,
};
use crate::registry::ModuleDescriptor;
use crate::session::{SessionOutcome, StreamScratch};

/// Result of applying a generation outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum AppliedOutcome {
    /// A completed response, with its artifact when one was extracted.
    Finalized {
        message: Message,
        artifact: Option<Artifact>,
    },
    /// A cancelled response. Nothing is stored when no text had arrived.
    Interrupted(Option<Message>),
    Failed(Message),
}

/// What a history operation removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryEdit {
    pub removed_messages: Vec<String>,
    pub removed_artifacts: Vec<String>,
    /// Active artifact after the edit.
    pub active_artifact: Option<String>,
}

/// A regenerate request that has already removed the old answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Regeneration {
    /// The user message to answer again. It stays in the history.
    pub user_message: Message,
    /// Turns before `user_message`, oldest first.
    pub context: Vec<ContextMessage>,
    pub edit: HistoryEdit,
}

#[derive(Debug)]
pub struct ConversationReconciler {
    conversations: ConversationStore,
    artifacts: ArtifactStore,
}

fn stored(ok: bool, what: &str) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(Error::Storage(format!("Failed to save {what}")))
    }
}

impl ConversationReconciler {
    pub fn new(conversations: ConversationStore, artifacts: ArtifactStore) -> Self {
        Self {
            conversations,
            artifacts,
        }
    }

    pub fn conversations(&mut self) -> &mut ConversationStore {
        &mut self.conversations
    }

    pub fn artifacts(&mut self) -> &mut ArtifactStore {
        &mut self.artifacts
    }

    /// Append a user message and build the context to send with it.
    pub fn submit(&mut self, module: &ModuleDescriptor, text: &str) -> Result<ConversationContext> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::Refused("Message is empty".to_string()));
        }
        stored(
            self.conversations
                .append_message(module, Message::user(text)),
            "user message",
        )?;
        self.conversations
            .build_context(module, None)
            .ok_or_else(|| Error::Refused("No user message to send".to_string()))
    }

    /// Store a completed response. Calling it again for the same message id
    /// returns what was stored the first time.
    pub fn finalize(
        &mut self,
        module: &ModuleDescriptor,
        message_id: &str,
        full_text: &str,
        scratch: &StreamScratch,
    ) -> Result<AppliedOutcome> {
        if let Some((_, message)) = self.conversations.find(module, message_id) {
            let artifact = message
                .artifact_id
                .as_deref()
                .and_then(|id| self.artifacts.get(module, id));
            return Ok(AppliedOutcome::Finalized { message, artifact });
        }

        let parsed = module.parse(full_text);
        let artifact = parsed
            .payload
            .filter(|payload| payload.kind() == module.kind)
            .map(|payload| Artifact::new(message_id, with_cached_render(payload, scratch)));

        let content = display_content(
            &parsed.before_text,
            &parsed.after_text,
            artifact.as_ref().map(Artifact::kind),
            full_text,
        );
        let mut message = Message::assistant(message_id, content, full_text);

        if let Some(artifact) = &artifact {
            message.artifact_id = Some(artifact.id.clone());
            stored(
                self.artifacts.save_artifact(module, artifact.clone()),
                "artifact",
            )?;
        }

        if !self.conversations.append_message(module, message.clone()) {
            if let Some(artifact) = &artifact {
                let _ = self.artifacts.remove_artifact(module, &artifact.id);
            }
            return Err(Error::Storage("Failed to save assistant message".to_string()));
        }

        info!(
            module = %module.id,
            message_id,
            artifact = artifact.as_ref().map_or("none", |a| a.id.as_str()),
            "finalized response"
        );
        Ok(AppliedOutcome::Finalized { message, artifact })
    }

    /// Keep the text of a cancelled response without any artifact.
    pub fn record_interrupted(
        &mut self,
        module: &ModuleDescriptor,
        message_id: &str,
        partial_text: &str,
    ) -> Result<Option<Message>> {
        if let Some((_, message)) = self.conversations.find(module, message_id) {
            return Ok(Some(message));
        }
        if partial_text.trim().is_empty() {
            return Ok(None);
        }

        let mut message = Message::assistant(message_id, partial_text.trim(), partial_text);
        message.interrupted = true;
        stored(
            self.conversations.append_message(module, message.clone()),
            "interrupted message",
        )?;
        info!(module = %module.id, message_id, "kept interrupted response");
        Ok(Some(message))
    }

    pub fn record_error(&mut self, module: &ModuleDescriptor, description: &str) -> Result<Message> {
        let message = Message::error(description);
        stored(
            self.conversations.append_message(module, message.clone()),
            "error message",
        )?;
        Ok(message)
    }

    pub fn apply(&mut self, module: &ModuleDescriptor, outcome: SessionOutcome) -> Result<AppliedOutcome> {
        match outcome {
            SessionOutcome::Completed {
                message_id,
                full_text,
                scratch,
            } => self.finalize(module, &message_id, &full_text, &scratch),
            SessionOutcome::Interrupted {
                message_id,
                partial_text,
            } => self
                .record_interrupted(module, &message_id, &partial_text)
                .map(AppliedOutcome::Interrupted),
            SessionOutcome::Failed { description, .. } => self
                .record_error(module, &description)
                .map(AppliedOutcome::Failed),
        }
    }

    /// Delete one message after `confirm` approves it.
    ///
    /// Returns `None` when the deletion was declined.
    pub fn delete(
        &mut self,
        module: &ModuleDescriptor,
        message_id: &str,
        confirm: impl FnOnce(&Message) -> bool,
    ) -> Result<Option<HistoryEdit>> {
        let mut history = self.conversations.history(module);
        let index = position(&history, message_id)?;
        if !confirm(&history[index]) {
            return Ok(None);
        }
        let removed = history.remove(index);
        self.commit(module, history, vec![removed]).map(Some)
    }

    /// Remove every message after an assistant message.
    pub fn rollback(&mut self, module: &ModuleDescriptor, message_id: &str) -> Result<HistoryEdit> {
        let mut history = self.conversations.history(module);
        let index = position(&history, message_id)?;
        if history[index].role != MessageRole::Assistant {
            return Err(Error::Refused(
                "Only assistant messages can be rolled back to".to_string(),
            ));
        }
        if index + 1 == history.len() {
            return Err(Error::Refused("Message is already the newest".to_string()));
        }
        let removed = history.split_off(index + 1);
        self.commit(module, history, removed)
    }

    /// Remove the newest answer and return what is needed to ask again.
    pub fn prepare_regenerate(
        &mut self,
        module: &ModuleDescriptor,
        message_id: &str,
    ) -> Result<Regeneration> {
        let mut history = self.conversations.history(module);
        let index = position(&history, message_id)?;
        if index + 1 != history.len() {
            return Err(Error::Refused(
                "Only the newest message can be regenerated".to_string(),
            ));
        }
        if history[index].role == MessageRole::User {
            return Err(Error::Refused(
                "Only assistant or error messages can be regenerated".to_string(),
            ));
        }
        let user_index = (0..index)
            .rev()
            .find(|&i| history[i].role == MessageRole::User)
            .ok_or_else(|| Error::Refused("No user message to regenerate from".to_string()))?;

        let user_message = history[user_index].clone();
        let context = context_before(&history, user_index, module.context_window);
        let removed = history.split_off(index);
        let edit = self.commit(module, history, removed)?;
        Ok(Regeneration {
            user_message,
            context,
            edit,
        })
    }

    /// Remove the whole conversation and every artifact of `module`.
    pub fn clear(&mut self, module: &ModuleDescriptor) -> Result<()> {
        stored(self.conversations.clear_history(module), "history")?;
        stored(self.artifacts.clear_all(module), "artifacts")?;
        info!(module = %module.id, "cleared conversation");
        Ok(())
    }

    /// Save `remaining` and drop artifacts no surviving message owns.
    fn commit(
        &mut self,
        module: &ModuleDescriptor,
        remaining: Vec<Message>,
        removed: Vec<Message>,
    ) -> Result<HistoryEdit> {
        let surviving: HashSet<&str> = remaining.iter().map(|m| m.id.as_str()).collect();
        let detached: HashSet<&str> = removed
            .iter()
            .filter_map(|m| m.artifact_id.as_deref())
            .collect();
        let doomed: Vec<String> = self
            .artifacts
            .list(module)
            .into_iter()
            .filter(|a| {
                !surviving.contains(a.message_id.as_str()) || detached.contains(a.id.as_str())
            })
            .map(|a| a.id)
            .collect();

        let previous_active = self.artifacts.active_id(module);
        stored(
            self.conversations.save_history(module, remaining.clone()),
            "history",
        )?;
        for id in &doomed {
            stored(self.artifacts.remove_artifact(module, id), "artifacts")?;
        }

        let lost_active = previous_active
            .as_ref()
            .is_some_and(|id| doomed.contains(id));
        if lost_active {
            let replacement = remaining
                .iter()
                .rev()
                .filter_map(|m| m.artifact_id.as_deref())
                .find(|id| self.artifacts.contains(module, id))
                .map(str::to_string);
            stored(
                self.artifacts.set_active(module, replacement.as_deref()),
                "active artifact",
            )?;
        }

        let edit = HistoryEdit {
            removed_messages: removed.into_iter().map(|m| m.id).collect(),
            removed_artifacts: doomed,
            active_artifact: self.artifacts.active_id(module),
        };
        info!(
            module = %module.id,
            messages = edit.removed_messages.len(),
            artifacts = edit.removed_artifacts.len(),
            "history edited"
        );
        Ok(edit)
    }
}

fn position(history: &[Message], message_id: &str) -> Result<usize> {
    history
        .iter()
        .position(|m| m.id == message_id)
        .ok_or_else(|| Error::MessageNotFound(message_id.to_string()))
}

fn with_cached_render(payload: ArtifactPayload, scratch: &StreamScratch) -> ArtifactPayload {
    match payload {
        ArtifactPayload::Mermaid {
            code,
            rendered_svg: None,
        } => {
            let rendered_svg = scratch.rendered_svg_for(&code).map(str::to_string);
            ArtifactPayload::Mermaid { code, rendered_svg }
        }
        other => other,
    }
}

/// Transcript text for a finished response.
fn display_content(
    before: &str,
    after: &str,
    artifact: Option<ArtifactKind>,
    full_text: &str,
) -> String {
    let joined = [before, after]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    if !joined.is_empty() {
        return joined;
    }
    match artifact {
        Some(kind) => kind.placeholder_text().to_string(),
        None => full_text.trim().to_string(),
    }
}
