//! Per-module conversation history.
//!
//! Histories are cached after the first read. Callers always receive copies;
//! changes only take effect through [`ConversationStore::save_history`] or the
//! helpers built on it.

use std::collections::HashMap;

use crate::kv::Storage;
use crate::models::{ContextMessage, ConversationContext, Message, MessageRole};
use crate::registry::ModuleDescriptor;

const HISTORY_KEY: &str = "history";

#[derive(Debug)]
pub struct ConversationStore {
    storage: Storage,
    cache: HashMap<String, Vec<Message>>,
}

impl ConversationStore {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            cache: HashMap::new(),
        }
    }

    fn cached(&mut self, module: &ModuleDescriptor) -> &Vec<Message> {
        self.cache
            .entry(module.storage_namespace.clone())
            .or_insert_with(|| {
                self.storage
                    .namespace(&module.storage_namespace)
                    .get_or_default(HISTORY_KEY)
            })
    }

    /// Ordered messages of `module`, oldest first.
    pub fn history(&mut self, module: &ModuleDescriptor) -> Vec<Message> {
        self.cached(module).clone()
    }

    /// Replace the whole history of `module` in one write.
    #[must_use]
    pub fn save_history(&mut self, module: &ModuleDescriptor, messages: Vec<Message>) -> bool {
        let stored = self
            .storage
            .namespace(&module.storage_namespace)
            .set(HISTORY_KEY, &messages);
        if stored {
            self.cache.insert(module.storage_namespace.clone(), messages);
        }
        stored
    }

    #[must_use]
    pub fn append_message(&mut self, module: &ModuleDescriptor, message: Message) -> bool {
        let mut messages = self.history(module);
        messages.push(message);
        self.save_history(module, messages)
    }

    #[must_use]
    pub fn clear_history(&mut self, module: &ModuleDescriptor) -> bool {
        self.save_history(module, Vec::new())
    }

    /// Position and copy of the message with `id`.
    pub fn find(&mut self, module: &ModuleDescriptor, id: &str) -> Option<(usize, Message)> {
        self.cached(module)
            .iter()
            .enumerate()
            .find(|(_, message)| message.id == id)
            .map(|(index, message)| (index, message.clone()))
    }

    /// Context for the newest user message, or for the user message at or
    /// before `tail` messages from the end.
    ///
    /// Returns `None` when no user message qualifies.
    pub fn build_context(
        &mut self,
        module: &ModuleDescriptor,
        tail: Option<usize>,
    ) -> Option<ConversationContext> {
        let history = self.cached(module);
        let last = history.len().checked_sub(1)?;
        let from = match tail {
            Some(tail) => history.len().saturating_sub(tail).min(last),
            None => last,
        };
        let target_index = (0..=from)
            .rev()
            .find(|&index| history[index].role == MessageRole::User)?;

        Some(ConversationContext {
            user_message: history[target_index].clone(),
            context_messages: context_before(history, target_index, module.context_window),
            target_index,
        })
    }
}

/// Up to `window` turns immediately before `target`, reduced to prompt
/// messages in original order. Error turns count against the window but are
/// left out.
pub fn context_before(history: &[Message], target: usize, window: usize) -> Vec<ContextMessage> {
    let target = target.min(history.len());
    let start = target.saturating_sub(window);
    history[start..target]
        .iter()
        .filter_map(ContextMessage::from_message)
        .collect()
}

#[cfg(test)]
#[path = "conversation_tests.rs"]
mod tests;
