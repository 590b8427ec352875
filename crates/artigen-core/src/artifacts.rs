//! Per-module artifact storage and preview state.
//!
//! Each module keeps a map of artifacts by id and a small UI state holding
//! the active artifact and zoom level. Every mutation is written through
//! immediately.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::kv::Storage;
use crate::models::Artifact;
use crate::registry::ModuleDescriptor;

const ARTIFACTS_KEY: &str = "artifacts";
const UI_STATE_KEY: &str = "uiState";

pub const MIN_ZOOM: f64 = 0.25;
pub const MAX_ZOOM: f64 = 3.0;
pub const ZOOM_STEP: f64 = 0.25;

/// Preview state of one module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UiState {
    pub zoom: f64,
    /// Artifact currently shown in the preview.
    pub active_artifact: Option<String>,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            zoom: 1.0,
            active_artifact: None,
        }
    }
}

#[derive(Debug, Default)]
struct ModuleArtifacts {
    artifacts: BTreeMap<String, Artifact>,
    ui: UiState,
}

#[derive(Debug)]
pub struct ArtifactStore {
    storage: Storage,
    cache: HashMap<String, ModuleArtifacts>,
}

impl ArtifactStore {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            cache: HashMap::new(),
        }
    }

    fn entry(&mut self, module: &ModuleDescriptor) -> &mut ModuleArtifacts {
        self.cache
            .entry(module.storage_namespace.clone())
            .or_insert_with(|| {
                let namespace = self.storage.namespace(&module.storage_namespace);
                ModuleArtifacts {
                    artifacts: namespace.get_or_default(ARTIFACTS_KEY),
                    ui: namespace.get_or_default(UI_STATE_KEY),
                }
            })
    }

    fn persist_artifacts(&self, module: &ModuleDescriptor, artifacts: &BTreeMap<String, Artifact>) -> bool {
        self.storage
            .namespace(&module.storage_namespace)
            .set(ARTIFACTS_KEY, artifacts)
    }

    fn persist_ui(&self, module: &ModuleDescriptor, ui: &UiState) -> bool {
        self.storage
            .namespace(&module.storage_namespace)
            .set(UI_STATE_KEY, ui)
    }

    /// Artifacts of `module`, oldest first.
    pub fn list(&mut self, module: &ModuleDescriptor) -> Vec<Artifact> {
        let mut artifacts: Vec<Artifact> = self.entry(module).artifacts.values().cloned().collect();
        artifacts.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        artifacts
    }

    pub fn get(&mut self, module: &ModuleDescriptor, id: &str) -> Option<Artifact> {
        self.entry(module).artifacts.get(id).cloned()
    }

    pub fn contains(&mut self, module: &ModuleDescriptor, id: &str) -> bool {
        self.entry(module).artifacts.contains_key(id)
    }

    /// Store `artifact` and make it the active one.
    #[must_use]
    pub fn save_artifact(&mut self, module: &ModuleDescriptor, artifact: Artifact) -> bool {
        let id = artifact.id.clone();
        let mut artifacts = self.entry(module).artifacts.clone();
        artifacts.insert(id.clone(), artifact);
        if !self.persist_artifacts(module, &artifacts) {
            return false;
        }
        self.entry(module).artifacts = artifacts;
        self.set_active(module, Some(&id))
    }

    /// Remove an artifact. Clears the active pointer if it pointed here.
    #[must_use]
    pub fn remove_artifact(&mut self, module: &ModuleDescriptor, id: &str) -> bool {
        let mut artifacts = self.entry(module).artifacts.clone();
        if artifacts.remove(id).is_none() {
            return true;
        }
        if !self.persist_artifacts(module, &artifacts) {
            return false;
        }
        self.entry(module).artifacts = artifacts;
        if self.active_id(module).as_deref() == Some(id) {
            return self.set_active(module, None);
        }
        true
    }

    #[must_use]
    pub fn set_active(&mut self, module: &ModuleDescriptor, id: Option<&str>) -> bool {
        let mut ui = self.entry(module).ui.clone();
        ui.active_artifact = id.map(str::to_string);
        self.store_ui(module, ui)
    }

    pub fn active_id(&mut self, module: &ModuleDescriptor) -> Option<String> {
        self.entry(module).ui.active_artifact.clone()
    }

    /// Remove every artifact and reset the preview state.
    #[must_use]
    pub fn clear_all(&mut self, module: &ModuleDescriptor) -> bool {
        let cleared = BTreeMap::new();
        if !self.persist_artifacts(module, &cleared) {
            return false;
        }
        self.entry(module).artifacts = cleared;
        self.store_ui(module, UiState::default())
    }

    pub fn ui_state(&mut self, module: &ModuleDescriptor) -> UiState {
        self.entry(module).ui.clone()
    }

    /// Change the zoom by `delta`, clamped and rounded to two decimals.
    pub fn adjust_zoom(&mut self, module: &ModuleDescriptor, delta: f64) -> f64 {
        let mut ui = self.entry(module).ui.clone();
        ui.zoom = clamp_zoom(ui.zoom + delta);
        let zoom = ui.zoom;
        if !self.store_ui(module, ui) {
            tracing::warn!("Zoom change for {} was not saved", module.id);
        }
        zoom
    }

    pub fn reset_zoom(&mut self, module: &ModuleDescriptor) -> f64 {
        let current = self.entry(module).ui.zoom;
        self.adjust_zoom(module, 1.0 - current)
    }

    fn store_ui(&mut self, module: &ModuleDescriptor, ui: UiState) -> bool {
        if !self.persist_ui(module, &ui) {
            return false;
        }
        self.entry(module).ui = ui;
        true
    }
}

fn clamp_zoom(zoom: f64) -> f64 {
    (zoom.clamp(MIN_ZOOM, MAX_ZOOM) * 100.0).round() / 100.0
}
