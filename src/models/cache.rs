//! Cache of loaded pipelines
//!
//! Lifecycle operations (`load`, `unload`) are serialized by one async mutex
//! per cache, so the miss check, eviction, construction and insert happen as
//! one step. Status queries never wait on that mutex; they read a separate
//! slot table that is only locked for short, synchronous updates.
//!
//! ```text
//! load(key) ── hit ──────────────────────────────▶ existing handle
//!     │
//!     └─ miss ─▶ evict family (single instance) ─▶ Loading ─▶ factory
//!                                                    │           │
//!                                        error/drop ─┘           └─▶ Loaded
//!                                        (slot removed)
//! ```

use super::factory::{FactoryRegistry, PipelineHandle, PipelineRequest, ResolvedComponent};
use super::variant::set_variant_model_path;
use super::{ModelDescriptor, ModelFamily, ModelKey, PipelineKind};
use crate::config::SettingsStore;
use crate::error::{OrchestratorError, Result};
use crate::hardware::ExecutionProvider;
use crate::provider::ProviderSelector;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;

/// How many pipelines of one family may stay loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Loading a model unloads every other model of its family
    #[default]
    SingleInstance,
    Multiple,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    Unloaded,
    Loading,
    Loaded,
}

struct Slot {
    kind: PipelineKind,
    handle: Option<PipelineHandle>,
}

impl Slot {
    fn status(&self) -> LoadStatus {
        if self.handle.is_some() {
            LoadStatus::Loaded
        } else {
            LoadStatus::Loading
        }
    }
}

type SlotTable = RwLock<HashMap<ModelKey, Slot>>;

/// Removes a `Loading` slot unless construction completed
///
/// Covers both factory errors and the load future being dropped mid-flight.
struct LoadingGuard<'a> {
    slots: &'a SlotTable,
    key: &'a ModelKey,
    committed: bool,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
            if slots.get(self.key).is_some_and(|s| s.handle.is_none()) {
                slots.remove(self.key);
            }
        }
    }
}

/// Keyed cache of loaded pipelines
pub struct ModelCache {
    settings: Arc<SettingsStore>,
    providers: Arc<ProviderSelector>,
    factories: Arc<FactoryRegistry>,
    descriptors: DashMap<ModelKey, ModelDescriptor>,
    slots: SlotTable,
    lifecycle: Mutex<()>,
}

impl ModelCache {
    /// Create a cache seeded with the model sets from settings
    pub fn new(
        settings: Arc<SettingsStore>,
        providers: Arc<ProviderSelector>,
        factories: Arc<FactoryRegistry>,
    ) -> Self {
        let descriptors = DashMap::new();
        settings.read(|s| {
            for model in &s.models {
                descriptors.insert(model.key(), model.clone());
            }
        });

        Self {
            settings,
            providers,
            factories,
            descriptors,
            slots: RwLock::new(HashMap::new()),
            lifecycle: Mutex::new(()),
        }
    }

    /// Make a model set loadable by key
    pub fn register(&self, descriptor: ModelDescriptor) -> ModelKey {
        let key = descriptor.key();
        self.descriptors.insert(key.clone(), descriptor);
        key
    }

    pub fn policy(&self) -> CachePolicy {
        self.settings.read(|s| s.cache_policy)
    }

    /// Load a pipeline, or return the one already loaded for `key`
    pub async fn load(&self, key: &ModelKey) -> Result<PipelineHandle> {
        let _lifecycle = self.lifecycle.lock().await;

        if let Some(handle) = self.loaded_handle(key) {
            tracing::debug!(model = %key, "Pipeline already loaded");
            return Ok(handle);
        }

        let descriptor = self
            .descriptors
            .get(key)
            .map(|d| d.value().clone())
            .ok_or_else(|| OrchestratorError::UnknownModel(key.clone()))?;
        let factory = self
            .factories
            .get(descriptor.kind)
            .ok_or(OrchestratorError::UnregisteredPipeline(descriptor.kind))?;

        if self.policy() == CachePolicy::SingleInstance {
            for other in self.keys_in_family(descriptor.family()) {
                if &other != key {
                    tracing::info!(model = %other, "Unloading pipeline to make room");
                    self.release(&other);
                }
            }
        }

        let request = self.build_request(&descriptor);
        self.write_slots().insert(
            key.clone(),
            Slot {
                kind: descriptor.kind,
                handle: None,
            },
        );
        let mut guard = LoadingGuard {
            slots: &self.slots,
            key,
            committed: false,
        };

        tracing::info!(
            model = %key,
            name = %descriptor.name,
            kind = %descriptor.kind,
            components = request.components.len(),
            "Loading pipeline"
        );

        let built = tokio::task::spawn_blocking(move || factory.create(&request))
            .await
            .map_err(|e| anyhow::anyhow!("pipeline construction task failed: {}", e))
            .and_then(|result| result);

        let handle = match built {
            Ok(handle) => handle,
            Err(source) => {
                tracing::error!(model = %key, error = %source, "Failed to load pipeline");
                return Err(OrchestratorError::PipelineConstruction {
                    key: key.clone(),
                    source,
                });
            }
        };

        if let Some(slot) = self.write_slots().get_mut(key) {
            slot.handle = Some(handle.clone());
        }
        guard.committed = true;

        crate::metrics::record_pipeline_loaded(descriptor.kind);
        crate::metrics::update_active_pipelines(self.loaded_count());
        tracing::info!(model = %key, "Pipeline loaded");

        Ok(handle)
    }

    /// Unload a pipeline; succeeds whether or not it was loaded
    pub async fn unload(&self, key: &ModelKey) -> bool {
        let _lifecycle = self.lifecycle.lock().await;
        self.release(key);
        true
    }

    /// Unload every pipeline
    pub async fn unload_all(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let keys: Vec<ModelKey> = self.read_slots().keys().cloned().collect();
        for key in keys {
            self.release(&key);
        }
    }

    pub fn is_loaded(&self, key: &ModelKey) -> bool {
        self.status(key) == LoadStatus::Loaded
    }

    pub fn status(&self, key: &ModelKey) -> LoadStatus {
        self.read_slots()
            .get(key)
            .map(Slot::status)
            .unwrap_or(LoadStatus::Unloaded)
    }

    /// Keys of loaded pipelines in a family, sorted
    pub fn loaded_keys(&self, family: ModelFamily) -> Vec<ModelKey> {
        let mut keys: Vec<ModelKey> = self
            .read_slots()
            .iter()
            .filter(|(_, slot)| slot.kind.family() == family && slot.handle.is_some())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn loaded_count(&self) -> usize {
        self.read_slots()
            .values()
            .filter(|slot| slot.handle.is_some())
            .count()
    }

    /// Resolve component paths and sessions for a descriptor
    ///
    /// Each component inherits the model's provider and device unless it
    /// overrides them; NPU components get the pipeline-specific config.
    pub fn build_request(&self, descriptor: &ModelDescriptor) -> PipelineRequest {
        let components = descriptor
            .components
            .iter()
            .map(|component| {
                let path = set_variant_model_path(
                    &descriptor.component_path(component),
                    descriptor.variant.as_deref(),
                );
                let provider = component
                    .execution_provider
                    .or(descriptor.execution_provider);
                let device_id = component.device_id.or(descriptor.device_id);

                let execution = match provider {
                    Some(ExecutionProvider::RyzenAi) => {
                        self.providers.resolve_special(device_id, descriptor.kind)
                    }
                    _ => self.providers.resolve(provider, device_id),
                };

                ResolvedComponent {
                    component: component.component,
                    session: execution.session_config(&path),
                    path,
                }
            })
            .collect();

        PipelineRequest {
            key: descriptor.key(),
            kind: descriptor.kind,
            name: descriptor.name.clone(),
            components,
        }
    }

    fn keys_in_family(&self, family: ModelFamily) -> Vec<ModelKey> {
        self.read_slots()
            .iter()
            .filter(|(_, slot)| slot.kind.family() == family)
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn loaded_handle(&self, key: &ModelKey) -> Option<PipelineHandle> {
        self.read_slots().get(key).and_then(|s| s.handle.clone())
    }

    /// Drop a slot and release its pipeline; caller holds the lifecycle lock
    fn release(&self, key: &ModelKey) {
        let removed = self.write_slots().remove(key);

        if let Some(Slot {
            kind,
            handle: Some(handle),
        }) = removed
        {
            handle.release();
            crate::metrics::record_pipeline_unloaded(kind);
            crate::metrics::update_active_pipelines(self.loaded_count());
            tracing::info!(model = %key, kind = %kind, "Pipeline unloaded");
        }
    }

    fn read_slots(&self) -> std::sync::RwLockReadGuard<'_, HashMap<ModelKey, Slot>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_slots(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<ModelKey, Slot>> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================

#[cfg(test)]
pub mod mocks {
    use super::super::factory::{Pipeline, PipelineFactory};
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Factory counting constructions and releases
    #[derive(Default)]
    pub struct CountingFactory {
        pub created: AtomicUsize,
        pub released: Arc<AtomicUsize>,
        pub fail: AtomicBool,
        pub delay: Option<Duration>,
        pub requests: std::sync::Mutex<Vec<PipelineRequest>>,
    }

    pub struct CountingPipeline {
        kind: PipelineKind,
        released: Arc<AtomicUsize>,
    }

    impl Pipeline for CountingPipeline {
        fn kind(&self) -> PipelineKind {
            self.kind
        }

        fn release(&self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl CountingFactory {
        pub fn created(&self) -> usize {
            self.created.load(Ordering::SeqCst)
        }

        pub fn released(&self) -> usize {
            self.released.load(Ordering::SeqCst)
        }
    }

    impl PipelineFactory for CountingFactory {
        fn create(&self, request: &PipelineRequest) -> anyhow::Result<PipelineHandle> {
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            if let Ok(mut requests) = self.requests.lock() {
                requests.push(request.clone());
            }
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("out of device memory");
            }
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(CountingPipeline {
                kind: request.kind,
                released: self.released.clone(),
            }))
        }
    }
}
