//! Execution provider selection and per-model session configuration
//!
//! [`ProviderSelector`] maps an optional (provider, device) pair onto an
//! [`ExecutionConfig`], filling gaps from the settings defaults. The
//! execution config then produces a [`SessionConfig`] for each model file,
//! which is where provider-specific tuning lands: device indices, GPU
//! compilation caches, and the NPU dispatch entries that depend on which
//! part of a pipeline the model file is.

use crate::config::SettingsStore;
use crate::hardware::ExecutionProvider;
use crate::models::PipelineKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Session config entry naming the NPU model family
pub const NPU_MODEL_FAMILY_KEY: &str = "dd_model_family";
/// Session config entry pointing at the NPU kernel cache
pub const NPU_CACHE_DIR_KEY: &str = "dd_cache";
/// Session config entry pointing at the dynamic dispatch root
pub const NPU_DISPATCH_DIR_KEY: &str = "dd_root";
/// Session config entry carrying the pipeline kind for special sessions
pub const NPU_PIPELINE_KEY: &str = "dd_pipeline";

/// How many trailing directories of a model path are searched for a family
const FAMILY_SEARCH_DEPTH: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Sequential,
    Parallel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphOptimizationLevel {
    Disabled,
    Basic,
    Extended,
    All,
}

/// Everything the native runtime needs to open one model file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub provider: ExecutionProvider,
    pub device_id: u32,
    pub execution_mode: ExecutionMode,
    pub optimization_level: GraphOptimizationLevel,
    /// Session-level config entries
    pub entries: BTreeMap<String, String>,
    /// Options passed when registering the provider backend
    pub provider_options: BTreeMap<String, String>,
    /// Custom-op libraries to load, in order
    pub custom_op_libraries: Vec<PathBuf>,
}

impl SessionConfig {
    /// Sequential execution with graph optimizations disabled; model files
    /// are optimized offline.
    pub fn new(provider: ExecutionProvider, device_id: u32) -> Self {
        Self {
            provider,
            device_id,
            execution_mode: ExecutionMode::Sequential,
            optimization_level: GraphOptimizationLevel::Disabled,
            entries: BTreeMap::new(),
            provider_options: BTreeMap::new(),
            custom_op_libraries: Vec::new(),
        }
    }
}

/// Maps a path segment onto an NPU model-family key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NpuFamilyRule {
    /// Directory name to look for, compared case-insensitively
    pub segment: String,
    /// Family key injected into the session
    pub family: String,
}

impl NpuFamilyRule {
    pub fn new(segment: impl Into<String>, family: impl Into<String>) -> Self {
        Self {
            segment: segment.into(),
            family: family.into(),
        }
    }
}

/// Ordered rule table classifying model files for the NPU provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NpuFamilyTable {
    rules: Vec<NpuFamilyRule>,
}

impl Default for NpuFamilyTable {
    fn default() -> Self {
        Self {
            rules: vec![
                NpuFamilyRule::new("unet", "unet"),
                NpuFamilyRule::new("controlnet", "controlnet"),
                NpuFamilyRule::new("transformer", "transformer"),
                NpuFamilyRule::new("vae_encoder", "vae_encoder"),
                NpuFamilyRule::new("vae_decoder", "vae_decoder"),
                NpuFamilyRule::new("text_encoder", "text_encoder"),
            ],
        }
    }
}

impl NpuFamilyTable {
    /// Built-in table with `extra` rules taking precedence
    pub fn with_rules(extra: &[NpuFamilyRule]) -> Self {
        let mut rules = extra.to_vec();
        rules.extend(Self::default().rules);
        Self { rules }
    }

    /// Classify a model file by its trailing directories
    ///
    /// The nearest directory wins, so `unet/RyzenAI/model.onnx` resolves to
    /// the `unet` family even though a variant folder sits in between.
    pub fn classify(&self, model_path: &Path) -> Option<&str> {
        let dirs: Vec<&str> = model_path
            .parent()?
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => s.to_str(),
                _ => None,
            })
            .collect();

        dirs.iter().rev().take(FAMILY_SEARCH_DEPTH).find_map(|dir| {
            self.rules
                .iter()
                .find(|rule| rule.segment.eq_ignore_ascii_case(dir))
                .map(|rule| rule.family.as_str())
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Backend {
    Cpu,
    DirectMl,
    MiGraphX {
        cache_dir: PathBuf,
    },
    RyzenAi {
        cache_dir: PathBuf,
        dispatch_dir: Option<PathBuf>,
        custom_op_library: Option<PathBuf>,
        families: Arc<NpuFamilyTable>,
        pipeline: Option<PipelineKind>,
    },
}

/// A resolved provider/device pair able to configure sessions per model file
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConfig {
    pub provider: ExecutionProvider,
    pub device_id: u32,
    backend: Backend,
}

impl ExecutionConfig {
    /// Baseline CPU configuration
    pub fn cpu() -> Self {
        Self {
            provider: ExecutionProvider::Cpu,
            device_id: 0,
            backend: Backend::Cpu,
        }
    }

    /// Session configuration for a specific model file
    pub fn session_config(&self, model_path: &Path) -> SessionConfig {
        let mut config = SessionConfig::new(self.provider, self.device_id);

        match &self.backend {
            Backend::Cpu => {}
            Backend::DirectMl => {
                config
                    .provider_options
                    .insert("device_id".into(), self.device_id.to_string());
                // DirectML does not support memory pattern optimization
                config
                    .entries
                    .insert("session.disable_mem_pattern".into(), "1".into());
            }
            Backend::MiGraphX { cache_dir } => {
                config
                    .provider_options
                    .insert("device_id".into(), self.device_id.to_string());
                config.provider_options.insert(
                    "migraphx_model_cache_dir".into(),
                    cache_dir.to_string_lossy().into_owned(),
                );
            }
            Backend::RyzenAi {
                cache_dir,
                dispatch_dir,
                custom_op_library,
                families,
                pipeline,
            } => {
                // Entries must be in place before the custom-op library loads
                match families.classify(model_path) {
                    Some(family) => {
                        config
                            .entries
                            .insert(NPU_MODEL_FAMILY_KEY.into(), family.to_string());
                        config.entries.insert(
                            NPU_CACHE_DIR_KEY.into(),
                            cache_dir.join(family).to_string_lossy().into_owned(),
                        );
                    }
                    None => {
                        tracing::debug!(
                            model = ?model_path,
                            "Model path matches no NPU family, using shared kernel cache"
                        );
                        config.entries.insert(
                            NPU_CACHE_DIR_KEY.into(),
                            cache_dir.to_string_lossy().into_owned(),
                        );
                    }
                }
                if let Some(dir) = dispatch_dir {
                    config.entries.insert(
                        NPU_DISPATCH_DIR_KEY.into(),
                        dir.to_string_lossy().into_owned(),
                    );
                }
                if let Some(kind) = pipeline {
                    config
                        .entries
                        .insert(NPU_PIPELINE_KEY.into(), kind.as_str().to_string());
                }
                if let Some(library) = custom_op_library {
                    config.custom_op_libraries.push(library.clone());
                }
            }
        }

        config
    }
}

/// Resolves execution configurations from explicit choices and settings
pub struct ProviderSelector {
    settings: Arc<SettingsStore>,
}

impl ProviderSelector {
    pub fn new(settings: Arc<SettingsStore>) -> Self {
        Self { settings }
    }

    /// Resolve a provider/device pair, falling back to the configured defaults
    pub fn resolve(
        &self,
        provider: Option<ExecutionProvider>,
        device_id: Option<u32>,
    ) -> ExecutionConfig {
        let (provider, device_id) = self.settings.read(|s| {
            (
                provider
                    .or(s.default_execution_provider)
                    .unwrap_or(ExecutionProvider::Cpu),
                device_id.or(s.default_device_id).unwrap_or(0),
            )
        });

        self.build(provider, device_id, None)
    }

    /// Resolve by provider name; unknown names select the CPU provider
    pub fn resolve_named(&self, provider: Option<&str>, device_id: Option<u32>) -> ExecutionConfig {
        let provider = provider.map(|name| name.parse().unwrap_or(ExecutionProvider::Cpu));
        self.resolve(provider, device_id)
    }

    /// Vendor NPU configuration specialised for a pipeline kind
    pub fn resolve_special(&self, device_id: Option<u32>, kind: PipelineKind) -> ExecutionConfig {
        let device_id = device_id
            .or_else(|| self.settings.read(|s| s.default_device_id))
            .unwrap_or(0);
        self.build(ExecutionProvider::RyzenAi, device_id, Some(kind))
    }

    fn build(
        &self,
        provider: ExecutionProvider,
        device_id: u32,
        pipeline: Option<PipelineKind>,
    ) -> ExecutionConfig {
        let backend = self.settings.read(|s| match provider {
            ExecutionProvider::Cpu => Backend::Cpu,
            ExecutionProvider::DirectMl => Backend::DirectMl,
            ExecutionProvider::MiGraphX => Backend::MiGraphX {
                cache_dir: s.directories.cache.join("migraphx"),
            },
            ExecutionProvider::RyzenAi => Backend::RyzenAi {
                cache_dir: s.directories.cache.join("ryzenai"),
                dispatch_dir: s.npu.dispatch_directory.clone(),
                custom_op_library: s.npu.custom_op_library.clone(),
                families: Arc::new(NpuFamilyTable::with_rules(&s.npu.family_rules)),
                pipeline,
            },
        });

        tracing::debug!(provider = %provider, device_id, "Resolved execution config");

        ExecutionConfig {
            provider,
            device_id,
            backend,
        }
    }
}
