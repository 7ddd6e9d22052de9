//! Model descriptors
//!
//! A descriptor lists the component files of a model set and the
//! provider/device choices for each. Components without an override inherit
//! the model's choice, which in turn falls back to the settings defaults.

use super::{ModelFamily, ModelKey, PipelineKind};
use crate::hardware::ExecutionProvider;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Role of a component model inside a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Tokenizer,
    Tokenizer2,
    TextEncoder,
    TextEncoder2,
    Unet,
    Transformer,
    VaeEncoder,
    VaeDecoder,
    ControlNet,
    /// Single-file models (upscalers, feature extractors, filters)
    Model,
}

impl ComponentKind {
    /// Location of the component inside a standard install layout
    pub fn default_path(&self) -> &'static str {
        match self {
            Self::Tokenizer => "tokenizer/model.onnx",
            Self::Tokenizer2 => "tokenizer_2/model.onnx",
            Self::TextEncoder => "text_encoder/model.onnx",
            Self::TextEncoder2 => "text_encoder_2/model.onnx",
            Self::Unet => "unet/model.onnx",
            Self::Transformer => "transformer/model.onnx",
            Self::VaeEncoder => "vae_encoder/model.onnx",
            Self::VaeDecoder => "vae_decoder/model.onnx",
            Self::ControlNet => "controlnet/model.onnx",
            Self::Model => "model.onnx",
        }
    }

    /// Components that make up a diffusion pipeline layout
    pub const DIFFUSION: [ComponentKind; 9] = [
        Self::Tokenizer,
        Self::Tokenizer2,
        Self::TextEncoder,
        Self::TextEncoder2,
        Self::Unet,
        Self::Transformer,
        Self::VaeEncoder,
        Self::VaeDecoder,
        Self::ControlNet,
    ];
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.default_path().split('/').next().unwrap_or("model");
        f.write_str(name.trim_end_matches(".onnx"))
    }
}

/// One component file of a model set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentConfig {
    pub component: ComponentKind,
    /// Absolute, or relative to the descriptor's root path
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_provider: Option<ExecutionProvider>,
}

impl ComponentConfig {
    pub fn new(component: ComponentKind, path: impl Into<PathBuf>) -> Self {
        Self {
            component,
            path: path.into(),
            device_id: None,
            execution_provider: None,
        }
    }

    pub fn with_provider(mut self, provider: ExecutionProvider, device_id: Option<u32>) -> Self {
        self.execution_provider = Some(provider);
        self.device_id = device_id;
        self
    }
}

/// A configured model set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: Uuid,
    /// Variant subfolder preferred for every component, when present on disk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    pub name: String,
    pub kind: PipelineKind,
    /// Model root directory
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_provider: Option<ExecutionProvider>,
    #[serde(default)]
    pub components: Vec<ComponentConfig>,
}

impl ModelDescriptor {
    pub fn new(name: impl Into<String>, kind: PipelineKind, path: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            variant: None,
            name: name.into(),
            kind,
            path: path.into(),
            device_id: None,
            execution_provider: None,
            components: Vec::new(),
        }
    }

    pub fn with_component(mut self, component: ComponentConfig) -> Self {
        self.components.push(component);
        self
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    pub fn with_provider(mut self, provider: ExecutionProvider, device_id: Option<u32>) -> Self {
        self.execution_provider = Some(provider);
        self.device_id = device_id;
        self
    }

    pub fn key(&self) -> ModelKey {
        ModelKey {
            id: self.id,
            variant: self.variant.clone(),
        }
    }

    pub fn family(&self) -> ModelFamily {
        self.kind.family()
    }

    /// Absolute path of a component before variant substitution
    pub fn component_path(&self, component: &ComponentConfig) -> PathBuf {
        if component.path.is_absolute() {
            component.path.clone()
        } else {
            self.path.join(&component.path)
        }
    }

    /// Build a descriptor from a standard install layout
    ///
    /// Only components whose files exist are listed.
    pub fn from_install_dir(name: impl Into<String>, kind: PipelineKind, dir: &Path) -> Self {
        let candidates: &[ComponentKind] = match kind.family() {
            ModelFamily::StableDiffusion => &ComponentKind::DIFFUSION,
            _ => &[ComponentKind::Model],
        };

        let components = candidates
            .iter()
            .filter(|c| dir.join(c.default_path()).exists())
            .map(|c| ComponentConfig::new(*c, c.default_path()))
            .collect();

        Self {
            components,
            ..Self::new(name, kind, dir)
        }
    }
}

/// Read a descriptor from its JSON file
pub fn parse_descriptor(path: &Path) -> Result<ModelDescriptor> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read model descriptor: {:?}", path))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse model descriptor: {:?}", path))
}
