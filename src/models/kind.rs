//! Pipeline kinds and the model families they belong to

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tag selecting which pipeline implementation builds a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineKind {
    StableDiffusion,
    #[serde(rename = "StableDiffusionXL")]
    StableDiffusionXl,
    StableDiffusion3,
    Flux,
    LatentConsistency,
    StableCascade,
    StableVideoDiffusion,
    ControlNet,
    Upscaler,
    FeatureExtractor,
    ContentFilter,
}

/// Group of pipeline kinds sharing one cache eviction domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    StableDiffusion,
    ControlNet,
    Upscaler,
    FeatureExtractor,
    ContentFilter,
}

impl PipelineKind {
    pub fn family(&self) -> ModelFamily {
        match self {
            Self::StableDiffusion
            | Self::StableDiffusionXl
            | Self::StableDiffusion3
            | Self::Flux
            | Self::LatentConsistency
            | Self::StableCascade
            | Self::StableVideoDiffusion => ModelFamily::StableDiffusion,
            Self::ControlNet => ModelFamily::ControlNet,
            Self::Upscaler => ModelFamily::Upscaler,
            Self::FeatureExtractor => ModelFamily::FeatureExtractor,
            Self::ContentFilter => ModelFamily::ContentFilter,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StableDiffusion => "StableDiffusion",
            Self::StableDiffusionXl => "StableDiffusionXL",
            Self::StableDiffusion3 => "StableDiffusion3",
            Self::Flux => "Flux",
            Self::LatentConsistency => "LatentConsistency",
            Self::StableCascade => "StableCascade",
            Self::StableVideoDiffusion => "StableVideoDiffusion",
            Self::ControlNet => "ControlNet",
            Self::Upscaler => "Upscaler",
            Self::FeatureExtractor => "FeatureExtractor",
            Self::ContentFilter => "ContentFilter",
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StableDiffusion => write!(f, "stable_diffusion"),
            Self::ControlNet => write!(f, "control_net"),
            Self::Upscaler => write!(f, "upscaler"),
            Self::FeatureExtractor => write!(f, "feature_extractor"),
            Self::ContentFilter => write!(f, "content_filter"),
        }
    }
}
