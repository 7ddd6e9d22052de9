//! Model lifecycle
//!
//! Provides functionality for:
//! - Identifying configured model sets (`ModelKey`, `ModelDescriptor`)
//! - Redirecting component files to hardware-specific variants
//! - Building pipelines through registered factories
//! - Caching loaded pipelines with per-family eviction

pub mod cache;
pub mod descriptor;
pub mod factory;
pub mod key;
pub mod kind;
pub mod variant;

pub use cache::{CachePolicy, LoadStatus, ModelCache};
pub use descriptor::{ComponentConfig, ComponentKind, ModelDescriptor, parse_descriptor};
pub use factory::{
    FactoryRegistry, Pipeline, PipelineFactory, PipelineHandle, PipelineRequest,
    ResolvedComponent, SessionPipeline, SessionPipelineFactory,
};
pub use key::ModelKey;
pub use kind::{ModelFamily, PipelineKind};
pub use variant::set_variant_model_path;
