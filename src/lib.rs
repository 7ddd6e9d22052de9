//! Amuse orchestrator - device selection, model cache and model downloads
//!
//! The orchestration layer behind ONNX diffusion pipelines: detects compute
//! devices and the execution providers they support, resolves session
//! configurations, caches loaded pipelines per model family, and installs
//! model files through a resumable single-worker download queue.

pub mod config;
pub mod download;
pub mod error;
pub mod hardware;
pub mod metrics;
pub mod models;
pub mod provider;
pub mod session;
pub mod version;

pub use config::{Settings, SettingsStore};
pub use download::{DownloadEntry, DownloadQueue, DownloadStatus, ModelTemplate, Transfer};
pub use error::{DownloadError, OrchestratorError, Result};
pub use hardware::{
    Device, DeviceKind, ExecutionProvider, HardwareInventory, HardwareProfile, SystemPlatform,
};
pub use models::{
    CachePolicy, FactoryRegistry, ModelCache, ModelDescriptor, ModelKey, PipelineKind,
};
pub use provider::{ExecutionConfig, ProviderSelector, SessionConfig};
pub use session::{InferenceSession, SessionFactory};
pub use version::DriverVersion;
