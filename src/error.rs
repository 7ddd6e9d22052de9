//! Error types for the orchestration layer

use crate::models::{ModelKey, PipelineKind};
use std::path::PathBuf;

/// Result alias used across the crate
pub type Result<T, E = OrchestratorError> = std::result::Result<T, E>;

/// Errors surfaced by the model cache, settings store and download manager
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("model {0} is not registered")]
    UnknownModel(ModelKey),

    /// No factory was registered for the pipeline kind. This is a wiring
    /// fault in the host, not something a retry can fix.
    #[error("no pipeline factory registered for {0}")]
    UnregisteredPipeline(PipelineKind),

    #[error("failed to construct pipeline for {key}")]
    PipelineConstruction {
        key: ModelKey,
        #[source]
        source: anyhow::Error,
    },

    #[error("settings error")]
    Settings(#[source] anyhow::Error),

    #[error(transparent)]
    Download(#[from] DownloadError),
}

/// Errors produced while transferring or validating model files
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("Download canceled")]
    Canceled,

    /// Header queries reported nothing to fetch for files that are missing.
    #[error("remote files for {0} report a total size of zero bytes")]
    ZeroTotalSize(String),

    /// A headers-only request did not report the file size
    #[error("remote file {0} did not report its size")]
    UnknownSize(String),

    #[error("request to {url} failed with status {status}")]
    Http { url: String, status: u16 },

    #[error("network error")]
    Network(#[from] reqwest::Error),

    #[error("i/o error")]
    Io(#[from] std::io::Error),

    #[error("{path:?} is {actual} bytes, expected {expected}")]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("expected artifact {0:?} is missing after download")]
    MissingArtifact(PathBuf),

    #[error("unknown download template {0}")]
    UnknownTemplate(uuid::Uuid),

    /// Remote file path escapes the install directory
    #[error("invalid remote file path {0:?}")]
    InvalidPath(String),
}

impl DownloadError {
    /// Whether the error came from cancellation rather than a fault
    pub fn is_canceled(&self) -> bool {
        matches!(self, DownloadError::Canceled)
    }
}

impl OrchestratorError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, OrchestratorError::Download(e) if e.is_canceled())
    }
}
