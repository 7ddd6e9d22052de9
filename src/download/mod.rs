//! Model downloads
//!
//! Provides functionality for:
//! - Resolving catalog templates to local install paths
//! - Resumable HTTP transfers with throttled progress
//! - Validating installed artifacts
//! - A single-worker FIFO install queue

pub mod job;
pub mod progress;
pub mod queue;
pub mod transfer;
pub mod validate;

pub use job::{DownloadFile, DownloadJob, ModelTemplate, PARTIAL_SUFFIX};
pub use progress::{DownloadProgress, ProgressTracker, progress_step};
pub use queue::{DownloadEntry, DownloadEvent, DownloadQueue, DownloadStatus, FINISHED_RETENTION};
pub use transfer::Transfer;
pub use validate::{expected_artifacts, validate_install};
