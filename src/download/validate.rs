//! Post-install artifact checks
//!
//! A transfer that reported success still has to leave every expected file
//! on disk before the template counts as installed.

use super::job::DownloadJob;
use crate::error::DownloadError;
use crate::models::{ComponentKind, ModelFamily};
use std::path::PathBuf;

/// Files a job must leave behind: every downloaded file plus the family's
/// core components
pub fn expected_artifacts(job: &DownloadJob) -> Vec<Vec<PathBuf>> {
    let mut expected: Vec<Vec<PathBuf>> = job
        .files
        .iter()
        .map(|f| vec![f.destination.clone()])
        .collect();

    let core = |c: ComponentKind| job.install_dir.join(c.default_path());
    match job.kind.family() {
        ModelFamily::StableDiffusion => {
            // Either denoiser layout is a valid install
            expected.push(vec![core(ComponentKind::Unet), core(ComponentKind::Transformer)]);
            expected.push(vec![core(ComponentKind::VaeDecoder)]);
        }
        ModelFamily::ControlNet
        | ModelFamily::Upscaler
        | ModelFamily::FeatureExtractor
        | ModelFamily::ContentFilter => {
            // Single-model families need at least one graph file
            let graphs: Vec<PathBuf> = job
                .files
                .iter()
                .filter(|f| f.destination.extension().is_some_and(|e| e == "onnx"))
                .map(|f| f.destination.clone())
                .collect();
            if graphs.is_empty() {
                expected.push(vec![core(ComponentKind::Model)]);
            }
        }
    }

    expected
}

/// Fail with the first artifact group none of whose paths is a file
pub fn validate_install(job: &DownloadJob) -> Result<(), DownloadError> {
    for group in expected_artifacts(job) {
        if !group.iter().any(|path| path.is_file()) {
            let missing = group.into_iter().next().unwrap_or_else(|| job.install_dir.clone());
            tracing::error!(model = %job.name, path = ?missing, "Expected artifact missing");
            return Err(DownloadError::MissingArtifact(missing));
        }
    }

    tracing::debug!(model = %job.name, "Install validated");
    Ok(())
}
