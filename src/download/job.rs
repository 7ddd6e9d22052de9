//! Download templates and jobs
//!
//! A [`ModelTemplate`] is a catalog entry: a remote repository and the
//! files to fetch from it. A [`DownloadJob`] resolves those files to local
//! destinations, mirroring the remote folder layout under the model's
//! install directory.

use crate::error::DownloadError;
use crate::models::PipelineKind;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use uuid::Uuid;

/// Suffix of in-progress files
pub const PARTIAL_SUFFIX: &str = ".download";

/// Downloadable model from the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTemplate {
    pub id: Uuid,
    pub name: String,
    pub kind: PipelineKind,
    /// Base URL that remote file paths are relative to
    pub repository: String,
    /// Remote file paths, `/`-separated
    pub files: Vec<String>,
    /// Directory name under the models root; defaults to the template name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_dir: Option<String>,
    /// A newer revision exists, so an installed copy is fetched again
    #[serde(default)]
    pub update_available: bool,
}

impl ModelTemplate {
    pub fn new(
        name: impl Into<String>,
        kind: PipelineKind,
        repository: impl Into<String>,
        files: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind,
            repository: repository.into(),
            files,
            install_dir: None,
            update_available: false,
        }
    }

    /// Install directory of this template under `models_root`
    pub fn install_path(&self, models_root: &Path) -> PathBuf {
        models_root.join(self.install_dir.as_deref().unwrap_or(&self.name))
    }
}

/// One remote file and its local destination
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadFile {
    pub url: String,
    pub destination: PathBuf,
    pub exists: bool,
    /// Size advertised by the server, once queried
    pub expected_size: Option<u64>,
}

impl DownloadFile {
    /// Sidecar holding the bytes received so far
    pub fn partial_path(&self) -> PathBuf {
        let mut name = self.destination.clone().into_os_string();
        name.push(PARTIAL_SUFFIX);
        PathBuf::from(name)
    }

    /// Bytes already present in the partial file
    pub fn partial_len(&self) -> u64 {
        std::fs::metadata(self.partial_path())
            .map(|m| m.len())
            .unwrap_or(0)
    }

    fn refresh(&mut self) {
        self.exists = match std::fs::metadata(&self.destination) {
            Ok(meta) if meta.is_file() => self.expected_size.is_none_or(|size| meta.len() == size),
            _ => false,
        };
    }
}

/// The files of one template resolved to local paths
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub template_id: Uuid,
    pub name: String,
    pub kind: PipelineKind,
    pub install_dir: PathBuf,
    pub files: Vec<DownloadFile>,
}

impl DownloadJob {
    pub fn new(template: &ModelTemplate, models_root: &Path) -> Result<Self, DownloadError> {
        let install_dir = template.install_path(models_root);
        let repository = template.repository.trim_end_matches('/');

        let files = template
            .files
            .iter()
            .map(|remote| {
                let relative = relative_path(remote)?;
                let mut file = DownloadFile {
                    url: format!("{}/{}", repository, encode_path(remote)),
                    destination: install_dir.join(relative),
                    exists: false,
                    expected_size: None,
                };
                file.refresh();
                Ok(file)
            })
            .collect::<Result<Vec<_>, DownloadError>>()?;

        Ok(Self {
            template_id: template.id,
            name: template.name.clone(),
            kind: template.kind,
            install_dir,
            files,
        })
    }

    /// Re-check which destinations exist with the expected size
    pub fn refresh(&mut self) {
        for file in &mut self.files {
            file.refresh();
        }
    }

    /// Every file is present (and the right size, where known)
    pub fn is_complete(&self) -> bool {
        self.files.iter().all(|f| f.exists)
    }

    pub fn remaining(&self) -> impl Iterator<Item = &DownloadFile> {
        self.files.iter().filter(|f| !f.exists)
    }
}

/// Remote path as a relative local path; rejects anything that would
/// escape the install directory
fn relative_path(remote: &str) -> Result<PathBuf, DownloadError> {
    let path = Path::new(remote.trim_start_matches('/'));
    let safe = path.components().all(|c| matches!(c, Component::Normal(_)));
    if remote.trim().is_empty() || !safe {
        return Err(DownloadError::InvalidPath(remote.to_string()));
    }
    Ok(path.to_path_buf())
}

fn encode_path(remote: &str) -> String {
    remote
        .trim_start_matches('/')
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
