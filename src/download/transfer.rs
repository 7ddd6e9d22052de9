//! Resumable HTTP transfer
//!
//! Files stream into a `.download` sidecar that is renamed over the
//! destination only once the full advertised size is on disk. An existing
//! sidecar resumes with a `Range: bytes=N-` request. Cancellation is checked
//! before every read and at every file boundary, and leaves the sidecar in
//! place; HTTP status errors and size mismatches delete it.

use super::job::{DownloadFile, DownloadJob};
use super::progress::{DownloadProgress, ProgressTracker};
use crate::error::DownloadError;
use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_LENGTH, RANGE};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Longest silence tolerated between two reads of one response
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP client for model files
#[derive(Debug, Clone)]
pub struct Transfer {
    client: reqwest::Client,
}

impl Transfer {
    pub fn new() -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_TIMEOUT)
            .user_agent(concat!("amuse-orchestrator/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Size of a remote file from a headers-only request
    ///
    /// A response without a `Content-Length` header fails with
    /// [`DownloadError::UnknownSize`].
    pub async fn content_length(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<u64, DownloadError> {
        let response = send(self.client.head(url), cancel).await?;
        if !response.status().is_success() {
            return Err(DownloadError::Http {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        // content_length() reflects the (empty) body of a HEAD response
        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
            .ok_or_else(|| DownloadError::UnknownSize(url.to_string()))
    }

    /// Fetch every missing file of `job`
    ///
    /// Sizes of the remaining files are queried first; a zero total for
    /// files that are missing is reported as [`DownloadError::ZeroTotalSize`].
    pub async fn download_job<F>(
        &self,
        job: &mut DownloadJob,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<(), DownloadError>
    where
        F: FnMut(DownloadProgress) + Send,
    {
        job.refresh();
        let remaining: Vec<usize> = (0..job.files.len())
            .filter(|&i| !job.files[i].exists)
            .collect();
        if remaining.is_empty() {
            tracing::debug!(model = %job.name, "All files present, nothing to download");
            return Ok(());
        }

        let mut total = 0u64;
        for &index in &remaining {
            if cancel.is_cancelled() {
                return Err(DownloadError::Canceled);
            }
            let file = &mut job.files[index];
            let size = self.content_length(&file.url, cancel).await?;
            file.expected_size = Some(size);
            total += size;
        }
        if total == 0 {
            return Err(DownloadError::ZeroTotalSize(job.name.clone()));
        }

        let mut tracker = ProgressTracker::new(total);
        for &index in &remaining {
            let file = &job.files[index];
            tracker.advance(file.partial_len().min(file.expected_size.unwrap_or(0)));
        }

        tracing::info!(
            model = %job.name,
            files = remaining.len(),
            total_bytes = total,
            resumed_bytes = tracker.downloaded(),
            "Starting download"
        );

        for &index in &remaining {
            if cancel.is_cancelled() {
                return Err(DownloadError::Canceled);
            }
            let label = display_name(&job.install_dir, &job.files[index].destination);
            let file = &mut job.files[index];
            self.download_file(file, &label, &mut tracker, cancel, &mut on_progress)
                .await?;
        }

        Ok(())
    }

    async fn download_file<F>(
        &self,
        file: &mut DownloadFile,
        label: &str,
        tracker: &mut ProgressTracker,
        cancel: &CancellationToken,
        on_progress: &mut F,
    ) -> Result<(), DownloadError>
    where
        F: FnMut(DownloadProgress) + Send,
    {
        let size = file.expected_size.unwrap_or(0);
        let partial = file.partial_path();
        if let Some(parent) = partial.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut offset = file.partial_len();
        if offset > size {
            tracing::warn!(file = label, offset, size, "Partial file larger than remote, restarting");
            tokio::fs::remove_file(&partial).await?;
            tracker.rewind(size);
            offset = 0;
        }

        if offset < size || !partial.exists() {
            let mut request = self.client.get(&file.url);
            if offset > 0 {
                request = request.header(RANGE, format!("bytes={}-", offset));
                tracing::debug!(file = label, offset, "Resuming download");
            }

            let response = send(request, cancel).await?;
            let status = response.status();
            if !status.is_success() {
                remove_partial(&partial).await;
                return Err(DownloadError::Http {
                    url: file.url.clone(),
                    status: status.as_u16(),
                });
            }
            if offset > 0 && status != StatusCode::PARTIAL_CONTENT {
                tracing::warn!(file = label, offset, "Server ignored range request, restarting from zero");
                tracker.rewind(offset);
                offset = 0;
            }

            let mut output = tokio::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .append(offset > 0)
                .truncate(offset == 0)
                .open(&partial)
                .await?;

            let mut received = offset;
            let mut stream = response.bytes_stream();
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        output.flush().await?;
                        tracing::info!(file = label, received, "Download canceled, partial kept");
                        return Err(DownloadError::Canceled);
                    }
                    next = stream.next() => next,
                };
                let Some(chunk) = next else {
                    break;
                };

                // Transport errors keep the partial for a later resume
                let chunk = chunk?;
                output.write_all(&chunk).await?;

                let len = chunk.len() as u64;
                received += len;
                tracker.advance(len);
                crate::metrics::record_download_bytes(len);
                if let Some(progress) = tracker.report(label, received, size) {
                    on_progress(progress);
                }
            }

            output.flush().await?;
            output.sync_all().await?;
        }

        let actual = tokio::fs::metadata(&partial).await?.len();
        if actual != size {
            remove_partial(&partial).await;
            return Err(DownloadError::SizeMismatch {
                path: file.destination.clone(),
                expected: size,
                actual,
            });
        }

        tokio::fs::rename(&partial, &file.destination).await?;
        file.exists = true;
        tracing::debug!(file = label, bytes = size, "File complete");

        if let Some(progress) = tracker.report(label, size, size) {
            on_progress(progress);
        }
        Ok(())
    }
}

/// Send a request unless `cancel` fires before the response headers arrive
async fn send(
    request: reqwest::RequestBuilder,
    cancel: &CancellationToken,
) -> Result<reqwest::Response, DownloadError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DownloadError::Canceled),
        response = request.send() => Ok(response?),
    }
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = ?path, error = %e, "Failed to remove partial file");
    }
}

fn display_name(root: &Path, destination: &Path) -> String {
    destination
        .strip_prefix(root)
        .unwrap_or(destination)
        .to_string_lossy()
        .into_owned()
}
