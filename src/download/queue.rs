//! Single-worker download queue
//!
//! Install requests are served strictly one at a time in FIFO order. Each
//! entry moves `Queued -> Downloading -> Installed | Errored | Canceled`
//! and keeps its last progress snapshot, error message and timestamps for
//! inspection. A failed entry never stops the queue. Only the most recent
//! [`FINISHED_RETENTION`] finished entries are kept.

use super::job::{DownloadJob, ModelTemplate};
use super::progress::DownloadProgress;
use super::transfer::Transfer;
use super::validate::validate_install;
use crate::config::SettingsStore;
use crate::error::DownloadError;
use crate::models::ModelDescriptor;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const EVENT_CAPACITY: usize = 256;
/// Finished entries kept for inspection; older ones are dropped
pub const FINISHED_RETENTION: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Queued,
    Downloading,
    Installed,
    Errored,
    Canceled,
}

impl DownloadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Installed | Self::Errored | Self::Canceled)
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Installed => "installed",
            Self::Errored => "errored",
            Self::Canceled => "canceled",
        }
    }
}

/// A queued install request and its observable state
#[derive(Debug, Clone, Serialize)]
pub struct DownloadEntry {
    pub id: Uuid,
    pub template_id: Uuid,
    pub name: String,
    pub status: DownloadStatus,
    pub progress: Option<DownloadProgress>,
    pub error_message: Option<String>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Status or progress change of one entry
#[derive(Debug, Clone)]
pub struct DownloadEvent {
    pub entry_id: Uuid,
    pub status: DownloadStatus,
    pub progress: Option<DownloadProgress>,
}

/// Entries by id, in queue order
#[derive(Default)]
struct EntryLog {
    order: VecDeque<Uuid>,
    entries: HashMap<Uuid, DownloadEntry>,
}

impl EntryLog {
    fn push(&mut self, entry: DownloadEntry) {
        self.order.push_back(entry.id);
        self.entries.insert(entry.id, entry);
    }

    fn get(&self, id: Uuid) -> Option<&DownloadEntry> {
        self.entries.get(&id)
    }

    fn get_mut(&mut self, id: Uuid) -> Option<&mut DownloadEntry> {
        self.entries.get_mut(&id)
    }

    fn list(&self) -> Vec<DownloadEntry> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id))
            .cloned()
            .collect()
    }

    /// Drop the oldest finished entries until at most `keep` remain
    fn prune(&mut self, keep: usize) -> usize {
        let finished = self.entries.values().filter(|e| e.status.is_terminal()).count();
        let mut excess = finished.saturating_sub(keep);
        if excess == 0 {
            return 0;
        }

        let removed = excess;
        let entries = &mut self.entries;
        self.order.retain(|id| {
            let terminal = entries.get(id).is_some_and(|e| e.status.is_terminal());
            if excess > 0 && terminal {
                entries.remove(id);
                excess -= 1;
                false
            } else {
                true
            }
        });
        removed
    }
}

struct Request {
    template: ModelTemplate,
    force: bool,
}

struct QueueState {
    settings: Arc<SettingsStore>,
    transfer: Transfer,
    entries: Mutex<EntryLog>,
    requests: DashMap<Uuid, Request>,
    tokens: DashMap<Uuid, CancellationToken>,
    events: broadcast::Sender<DownloadEvent>,
}

pub struct DownloadQueue {
    state: Arc<QueueState>,
    sender: mpsc::UnboundedSender<Uuid>,
    shutdown: CancellationToken,
    worker: JoinHandle<()>,
}

impl DownloadQueue {
    /// Start the queue worker on the current runtime
    pub fn start(settings: Arc<SettingsStore>, transfer: Transfer) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shutdown = CancellationToken::new();

        let state = Arc::new(QueueState {
            settings,
            transfer,
            entries: Mutex::new(EntryLog::default()),
            requests: DashMap::new(),
            tokens: DashMap::new(),
            events,
        });

        let worker = tokio::spawn(run_worker(state.clone(), receiver, shutdown.clone()));

        Self {
            state,
            sender,
            shutdown,
            worker,
        }
    }

    /// Queue the catalog template `template_id`
    pub fn enqueue(&self, template_id: Uuid, force: bool) -> Result<Uuid, DownloadError> {
        let template = self
            .state
            .settings
            .read(|s| s.templates.iter().find(|t| t.id == template_id).cloned())
            .ok_or(DownloadError::UnknownTemplate(template_id))?;
        Ok(self.enqueue_template(template, force))
    }

    /// Queue `template`; `force` re-downloads an installed model
    pub fn enqueue_template(&self, template: ModelTemplate, force: bool) -> Uuid {
        let id = Uuid::new_v4();
        let entry = DownloadEntry {
            id,
            template_id: template.id,
            name: template.name.clone(),
            status: DownloadStatus::Queued,
            progress: None,
            error_message: None,
            queued_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };

        tracing::info!(entry = %id, model = %template.name, force, "Download queued");
        self.state.lock_entries().push(entry);
        self.state
            .tokens
            .insert(id, self.shutdown.child_token());
        self.state.requests.insert(id, Request { template, force });
        self.state.emit(id, DownloadStatus::Queued, None);

        if self.sender.send(id).is_err() {
            // Worker is gone; the entry can never run
            self.state.finish(
                id,
                DownloadStatus::Canceled,
                Some(DownloadError::Canceled.to_string()),
            );
        }
        id
    }

    /// Cancel a queued or active entry
    ///
    /// Returns false when the entry is unknown or already finished.
    pub fn cancel(&self, id: Uuid) -> bool {
        let Some(token) = self.state.tokens.get(&id).map(|t| t.clone()) else {
            return false;
        };
        token.cancel();

        // Queued entries never reach the transfer, so close them here. Active
        // ones are closed by the worker once the transfer stops.
        let was_queued = self.state.transition(id, DownloadStatus::Queued, |entry| {
            entry.status = DownloadStatus::Canceled;
            entry.error_message = Some(DownloadError::Canceled.to_string());
            entry.finished_at = Some(Utc::now());
        });
        if was_queued {
            self.state.requests.remove(&id);
            self.state.tokens.remove(&id);
            self.state.prune_finished(FINISHED_RETENTION);
            self.state.emit(id, DownloadStatus::Canceled, None);
            crate::metrics::record_download_outcome(DownloadStatus::Canceled.as_str());
            tracing::info!(entry = %id, "Queued download canceled");
        }
        true
    }

    /// All entries in FIFO order
    pub fn entries(&self) -> Vec<DownloadEntry> {
        self.state.lock_entries().list()
    }

    /// Forget every finished entry; returns how many were removed
    pub fn clear_finished(&self) -> usize {
        self.state.prune_finished(0)
    }

    pub fn entry(&self, id: Uuid) -> Option<DownloadEntry> {
        self.state.entry(id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.state.events.subscribe()
    }

    /// Wait until the entry reaches a terminal status
    ///
    /// Returns `None` for unknown entries and for ones already pruned.
    pub async fn wait(&self, id: Uuid) -> Option<DownloadEntry> {
        let mut events = self.state.events.subscribe();
        loop {
            let entry = self.state.entry(id)?;
            if entry.status.is_terminal() {
                return Some(entry);
            }
            match events.recv().await {
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return self.state.entry(id),
            }
        }
    }

    /// Cancel the active transfer and stop the worker
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.worker.await {
            tracing::warn!(error = %e, "Download worker ended abnormally");
        }
    }
}

async fn run_worker(
    state: Arc<QueueState>,
    mut receiver: mpsc::UnboundedReceiver<Uuid>,
    shutdown: CancellationToken,
) {
    tracing::debug!("Download worker started");
    loop {
        let id = tokio::select! {
            _ = shutdown.cancelled() => break,
            id = receiver.recv() => match id {
                Some(id) => id,
                None => break,
            },
        };
        state.process(id).await;
    }
    tracing::debug!("Download worker stopped");
}

impl QueueState {
    async fn process(&self, id: Uuid) {
        let Some((_, request)) = self.requests.remove(&id) else {
            return;
        };
        let Some(token) = self.tokens.get(&id).map(|t| t.clone()) else {
            return;
        };

        let started = self.transition(id, DownloadStatus::Queued, |entry| {
            entry.status = DownloadStatus::Downloading;
            entry.started_at = Some(Utc::now());
        });
        if !started {
            return;
        }
        self.emit(id, DownloadStatus::Downloading, None);

        let result = self.install(id, &request, &token).await;
        self.tokens.remove(&id);

        match result {
            Ok(()) => {
                tracing::info!(entry = %id, model = %request.template.name, "Model installed");
                self.finish(id, DownloadStatus::Installed, None);
            }
            Err(e) if e.is_canceled() => {
                tracing::info!(entry = %id, model = %request.template.name, "Download canceled");
                self.finish(id, DownloadStatus::Canceled, Some(e.to_string()));
            }
            Err(e) => {
                let message = format!("{:#}", anyhow::Error::from(e));
                tracing::error!(entry = %id, model = %request.template.name, error = %message, "Download failed");
                self.finish(id, DownloadStatus::Errored, Some(message));
            }
        }
    }

    async fn install(
        &self,
        id: Uuid,
        request: &Request,
        cancel: &CancellationToken,
    ) -> crate::Result<()> {
        let template = &request.template;
        let models_root = self.settings.read(|s| s.directories.models.clone());
        let mut job = DownloadJob::new(template, &models_root)?;

        if job.is_complete() {
            if !request.force && !template.update_available {
                tracing::info!(model = %template.name, "Already installed, skipping download");
                validate_install(&job)?;
                return self.register(&job);
            }

            // Fetch again: drop the installed copies, keep any partials
            for file in job.files.iter().filter(|f| f.exists) {
                tokio::fs::remove_file(&file.destination)
                    .await
                    .map_err(DownloadError::from)?;
            }
            job.refresh();
        }

        self.transfer
            .download_job(&mut job, cancel, |progress| self.record_progress(id, progress))
            .await?;

        validate_install(&job)?;
        self.register(&job)
    }

    /// Add the installed model to the settings unless already listed
    fn register(&self, job: &DownloadJob) -> crate::Result<()> {
        let descriptor = ModelDescriptor::from_install_dir(&job.name, job.kind, &job.install_dir);
        let added = self.settings.update(|s| {
            if s.models.iter().any(|m| m.path == job.install_dir) {
                false
            } else {
                s.models.push(descriptor);
                true
            }
        })?;

        if added {
            tracing::info!(model = %job.name, path = ?job.install_dir, "Registered installed model");
        }
        Ok(())
    }

    fn record_progress(&self, id: Uuid, progress: DownloadProgress) {
        {
            if let Some(entry) = self.lock_entries().get_mut(id) {
                entry.progress = Some(progress.clone());
            }
        }
        tracing::debug!(
            entry = %id,
            file = %progress.file,
            file_percent = progress.file_percent,
            total_percent = progress.total_percent,
            "Download progress"
        );
        self.emit(id, DownloadStatus::Downloading, Some(progress));
    }

    fn finish(&self, id: Uuid, status: DownloadStatus, error_message: Option<String>) {
        {
            if let Some(entry) = self.lock_entries().get_mut(id) {
                entry.status = status;
                entry.error_message = error_message;
                entry.finished_at = Some(Utc::now());
            }
        }
        self.prune_finished(FINISHED_RETENTION);
        crate::metrics::record_download_outcome(status.as_str());
        self.emit(id, status, None);
    }

    fn prune_finished(&self, keep: usize) -> usize {
        let removed = self.lock_entries().prune(keep);
        if removed > 0 {
            tracing::debug!(removed, keep, "Pruned finished download entries");
        }
        removed
    }

    /// Apply `f` if the entry is in `from`; atomic with respect to other
    /// transitions
    fn transition(
        &self,
        id: Uuid,
        from: DownloadStatus,
        f: impl FnOnce(&mut DownloadEntry),
    ) -> bool {
        match self.lock_entries().get_mut(id) {
            Some(entry) if entry.status == from => {
                f(entry);
                true
            }
            _ => false,
        }
    }

    fn entry(&self, id: Uuid) -> Option<DownloadEntry> {
        self.lock_entries().get(id).cloned()
    }

    fn emit(&self, entry_id: Uuid, status: DownloadStatus, progress: Option<DownloadProgress>) {
        // No receivers is fine
        let _ = self.events.send(DownloadEvent {
            entry_id,
            status,
            progress,
        });
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, EntryLog> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
