// MediaCore - Download queue and media preloading engine
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Download queue engine
//!
//! # Download Queue Management
//! - FIFO admission queue, no priority reordering
//! - Configurable concurrent download limit (default: 3)
//! - Per-item state machine, failures isolated per id
//! - Pause is a cancellation with resumable intent; resume re-queues for a
//!   fresh transfer attempt
//! - No automatic retry: failed items wait for `retry_download`
//!
//! # Concurrency
//! All bookkeeping goes through one mutex and never awaits while holding it.
//! Transfers run on spawned tasks and report back through `finish` and
//! `on_progress`. Each promotion stamps an attempt number; results from an
//! attempt that was paused, cancelled or deleted in the meantime are dropped.
//!
//! Save paths are reserved under the same mutex, so two items never share a
//! file name, and an aborted attempt keeps its name until it has returned.
//!
//! Every mutation publishes a fresh [`QueueSnapshot`] on a watch channel.

use crate::config::DownloadConfig;
use crate::download::item::{
    avoid_collision, file_name_from_url, sanitize_file_name, ContentType, DownloadItem,
    DownloadStatus,
};
use crate::download::progress::{ProgressFn, ProgressReport};
use crate::download::storage::{DirectoryResolver, PermissionGate};
use crate::download::transfer::Transfer;
use crate::error::{MediaError, Result};
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Per-item callback, invoked after every change to that item
pub type ProgressCallback = Arc<dyn Fn(DownloadItem) + Send + Sync>;

/// Immutable view of the queue handed to observers
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueSnapshot {
    /// All items in creation order
    pub items: Vec<DownloadItem>,

    /// Queued ids in promotion order
    pub queue: Vec<String>,

    pub max_concurrent: usize,
}

impl QueueSnapshot {
    pub fn get(&self, id: &str) -> Option<&DownloadItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn with_status(&self, status: DownloadStatus) -> Vec<&DownloadItem> {
        self.items.iter().filter(|item| item.status == status).collect()
    }

    pub fn active(&self) -> Vec<&DownloadItem> {
        self.with_status(DownloadStatus::Downloading)
    }

    /// Queued items in promotion order
    pub fn queued(&self) -> Vec<&DownloadItem> {
        self.queue.iter().filter_map(|id| self.get(id)).collect()
    }

    pub fn paused(&self) -> Vec<&DownloadItem> {
        self.with_status(DownloadStatus::Paused)
    }

    pub fn completed(&self) -> Vec<&DownloadItem> {
        self.with_status(DownloadStatus::Completed)
    }

    pub fn failed(&self) -> Vec<&DownloadItem> {
        self.with_status(DownloadStatus::Failed)
    }

    pub fn cancelled(&self) -> Vec<&DownloadItem> {
        self.with_status(DownloadStatus::Cancelled)
    }

    pub fn active_count(&self) -> usize {
        self.active().len()
    }

    /// Mean progress over items that are not cancelled (0.0 when empty)
    pub fn overall_progress(&self) -> f64 {
        let relevant: Vec<_> = self
            .items
            .iter()
            .filter(|item| item.status != DownloadStatus::Cancelled)
            .collect();
        if relevant.is_empty() {
            return 0.0;
        }
        relevant.iter().map(|item| item.progress).sum::<f64>() / relevant.len() as f64
    }
}

/// Handle on a running transfer attempt
struct ActiveTransfer {
    attempt: u64,
    cancel: CancellationToken,
    path: Option<PathBuf>,
}

/// Everything needed to run one attempt off the lock
struct Launch {
    id: String,
    attempt: u64,
    cancel: CancellationToken,
    url: String,
    file_name: String,
    content_type: ContentType,
    save_path: Option<PathBuf>,
}

#[derive(Default)]
struct QueueState {
    items: HashMap<String, DownloadItem>,
    order: Vec<String>,
    queue: VecDeque<String>,
    active: HashMap<String, ActiveTransfer>,
    /// Paths of aborted attempts that have not returned yet, by attempt
    draining: HashMap<u64, PathBuf>,
    next_attempt: u64,
}

impl QueueState {
    fn is_current(&self, id: &str, attempt: u64) -> bool {
        self.active.get(id).map(|a| a.attempt == attempt).unwrap_or(false)
    }

    fn snapshot(&self, max_concurrent: usize) -> QueueSnapshot {
        QueueSnapshot {
            items: self.order.iter().filter_map(|id| self.items.get(id)).cloned().collect(),
            queue: self.queue.iter().cloned().collect(),
            max_concurrent,
        }
    }

    /// Stop tracking an attempt that is being aborted. Its path stays
    /// reserved until the attempt's late result arrives.
    fn release_active(&mut self, id: &str) -> Option<CancellationToken> {
        let active = self.active.remove(id)?;
        if let Some(path) = active.path {
            self.draining.insert(active.attempt, path);
        }
        Some(active.cancel)
    }

    fn ids_with_status(&self, status: DownloadStatus) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| self.items.get(*id).map(|i| i.status == status).unwrap_or(false))
            .cloned()
            .collect()
    }

    /// Mark an item cancelled; returns the partial file to remove
    fn cancel_item(&mut self, id: &str) -> Option<(Option<CancellationToken>, Option<PathBuf>)> {
        let item = self.items.get(id)?;
        if item.is_terminal() {
            return None;
        }

        let mut next = item.with_status(DownloadStatus::Cancelled);
        next.speed_bytes_per_sec = 0.0;
        let path = next.save_path.take();
        self.items.insert(id.to_string(), next);
        self.queue.retain(|queued| queued != id);
        let token = self.release_active(id);
        Some((token, path))
    }

    /// Pick a free name for `id` and record it as the item's save path.
    /// A name held by another item counts as taken even before its file exists.
    fn reserve_save_path(&mut self, id: &str, preferred: PathBuf) -> PathBuf {
        let path = avoid_collision(preferred, |candidate| {
            self.draining.values().any(|p| p == candidate)
                || self
                    .items
                    .iter()
                    .any(|(other, item)| other.as_str() != id && item.save_path.as_deref() == Some(candidate))
        });
        if let Some(item) = self.items.get_mut(id) {
            item.save_path = Some(path.clone());
        }
        if let Some(active) = self.active.get_mut(id) {
            active.path = Some(path.clone());
        }
        path
    }

    fn pause_item(&mut self, id: &str) -> Option<CancellationToken> {
        let item = self.items.get(id)?;
        if item.status != DownloadStatus::Downloading {
            return None;
        }

        let mut next = item.with_status(DownloadStatus::Paused);
        next.speed_bytes_per_sec = 0.0;
        self.items.insert(id.to_string(), next);
        self.release_active(id)
    }

    fn resume_item(&mut self, id: &str) -> bool {
        let Some(item) = self.items.get(id) else {
            return false;
        };
        if item.status != DownloadStatus::Paused {
            return false;
        }

        let next = item.with_status(DownloadStatus::Queued);
        self.items.insert(id.to_string(), next);
        self.queue.push_back(id.to_string());
        true
    }
}

struct EngineInner {
    config: DownloadConfig,
    state: Mutex<QueueState>,
    transfer: Arc<dyn Transfer>,
    resolver: Arc<dyn DirectoryResolver>,
    permissions: Arc<dyn PermissionGate>,
    snapshot_tx: watch::Sender<QueueSnapshot>,
    callbacks: Mutex<HashMap<String, ProgressCallback>>,
    shutdown: CancellationToken,
}

/// Download queue with bounded concurrency
///
/// Dropping the engine signals every in-flight transfer to stop without
/// waiting for them.
pub struct DownloadQueueEngine {
    inner: Arc<EngineInner>,
}

impl DownloadQueueEngine {
    /// Create a new engine around its collaborators
    pub fn new(
        config: DownloadConfig,
        transfer: Arc<dyn Transfer>,
        resolver: Arc<dyn DirectoryResolver>,
        permissions: Arc<dyn PermissionGate>,
    ) -> Result<Self> {
        config.validate()?;

        let (snapshot_tx, _) = watch::channel(QueueSnapshot {
            max_concurrent: config.max_concurrent_downloads,
            ..Default::default()
        });

        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                state: Mutex::new(QueueState::default()),
                transfer,
                resolver,
                permissions,
                snapshot_tx,
                callbacks: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        })
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.inner.config
    }

    /// Accept a download request and try to start it
    ///
    /// The file name is sanitised; when empty it is taken from the URL. The
    /// content type is inferred from the URL when not given.
    pub async fn add_download(
        &self,
        url: &str,
        file_name: Option<&str>,
        content_type: Option<ContentType>,
    ) -> Result<String> {
        if self.inner.shutdown.is_cancelled() {
            return Err(MediaError::InvalidState("Download engine has been disposed".to_string()));
        }

        let url = url.trim();
        if url.is_empty() {
            return Err(MediaError::invalid_input("Download URL is empty"));
        }

        let permissions = &self.inner.permissions;
        if !permissions.has_storage_permission().await && !permissions.request_storage_permission().await {
            tracing::warn!(url, "Download rejected: storage permission denied");
            return Err(MediaError::PermissionDenied(url.to_string()));
        }

        let id = Uuid::new_v4().to_string();
        let content_type = content_type.unwrap_or_else(|| ContentType::from_url(url));
        let file_name = file_name
            .map(sanitize_file_name)
            .filter(|name| !name.is_empty())
            .or_else(|| file_name_from_url(url))
            .unwrap_or_else(|| format!("download-{}", &id[..8]));

        let item = DownloadItem::new(id.clone(), url.to_string(), file_name, content_type);
        {
            let mut state = self.inner.state.lock();
            state.items.insert(id.clone(), item.clone());
            state.order.push(id.clone());
            state.queue.push_back(id.clone());
        }

        tracing::info!(id = %id, url, content_type = %content_type, "Download queued");
        self.inner.publish();
        self.inner.notify(&item);
        self.inner.promote();

        Ok(id)
    }

    /// Pause a downloading item; no-op in any other state
    pub async fn pause_download(&self, id: &str) -> bool {
        let token = self.inner.state.lock().pause_item(id);
        let Some(token) = token else {
            return false;
        };

        token.cancel();
        tracing::info!(id, "Download paused");
        self.inner.publish();
        self.inner.notify_id(id);
        self.inner.promote();
        true
    }

    /// Re-queue a paused item for a fresh transfer attempt
    pub async fn resume_download(&self, id: &str) -> bool {
        if !self.inner.state.lock().resume_item(id) {
            return false;
        }

        tracing::info!(id, "Download resumed");
        self.inner.publish();
        self.inner.notify_id(id);
        self.inner.promote();
        true
    }

    /// Cancel a non-terminal item and delete its partial file
    ///
    /// Cancelling a completed, failed or already-cancelled item does nothing.
    pub async fn cancel_download(&self, id: &str) -> bool {
        let cancelled = self.inner.state.lock().cancel_item(id);
        let Some((token, path)) = cancelled else {
            return false;
        };

        if let Some(token) = token {
            token.cancel();
        }
        if let Some(path) = path {
            remove_partial(&path).await;
        }

        tracing::info!(id, "Download cancelled");
        self.inner.publish();
        self.inner.notify_id(id);
        self.inner.promote();
        true
    }

    /// Reset a failed or cancelled item and queue it again
    pub async fn retry_download(&self, id: &str) -> bool {
        let stale = {
            let mut state = self.inner.state.lock();
            let Some(item) = state.items.get(id) else {
                return false;
            };
            if !matches!(item.status, DownloadStatus::Failed | DownloadStatus::Cancelled) {
                return false;
            }

            // A failed attempt may leave a partial file under the old name
            let stale = item.save_path.clone();
            let next = item.reset_for_retry();
            state.items.insert(id.to_string(), next);
            state.queue.push_back(id.to_string());
            stale
        };

        if let Some(path) = stale {
            remove_partial(&path).await;
        }

        tracing::info!(id, "Download retried");
        self.inner.publish();
        self.inner.notify_id(id);
        self.inner.promote();
        true
    }

    /// Remove an item in any state and delete its file from disk
    pub async fn delete_download(&self, id: &str) -> Result<bool> {
        let removed = {
            let mut state = self.inner.state.lock();
            let Some(item) = state.items.remove(id) else {
                return Ok(false);
            };
            state.order.retain(|other| other != id);
            state.queue.retain(|other| other != id);
            if let Some(token) = state.release_active(id) {
                token.cancel();
            }
            item
        };
        self.inner.callbacks.lock().remove(id);

        if let Some(ref path) = removed.save_path {
            match fs::remove_file(path).await {
                Ok(()) => tracing::debug!(id, path = %path.display(), "Deleted download file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    self.inner.publish();
                    self.inner.promote();
                    return Err(e.into());
                }
            }
        }

        tracing::info!(id, "Download deleted");
        self.inner.publish();
        self.inner.promote();
        Ok(true)
    }

    /// Pause every downloading item; returns how many were paused
    pub async fn pause_all(&self) -> usize {
        let tokens: Vec<CancellationToken> = {
            let mut state = self.inner.state.lock();
            let ids = state.ids_with_status(DownloadStatus::Downloading);
            ids.iter().filter_map(|id| state.pause_item(id)).collect()
        };

        for token in &tokens {
            token.cancel();
        }
        if !tokens.is_empty() {
            tracing::info!(count = tokens.len(), "Paused all downloads");
            self.inner.publish();
            self.inner.promote();
        }
        tokens.len()
    }

    /// Resume every paused item in creation order
    pub async fn resume_all(&self) -> usize {
        let resumed = {
            let mut state = self.inner.state.lock();
            let ids = state.ids_with_status(DownloadStatus::Paused);
            ids.iter().filter(|id| state.resume_item(id)).count()
        };

        if resumed > 0 {
            tracing::info!(count = resumed, "Resumed all downloads");
            self.inner.publish();
            self.inner.promote();
        }
        resumed
    }

    /// Cancel every downloading or queued item
    pub async fn cancel_all(&self) -> usize {
        let cancelled: Vec<_> = {
            let mut state = self.inner.state.lock();
            let ids: Vec<String> = state
                .order
                .iter()
                .filter(|id| {
                    state
                        .items
                        .get(*id)
                        .map(|i| matches!(i.status, DownloadStatus::Downloading | DownloadStatus::Queued))
                        .unwrap_or(false)
                })
                .cloned()
                .collect();
            ids.iter().filter_map(|id| state.cancel_item(id)).collect()
        };

        for (token, path) in &cancelled {
            if let Some(token) = token {
                token.cancel();
            }
            if let Some(path) = path {
                remove_partial(path).await;
            }
        }

        if !cancelled.is_empty() {
            tracing::info!(count = cancelled.len(), "Cancelled all downloads");
            self.inner.publish();
            self.inner.promote();
        }
        cancelled.len()
    }

    /// Drop completed entries from the queue (files stay on disk)
    pub async fn clear_completed(&self) -> usize {
        let removed = {
            let mut state = self.inner.state.lock();
            let ids = state.ids_with_status(DownloadStatus::Completed);
            for id in &ids {
                state.items.remove(id);
            }
            state.order.retain(|id| !ids.contains(id));
            ids
        };

        if !removed.is_empty() {
            let mut callbacks = self.inner.callbacks.lock();
            for id in &removed {
                callbacks.remove(id);
            }
            drop(callbacks);
            self.inner.publish();
        }
        removed.len()
    }

    /// Register a callback for one item
    pub fn register_progress_callback(&self, id: String, callback: ProgressCallback) {
        self.inner.callbacks.lock().insert(id, callback);
    }

    pub fn unregister_progress_callback(&self, id: &str) {
        self.inner.callbacks.lock().remove(id);
    }

    pub fn get(&self, id: &str) -> Option<DownloadItem> {
        self.inner.state.lock().items.get(id).cloned()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        self.inner.snapshot()
    }

    /// Subscribe to snapshots; the receiver starts at the current state
    pub fn subscribe(&self) -> watch::Receiver<QueueSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    pub fn active_count(&self) -> usize {
        self.inner.state.lock().active.len()
    }

    /// Signal every in-flight transfer to stop; does not wait for them
    pub fn dispose(&self) {
        if !self.inner.shutdown.is_cancelled() {
            tracing::info!("Disposing download engine");
            self.inner.shutdown.cancel();
        }
    }
}

impl Drop for DownloadQueueEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl EngineInner {
    fn snapshot(&self) -> QueueSnapshot {
        self.state.lock().snapshot(self.config.max_concurrent_downloads)
    }

    fn publish(&self) {
        let snapshot = self.snapshot();
        self.snapshot_tx.send_replace(snapshot);
    }

    fn notify(&self, item: &DownloadItem) {
        let callback = self.callbacks.lock().get(&item.id).cloned();
        if let Some(cb) = callback {
            cb(item.clone());
        }
    }

    fn notify_id(&self, id: &str) {
        let item = self.state.lock().items.get(id).cloned();
        if let Some(item) = item {
            self.notify(&item);
        }
    }

    /// Start queued items while slots are free
    fn promote(self: &Arc<Self>) {
        if self.shutdown.is_cancelled() {
            return;
        }

        let mut launches = Vec::new();
        {
            let mut state = self.state.lock();
            while state.active.len() < self.config.max_concurrent_downloads {
                let Some(id) = state.queue.pop_front() else {
                    break;
                };
                let Some(item) = state.items.get(&id) else {
                    continue;
                };
                if item.status != DownloadStatus::Queued {
                    continue;
                }

                let mut next = item.with_status(DownloadStatus::Downloading);
                next.started_at = Some(Utc::now());
                next.error_message = None;

                state.next_attempt += 1;
                let attempt = state.next_attempt;
                let cancel = self.shutdown.child_token();

                launches.push(Launch {
                    id: id.clone(),
                    attempt,
                    cancel: cancel.clone(),
                    url: next.url.clone(),
                    file_name: next.file_name.clone(),
                    content_type: next.content_type,
                    save_path: next.save_path.clone(),
                });
                let path = next.save_path.clone();
                state.items.insert(id.clone(), next);
                state.active.insert(id, ActiveTransfer { attempt, cancel, path });
            }
        }

        if launches.is_empty() {
            return;
        }

        self.publish();
        for launch in launches {
            tracing::info!(id = %launch.id, attempt = launch.attempt, "Download started");
            self.notify_id(&launch.id);
            let inner = Arc::clone(self);
            tokio::spawn(async move { inner.run_attempt(launch).await });
        }
    }

    async fn run_attempt(self: Arc<Self>, launch: Launch) {
        // A resumed item keeps the name it reserved on its first attempt
        let path = match launch.save_path {
            Some(path) => path,
            None => {
                let dir = match self.resolver.resolve_directory(launch.content_type).await {
                    Ok(dir) => dir,
                    Err(e) => {
                        let e = match e {
                            MediaError::DirectoryResolutionFailed { .. } => e,
                            other => MediaError::DirectoryResolutionFailed {
                                content_type: launch.content_type.to_string(),
                                reason: other.to_string(),
                            },
                        };
                        self.finish(&launch.id, launch.attempt, Err(e), None).await;
                        return;
                    }
                };

                let mut state = self.state.lock();
                if !state.is_current(&launch.id, launch.attempt) {
                    return;
                }
                state.reserve_save_path(&launch.id, dir.join(&launch.file_name))
            }
        };

        let weak = Arc::downgrade(&self);
        let id = launch.id.clone();
        let attempt = launch.attempt;
        let on_progress: ProgressFn = Arc::new(move |report| {
            if let Some(inner) = weak.upgrade() {
                inner.on_progress(&id, attempt, report);
            }
        });

        let result = self
            .transfer
            .download(&launch.url, &path, on_progress, launch.cancel.clone())
            .await;

        self.finish(&launch.id, launch.attempt, result, Some(path)).await;
    }

    fn on_progress(&self, id: &str, attempt: u64, report: ProgressReport) {
        let updated = {
            let mut state = self.state.lock();
            if !state.is_current(id, attempt) {
                return;
            }
            let Some(item) = state.items.get_mut(id) else {
                return;
            };
            *item = item.with_progress(report.received, report.total, report.bytes_per_sec);
            item.clone()
        };

        self.publish();
        self.notify(&updated);
    }

    async fn finish(self: &Arc<Self>, id: &str, attempt: u64, result: Result<()>, path: Option<PathBuf>) {
        let (updated, cleanup) = {
            let mut state = self.state.lock();
            if !state.is_current(id, attempt) {
                // Superseded by pause/cancel/delete. A cancelled item must not
                // keep a file this attempt may have created after the cancel.
                let cancelled = state
                    .items
                    .get(id)
                    .map(|i| i.status == DownloadStatus::Cancelled)
                    .unwrap_or(true);
                if !cancelled {
                    state.draining.remove(&attempt);
                }
                (None, if cancelled { path } else { None })
            } else {
                state.active.remove(id);
                let Some(item) = state.items.get(id) else {
                    return;
                };

                let (next, cleanup) = match result {
                    Ok(()) => (item.completed(), None),
                    Err(MediaError::Cancelled) => {
                        let mut next = item.with_status(DownloadStatus::Cancelled);
                        next.speed_bytes_per_sec = 0.0;
                        next.save_path = None;
                        (next, path)
                    }
                    Err(e) => (item.failed(e.to_string()), None),
                };
                state.items.insert(id.to_string(), next.clone());
                (Some(next), cleanup)
            }
        };

        if let Some(path) = cleanup {
            remove_partial(&path).await;
        }
        // The name is free again once the aborted attempt's file is gone
        self.state.lock().draining.remove(&attempt);

        let Some(item) = updated else {
            return;
        };

        match item.status {
            DownloadStatus::Completed => tracing::info!(id, bytes = item.bytes_downloaded, "Download completed"),
            DownloadStatus::Failed => tracing::warn!(id, error = ?item.error_message, "Download failed"),
            _ => tracing::info!(id, status = item.status.as_str(), "Download finished"),
        }

        self.publish();
        self.notify(&item);
        self.promote();
    }
}

/// Best-effort removal of a partial file
async fn remove_partial(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed partial file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial file"),
    }
}
