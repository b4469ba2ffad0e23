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


//! Feed pagination
//!
//! Watches the viewport and pulls the next page when the user gets close to
//! the end of the feed. At most one page fetch is in flight at any time.
//! Once a page comes back short (or empty) the feed is exhausted until
//! [`PaginationCoordinator::refresh`] is called.
//!
//! Fetches run on spawned tasks, so a caller dropping the returned future
//! does not leave the coordinator stuck with a fetch marked in flight.

use crate::config::PaginationConfig;
use crate::error::{MediaError, Result};
use crate::preload::{ControllerFactory, PreloadWindow, VideoItem};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

/// Supplies pages of feed items
#[async_trait]
pub trait PageFetcher<T>: Send + Sync + 'static {
    /// Fetch page `page` (zero-based)
    async fn fetch_page(&self, page: usize) -> Result<Vec<VideoItem<T>>>;
}

/// Observable pagination state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaginationState {
    pub fetch_in_flight: bool,
    pub has_more: bool,
    pub next_page: usize,
    pub last_error: Option<String>,
    pub fetch_threshold: usize,
    pub page_size: usize,
}

/// Result of a pagination trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Not near the end, feed exhausted, or a fetch already in flight
    Skipped,

    /// A page was merged into the feed
    Fetched {
        page: usize,
        received: usize,
        appended: usize,
    },

    /// The fetch failed; `has_more` is unchanged
    Failed(String),

    /// A refresh started while this fetch was running; its result was dropped
    Superseded,
}

struct Cursor {
    fetch_in_flight: bool,
    has_more: bool,
    next_page: usize,
    last_error: Option<String>,
    epoch: u64,
}

enum FetchKind {
    Append,
    Refresh,
}

struct CoordinatorInner<T, F, P>
where
    T: Clone + Send + Sync + 'static,
    F: ControllerFactory,
{
    config: PaginationConfig,
    window: Arc<PreloadWindow<T, F>>,
    fetcher: Arc<P>,
    cursor: Mutex<Cursor>,
}

/// Drives page fetches from viewport changes and feeds the preload window
pub struct PaginationCoordinator<T, F, P>
where
    T: Clone + Send + Sync + 'static,
    F: ControllerFactory,
{
    inner: Arc<CoordinatorInner<T, F, P>>,
}

impl<T, F, P> Clone for PaginationCoordinator<T, F, P>
where
    T: Clone + Send + Sync + 'static,
    F: ControllerFactory,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, F, P> PaginationCoordinator<T, F, P>
where
    T: Clone + Send + Sync + 'static,
    F: ControllerFactory,
    P: PageFetcher<T>,
{
    pub fn new(window: Arc<PreloadWindow<T, F>>, fetcher: Arc<P>, config: PaginationConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            inner: Arc::new(CoordinatorInner {
                config,
                window,
                fetcher,
                cursor: Mutex::new(Cursor {
                    fetch_in_flight: false,
                    has_more: true,
                    next_page: 0,
                    last_error: None,
                    epoch: 0,
                }),
            }),
        })
    }

    pub fn window(&self) -> &Arc<PreloadWindow<T, F>> {
        &self.inner.window
    }

    pub fn state(&self) -> PaginationState {
        let cursor = self.inner.cursor.lock();
        PaginationState {
            fetch_in_flight: cursor.fetch_in_flight,
            has_more: cursor.has_more,
            next_page: cursor.next_page,
            last_error: cursor.last_error.clone(),
            fetch_threshold: self.inner.config.fetch_threshold,
            page_size: self.inner.config.page_size,
        }
    }

    /// Viewport moved to `index`
    ///
    /// Recomputes the preload window, then fetches the next page when within
    /// `fetch_threshold` items of the end.
    pub async fn on_page_changed(&self, index: usize) -> FetchOutcome {
        self.inner.window.recompute_window(index);

        let claim = {
            let mut cursor = self.inner.cursor.lock();
            let len = self.inner.window.len();
            let distance_to_end = len.saturating_sub(1).saturating_sub(index);

            if distance_to_end > self.inner.config.fetch_threshold || !cursor.has_more || cursor.fetch_in_flight {
                None
            } else {
                cursor.fetch_in_flight = true;
                Some((cursor.next_page, cursor.epoch))
            }
        };

        match claim {
            Some((page, epoch)) => self.run_fetch(page, epoch, FetchKind::Append).await,
            None => FetchOutcome::Skipped,
        }
    }

    /// Fetch the first page into an empty feed
    pub async fn load_initial(&self) -> FetchOutcome {
        let claim = {
            let mut cursor = self.inner.cursor.lock();
            if cursor.fetch_in_flight || !cursor.has_more || !self.inner.window.is_empty() {
                None
            } else {
                cursor.fetch_in_flight = true;
                Some((cursor.next_page, cursor.epoch))
            }
        };

        match claim {
            Some((page, epoch)) => self.run_fetch(page, epoch, FetchKind::Append).await,
            None => FetchOutcome::Skipped,
        }
    }

    /// Reload from the first page
    ///
    /// Any fetch still in flight is superseded. On success the feed is
    /// replaced, `has_more` is re-armed and the viewport returns to index 0;
    /// handles for ids present in the new first page are kept.
    pub async fn refresh(&self) -> FetchOutcome {
        let epoch = {
            let mut cursor = self.inner.cursor.lock();
            cursor.epoch += 1;
            cursor.fetch_in_flight = true;
            cursor.has_more = true;
            cursor.next_page = 0;
            cursor.last_error = None;
            cursor.epoch
        };
        tracing::info!(epoch, "Refreshing feed");

        self.run_fetch(0, epoch, FetchKind::Refresh).await
    }

    async fn run_fetch(&self, page: usize, epoch: u64, kind: FetchKind) -> FetchOutcome {
        tracing::debug!(page, epoch, "Fetching feed page");

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let result = inner.fetcher.fetch_page(page).await;
            inner.complete_fetch(page, epoch, kind, result)
        });

        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                // The fetch task panicked; release the in-flight flag ourselves
                let message = MediaError::internal(format!("page fetch task failed: {}", e)).to_string();
                let mut cursor = self.inner.cursor.lock();
                if cursor.epoch == epoch {
                    cursor.fetch_in_flight = false;
                    cursor.last_error = Some(message.clone());
                }
                FetchOutcome::Failed(message)
            }
        }
    }
}

impl<T, F, P> CoordinatorInner<T, F, P>
where
    T: Clone + Send + Sync + 'static,
    F: ControllerFactory,
    P: PageFetcher<T>,
{
    fn complete_fetch(
        &self,
        page: usize,
        epoch: u64,
        kind: FetchKind,
        result: Result<Vec<VideoItem<T>>>,
    ) -> FetchOutcome {
        // Lock order: cursor, then window state. The cursor stays held while
        // the window is updated, so a concurrent trigger never sees a cleared
        // flag together with the old feed length.
        let mut cursor = self.cursor.lock();
        if cursor.epoch != epoch {
            tracing::debug!(page, epoch, "Discarding superseded page");
            return FetchOutcome::Superseded;
        }
        cursor.fetch_in_flight = false;

        match result {
            Ok(items) => {
                let received = items.len();
                let appended = match kind {
                    FetchKind::Append => self.window.append_items(items),
                    FetchKind::Refresh => {
                        self.window.reset_items(items, 0);
                        self.window.len()
                    }
                };

                cursor.next_page = page + 1;
                cursor.last_error = None;
                if received < self.config.page_size {
                    cursor.has_more = false;
                    tracing::info!(page, received, "Feed exhausted");
                }

                tracing::debug!(page, received, appended, "Feed page merged");
                FetchOutcome::Fetched {
                    page,
                    received,
                    appended,
                }
            }
            Err(e) => {
                tracing::warn!(page, error = %e, "Feed page fetch failed");
                let message = e.to_string();
                cursor.last_error = Some(message.clone());
                FetchOutcome::Failed(message)
            }
        }
    }
}
