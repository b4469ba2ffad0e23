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


//! Transfer collaborator
//!
//! The queue engine only knows the [`Transfer`] trait. [`HttpTransfer`] is the
//! production implementation: a streaming GET written to disk, cancellable
//! between chunks.
//!
//! # Outcome contract
//! - `Ok(())` - the whole body was written
//! - `Err(MediaError::Cancelled)` - the token fired; the caller owns cleanup
//! - any other `Err` - network/server failure, partial file left in place

use crate::config::DownloadConfig;
use crate::download::progress::{ProgressFn, ProgressTracker};
use crate::error::{MediaError, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;

const DOWNLOAD_BUFF_SZ: usize = 64 * 1024;

#[async_trait]
pub trait Transfer: Send + Sync {
    /// Download `url` into `dest`, reporting progress until done or cancelled
    async fn download(
        &self,
        url: &str,
        dest: &Path,
        on_progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Result<()>;
}

/// Streaming HTTP transfer backed by reqwest
pub struct HttpTransfer {
    client: reqwest::Client,
    progress_interval: Duration,
}

impl HttpTransfer {
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs));
        if let Some(ref agent) = config.user_agent {
            builder = builder.user_agent(agent.clone());
        }

        Ok(Self {
            client: builder.build()?,
            progress_interval: Duration::from_millis(config.progress_interval_ms),
        })
    }

    async fn stream_to_file(
        &self,
        response: reqwest::Response,
        dest: &Path,
        on_progress: ProgressFn,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let total = response.content_length();
        let file = File::create(dest).await?;
        let mut writer = BufWriter::with_capacity(DOWNLOAD_BUFF_SZ, file);
        let mut tracker = ProgressTracker::new(on_progress, total, self.progress_interval);
        let mut stream = response.bytes_stream();

        loop {
            let next = tokio::select! {
                biased;
                // Buffered bytes are dropped; the caller discards or restarts the file
                _ = cancel.cancelled() => return Err(MediaError::Cancelled),
                chunk = stream.next() => chunk,
            };

            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk.map_err(|e| MediaError::network_error(format!("Stream error: {}", e), true))?;

            writer.write_all(&chunk).await?;
            tracker.advance(chunk.len() as u64);
        }

        writer.flush().await?;
        tracker.flush();

        if let Some(total) = total {
            if tracker.received() < total {
                return Err(MediaError::network_error(
                    format!("Download incomplete: {}/{} bytes", tracker.received(), total),
                    true,
                ));
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Transfer for HttpTransfer {
    async fn download(
        &self,
        url: &str,
        dest: &Path,
        on_progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Result<()> {
        let parsed = url::Url::parse(url)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(MediaError::InvalidDownloadUrl(url.to_string()));
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MediaError::Cancelled),
            response = self.client.get(parsed).send() => response.map_err(|e| {
                MediaError::network_error(format!("Request failed: {}", e), e.is_timeout() || e.is_connect())
            })?,
        };

        if !response.status().is_success() {
            return Err(MediaError::UnexpectedStatusCode {
                status_code: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        tracing::debug!(url, dest = %dest.display(), length = ?response.content_length(), "Transfer started");
        self.stream_to_file(response, dest, on_progress, &cancel).await
    }
}
