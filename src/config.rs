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


//! Engine configuration
//!
//! All sections default sensibly, so a partial JSON document such as
//! `{"download": {"max_concurrent_downloads": 5}}` is a valid config.

use crate::error::{MediaError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for all engines
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub download: DownloadConfig,
    pub preload: PreloadConfig,
    pub pagination: PaginationConfig,
}

/// Download queue configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Maximum concurrent downloads
    pub max_concurrent_downloads: usize,

    /// Base directory; type-specific subfolders are created below it
    pub output_directory: PathBuf,

    /// Per-request timeout for HTTP transfers
    pub request_timeout_secs: u64,

    /// Minimum interval between progress callbacks from a transfer
    pub progress_interval_ms: u64,

    /// Optional User-Agent header for HTTP transfers
    pub user_agent: Option<String>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 3,
            output_directory: PathBuf::from("."),
            request_timeout_secs: 300,
            progress_interval_ms: 200,
            user_agent: None,
        }
    }
}

/// Preload window configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloadConfig {
    /// Items kept live ahead of the current index
    pub preload_ahead: usize,

    /// Items kept live behind the current index
    pub keep_behind: usize,

    /// Upper bound on controller initialisations in flight
    pub max_concurrent_inits: usize,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            preload_ahead: 2,
            keep_behind: 1,
            max_concurrent_inits: 2,
        }
    }
}

/// Pagination configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    /// Distance from the end of the feed that triggers the next fetch
    pub fetch_threshold: usize,

    /// Expected number of items in a full page
    pub page_size: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            fetch_threshold: 3,
            page_size: 10,
        }
    }
}

impl CoreConfig {
    /// Parse and validate a JSON config document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file
    pub async fn load(path: &Path) -> Result<Self> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json_str(&json)
    }

    /// Save config as pretty JSON
    pub async fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.download.validate()?;
        self.preload.validate()?;
        self.pagination.validate()
    }
}

impl DownloadConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_downloads == 0 {
            return Err(MediaError::InvalidConfiguration(
                "max_concurrent_downloads must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl PreloadConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_inits == 0 {
            return Err(MediaError::InvalidConfiguration(
                "max_concurrent_inits must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl PaginationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(MediaError::InvalidConfiguration(
                "page_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
