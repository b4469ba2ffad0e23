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


//! Save-directory resolution and storage permission
//!
//! Saved files are partitioned by content type so names from different
//! categories never collide:
//!
//! ```text
//! <root>/videos/
//! <root>/images/
//! <root>/documents/
//! <root>/other/
//! ```

use crate::download::item::ContentType;
use crate::error::{MediaError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Resolves (and creates) the directory a content type is saved into
#[async_trait]
pub trait DirectoryResolver: Send + Sync {
    async fn resolve_directory(&self, content_type: ContentType) -> Result<PathBuf>;
}

/// Storage permission gate
///
/// Platforms without a permission model use [`AlwaysGranted`].
#[async_trait]
pub trait PermissionGate: Send + Sync {
    async fn has_storage_permission(&self) -> bool;

    /// Ask the user; returns whether permission is now granted
    async fn request_storage_permission(&self) -> bool;
}

/// Permission gate for platforms that need no runtime grant
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysGranted;

#[async_trait]
impl PermissionGate for AlwaysGranted {
    async fn has_storage_permission(&self) -> bool {
        true
    }

    async fn request_storage_permission(&self) -> bool {
        true
    }
}

/// Filesystem resolver rooted at a base directory
#[derive(Debug, Clone)]
pub struct FsDirectoryResolver {
    root: PathBuf,
}

impl FsDirectoryResolver {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl DirectoryResolver for FsDirectoryResolver {
    async fn resolve_directory(&self, content_type: ContentType) -> Result<PathBuf> {
        let dir = self.root.join(content_type.subdirectory());

        fs::create_dir_all(&dir).await.map_err(|e| MediaError::DirectoryResolutionFailed {
            content_type: content_type.to_string(),
            reason: format!("{}: {}", dir.display(), e),
        })?;

        Ok(dir)
    }
}
