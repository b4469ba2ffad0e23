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


//! Download management
//!
//! This module handles user-initiated downloads: a bounded FIFO queue,
//! per-item pause/resume/cancel/retry, and byte-level progress.
//!
//! The engine reaches the outside world only through three collaborators:
//! - [`Transfer`] - moves bytes (HTTP in production)
//! - [`DirectoryResolver`] - picks the save folder per content type
//! - [`PermissionGate`] - storage permission on platforms that need one

pub mod item;
pub mod progress;
pub mod queue;
pub mod storage;
pub mod transfer;

// Re-export commonly used types
pub use item::{ContentType, DownloadItem, DownloadStatus};
pub use progress::{ProgressFn, ProgressReport};
pub use queue::{DownloadQueueEngine, ProgressCallback, QueueSnapshot};
pub use storage::{AlwaysGranted, DirectoryResolver, FsDirectoryResolver, PermissionGate};
pub use transfer::{HttpTransfer, Transfer};
