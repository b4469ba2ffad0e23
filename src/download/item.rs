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


//! Download items and their lifecycle
//!
//! # Lifecycle
//! - `Queued` → `Downloading` when a concurrency slot frees
//! - `Downloading` → `Completed` | `Failed` | `Cancelled` | `Paused`
//! - `Paused` → `Queued` on resume
//! - `Failed` | `Cancelled` → `Queued` on explicit retry
//!
//! Items are owned by the queue engine; everything handed out is a clone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "webm", "flv", "wmv", "m4v", "3gp"];
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp", "heic", "svg"];
const DOCUMENT_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "txt", "csv", "rtf", "odt",
];

/// Content category, used to pick a save subdirectory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Video,
    Image,
    Document,
    Other,
}

impl ContentType {
    /// Infer the category from the URL's file extension
    ///
    /// Query strings and fragments are ignored. Unknown or missing extensions
    /// map to `Other`.
    pub fn from_url(url: &str) -> Self {
        let path = match url::Url::parse(url) {
            Ok(parsed) => parsed.path().to_string(),
            Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
        };

        let extension = Path::new(&path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match extension.as_deref() {
            Some(ext) => Self::from_extension(ext),
            None => ContentType::Other,
        }
    }

    pub fn from_extension(ext: &str) -> Self {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            ContentType::Video
        } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            ContentType::Image
        } else if DOCUMENT_EXTENSIONS.contains(&ext.as_str()) {
            ContentType::Document
        } else {
            ContentType::Other
        }
    }

    /// Subdirectory name under the download root
    pub fn subdirectory(&self) -> &'static str {
        match self {
            ContentType::Video => "videos",
            ContentType::Image => "images",
            ContentType::Document => "documents",
            ContentType::Other => "other",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Video => "video",
            ContentType::Image => "image",
            ContentType::Document => "document",
            ContentType::Other => "other",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a download item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Queued,
    Downloading,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Queued => "queued",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Paused => "paused",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Failed => "failed",
            DownloadStatus::Cancelled => "cancelled",
        }
    }

    /// Completed, failed and cancelled only change through an explicit retry
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadStatus::Completed | DownloadStatus::Failed | DownloadStatus::Cancelled
        )
    }
}

/// One requested transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadItem {
    pub id: String,
    pub url: String,
    pub file_name: String,
    pub content_type: ContentType,
    pub status: DownloadStatus,

    /// 0.0 - 1.0
    pub progress: f64,

    pub bytes_downloaded: u64,

    /// Total bytes to download (0 if unknown)
    pub total_bytes: u64,

    /// Moving-average speed reported by the transfer
    pub speed_bytes_per_sec: f64,

    /// Resolved on first promotion
    pub save_path: Option<PathBuf>,

    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DownloadItem {
    /// Create a new queued item
    pub fn new(id: String, url: String, file_name: String, content_type: ContentType) -> Self {
        Self {
            id,
            url,
            file_name,
            content_type,
            status: DownloadStatus::Queued,
            progress: 0.0,
            bytes_downloaded: 0,
            total_bytes: 0,
            speed_bytes_per_sec: 0.0,
            save_path: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_status(&self, status: DownloadStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }

    /// Apply a byte-count report; unknown totals leave `progress` untouched
    pub fn with_progress(&self, received: u64, total: Option<u64>, speed: f64) -> Self {
        let mut next = self.clone();
        next.bytes_downloaded = received;
        next.speed_bytes_per_sec = speed;
        if let Some(total) = total.filter(|t| *t > 0) {
            next.total_bytes = total;
            next.progress = (received as f64 / total as f64).clamp(0.0, 1.0);
        }
        next
    }

    pub fn completed(&self) -> Self {
        let mut next = self.with_status(DownloadStatus::Completed);
        next.progress = 1.0;
        next.speed_bytes_per_sec = 0.0;
        next.total_bytes = next.total_bytes.max(next.bytes_downloaded);
        next.error_message = None;
        next.completed_at = Some(Utc::now());
        next
    }

    pub fn failed(&self, message: String) -> Self {
        let mut next = self.with_status(DownloadStatus::Failed);
        next.speed_bytes_per_sec = 0.0;
        next.error_message = Some(message);
        next
    }

    /// Reset counters for a fresh attempt
    pub fn reset_for_retry(&self) -> Self {
        let mut next = self.with_status(DownloadStatus::Queued);
        next.progress = 0.0;
        next.bytes_downloaded = 0;
        next.total_bytes = 0;
        next.speed_bytes_per_sec = 0.0;
        next.error_message = None;
        next.started_at = None;
        next.completed_at = None;
        next.save_path = None;
        next
    }

    /// Progress as percentage for display
    pub fn percent_complete(&self) -> f64 {
        self.progress * 100.0
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Sanitize filename by removing invalid characters
pub fn sanitize_file_name(name: &str) -> String {
    let invalid_chars = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];
    name.chars()
        .map(|c| if invalid_chars.contains(&c) || c.is_control() { '_' } else { c })
        .collect::<String>()
        .trim()
        .trim_matches('.')
        .to_string()
}

/// Derive a file name from the URL's last path segment
pub fn file_name_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .last()
        .map(|s| sanitize_file_name(s))
        .filter(|s| !s.is_empty())
}

/// Avoid filename collisions by appending (1), (2), etc.
///
/// A candidate is rejected when it exists on disk or `is_reserved` claims it.
pub fn avoid_collision(path: PathBuf, is_reserved: impl Fn(&Path) -> bool) -> PathBuf {
    let taken = |candidate: &Path| candidate.exists() || is_reserved(candidate);
    if !taken(&path) {
        return path;
    }

    let Some(parent) = path.parent().map(Path::to_path_buf) else {
        return path;
    };
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("download")
        .to_string();
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    for i in 1..1000 {
        let candidate = if extension.is_empty() {
            format!("{} ({})", stem, i)
        } else {
            format!("{} ({}).{}", stem, i, extension)
        };

        let candidate = parent.join(candidate);
        if !taken(&candidate) {
            return candidate;
        }
    }

    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_inference() {
        assert_eq!(ContentType::from_url("https://cdn.example.com/a/clip.MP4"), ContentType::Video);
        assert_eq!(ContentType::from_url("https://cdn.example.com/photo.jpeg?w=200"), ContentType::Image);
        assert_eq!(ContentType::from_url("https://example.com/report.pdf#page=2"), ContentType::Document);
        assert_eq!(ContentType::from_url("https://example.com/archive.tar.xz"), ContentType::Other);
        assert_eq!(ContentType::from_url("https://example.com/stream"), ContentType::Other);
        assert_eq!(ContentType::from_url("not a url/movie.webm?x=1"), ContentType::Video);
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("Test: Clip?.mp4"), "Test_ Clip_.mp4");
        assert_eq!(sanitize_file_name("  Valid Name.png "), "Valid Name.png");
        assert_eq!(sanitize_file_name("a/b\\c"), "a_b_c");
    }

    #[test]
    fn test_file_name_from_url() {
        assert_eq!(
            file_name_from_url("https://example.com/media/clip.mp4?token=1").as_deref(),
            Some("clip.mp4")
        );
        assert_eq!(file_name_from_url("https://example.com/"), None);
    }

    #[test]
    fn test_progress_unknown_total_keeps_ratio() {
        let item = DownloadItem::new("1".into(), "u".into(), "f".into(), ContentType::Other);
        let item = item.with_progress(50, Some(200), 0.0);
        assert_eq!(item.progress, 0.25);

        let item = item.with_progress(120, None, 0.0);
        assert_eq!(item.bytes_downloaded, 120);
        assert_eq!(item.progress, 0.25);
    }

    #[test]
    fn test_completed_forces_full_progress() {
        let item = DownloadItem::new("1".into(), "u".into(), "f".into(), ContentType::Video)
            .with_progress(10, None, 1.0)
            .completed();
        assert_eq!(item.status, DownloadStatus::Completed);
        assert_eq!(item.progress, 1.0);
        assert!(item.completed_at.is_some());
    }

    #[test]
    fn test_percent_complete() {
        let item = DownloadItem::new("1".into(), "u".into(), "f".into(), ContentType::Video);
        assert_eq!(item.percent_complete(), 0.0);
        assert_eq!(item.with_progress(30, Some(120), 0.0).percent_complete(), 25.0);
        assert_eq!(item.completed().percent_complete(), 100.0);
    }

    #[test]
    fn test_avoid_collision() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        assert_eq!(avoid_collision(path.clone(), |_| false), path);

        std::fs::write(&path, b"x").unwrap();
        assert_eq!(avoid_collision(path, |_| false), dir.path().join("clip (1).mp4"));
    }

    #[test]
    fn test_avoid_collision_skips_reserved_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        let reserved = [path.clone(), dir.path().join("clip (1).mp4")];

        let chosen = avoid_collision(path, |candidate| reserved.iter().any(|r| r == candidate));
        assert_eq!(chosen, dir.path().join("clip (2).mp4"));
    }

    #[test]
    fn test_reset_for_retry_clears_save_path() {
        let mut item = DownloadItem::new("1".into(), "u".into(), "clip.mp4".into(), ContentType::Video);
        item.save_path = Some(PathBuf::from("/tmp/videos/clip.mp4"));
        let item = item.failed("timeout".into()).reset_for_retry();

        assert_eq!(item.status, DownloadStatus::Queued);
        assert!(item.save_path.is_none());
        assert!(item.error_message.is_none());
    }
}
