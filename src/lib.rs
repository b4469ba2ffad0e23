//! MediaCore
//!
//! Platform-independent core of a media app: a bounded download queue and a
//! viewport-aware video preloading window fed by a paginator. Platform code
//! plugs in through collaborator traits ([`download::Transfer`],
//! [`download::DirectoryResolver`], [`download::PermissionGate`],
//! [`preload::ControllerFactory`], [`feed::PageFetcher`]).

pub mod config;
pub mod download;
pub mod error;
pub mod feed;
pub mod preload;

pub use config::{CoreConfig, DownloadConfig, PaginationConfig, PreloadConfig};
pub use download::{ContentType, DownloadItem, DownloadQueueEngine, DownloadStatus, QueueSnapshot};
pub use error::{MediaError, Result};
pub use feed::{FetchOutcome, PageFetcher, PaginationCoordinator, PaginationState};
pub use preload::{ControllerFactory, ControllerState, PreloadWindow, VideoItem, WindowPlan, WindowSnapshot};
