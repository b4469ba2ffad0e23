//! Error types for MediaCore
//!
//! This module defines error types using thiserror for ergonomic error handling.
//! Errors are grouped by the engine that raises them (downloads, preloading,
//! pagination) so callers can decide how to surface them.
//!
//! ## Where errors end up
//!
//! The engines never let a collaborator failure escape as a panic. Most errors
//! are captured into per-item state instead of being returned:
//!
//! - Download failures → `DownloadItem::error_message` with status `Failed`
//! - Controller initialisation failures → `ControllerState::Failed`
//! - Page fetch failures → `PaginationState::last_error`
//!
//! Only the operations that reject a request outright (permission denial,
//! invalid configuration, filesystem errors on delete) return `Err`.

use thiserror::Error;

/// Result type alias using our MediaError type
pub type Result<T> = std::result::Result<T, MediaError>;

/// Main error type for MediaCore
#[derive(Error, Debug)]
pub enum MediaError {
    // ===== Download Errors =====

    /// Storage permission was not granted; the download was rejected before any state was created
    #[error("Storage permission denied: {0}")]
    PermissionDenied(String),

    /// No save directory could be resolved for a content type
    #[error("Could not resolve a save directory for {content_type}: {reason}")]
    DirectoryResolutionFailed {
        content_type: String,
        reason: String,
    },

    /// Network connectivity error
    #[error("Network error: {message}")]
    NetworkError {
        message: String,
        /// Whether this error might be transient
        is_transient: bool,
    },

    /// Server returned a non-success status code
    #[error("Server responded with unexpected status code {status_code} for {url}")]
    UnexpectedStatusCode {
        status_code: u16,
        url: String,
    },

    /// Invalid download URL format or protocol
    #[error("Invalid download URL: {0}")]
    InvalidDownloadUrl(String),

    // ===== Preload Errors =====

    /// Decoder/controller initialisation failed
    #[error("Controller initialization failed for '{id}': {message}")]
    InitializationFailed {
        id: String,
        message: String,
    },

    // ===== Pagination Errors =====

    /// Page fetch collaborator failed
    #[error("Page fetch failed: {0}")]
    FetchFailed(String),

    // ===== State/Input Errors =====

    /// Engine state is invalid for the requested operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Generic input validation error
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration is invalid or incomplete
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    // ===== General Errors =====

    /// Operation was cancelled by user or system
    #[error("Operation cancelled")]
    Cancelled,

    /// Internal error that should not normally occur
    #[error("Internal error: {0}")]
    InternalError(String),

    // ===== External Library Errors =====

    /// HTTP client error from reqwest
    #[error("HTTP client error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    /// URL parsing error
    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// Helper methods for creating common errors
impl MediaError {
    /// Create an InvalidInput error with a message
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        MediaError::InvalidInput(message.into())
    }

    /// Create an InternalError with a message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        MediaError::InternalError(message.into())
    }

    /// Create a NetworkError
    pub fn network_error<S: Into<String>>(message: S, is_transient: bool) -> Self {
        MediaError::NetworkError {
            message: message.into(),
            is_transient,
        }
    }

    /// Create an InitializationFailed error
    pub fn init_failed<S: Into<String>, M: Into<String>>(id: S, message: M) -> Self {
        MediaError::InitializationFailed {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Check if error is retryable (transient network errors, 5xx responses)
    ///
    /// The download engine never retries on its own; this is advisory for
    /// callers deciding whether to offer a retry button.
    pub fn is_retryable(&self) -> bool {
        match self {
            MediaError::NetworkError { is_transient, .. } => *is_transient,
            MediaError::UnexpectedStatusCode { status_code, .. } => (500..=599).contains(status_code),
            MediaError::ReqwestError(e) => e.is_timeout() || e.is_connect(),
            MediaError::FetchFailed(_) => true,
            _ => false,
        }
    }

    /// Check if this error represents a deliberate cancellation
    pub fn is_cancellation(&self) -> bool {
        matches!(self, MediaError::Cancelled)
    }

    /// Get user-friendly error message suitable for display
    pub fn user_message(&self) -> String {
        match self {
            MediaError::PermissionDenied(_) => {
                "Storage permission is required to save downloads. Please grant it and try again.".to_string()
            }
            MediaError::DirectoryResolutionFailed { content_type, .. } => {
                format!("Could not find a place to save this {}. Please check your storage and retry.", content_type)
            }
            MediaError::NetworkError { .. } | MediaError::ReqwestError(_) => {
                "Network problem while downloading. Please retry.".to_string()
            }
            MediaError::UnexpectedStatusCode { status_code, .. } => {
                format!("The server refused the download (HTTP {}).", status_code)
            }
            MediaError::Cancelled => "Cancelled.".to_string(),
            _ => self.to_string(),
        }
    }
}
