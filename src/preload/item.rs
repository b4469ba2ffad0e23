//! Feed entries

use serde::{Deserialize, Serialize};

/// One media entry carrying an arbitrary app payload
///
/// Identity is the `id`; the position in the feed changes under pagination
/// and must never be used as a key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoItem<T> {
    pub id: String,
    pub url: String,
    pub thumbnail_url: Option<String>,
    pub data: T,
}

impl<T> VideoItem<T> {
    pub fn new(id: impl Into<String>, url: impl Into<String>, data: T) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            thumbnail_url: None,
            data,
        }
    }

    pub fn with_thumbnail(mut self, thumbnail_url: impl Into<String>) -> Self {
        self.thumbnail_url = Some(thumbnail_url.into());
        self
    }
}
