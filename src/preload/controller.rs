//! Decoder/controller collaborator
//!
//! A controller handle is whatever the platform needs to play one item (a
//! decoder, a player instance). It is expensive to create and must be
//! released explicitly.

use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

/// Creates and releases controller handles
///
/// Must be safe to call concurrently up to `max_concurrent_inits` times.
#[async_trait]
pub trait ControllerFactory: Send + Sync + 'static {
    type Handle: Send + Sync + 'static;

    async fn create_handle(&self, url: &str) -> Result<Self::Handle>;

    async fn release_handle(&self, handle: Arc<Self::Handle>);
}

/// Lifecycle of one item's controller
///
/// `Inactive → Pending → Initializing → Ready`, or `Failed` when the current
/// item cannot be initialised. Leaving the window returns to `Inactive`.
/// A failed item is tried again after the current index changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum ControllerState {
    Inactive,
    /// Waiting for an initialisation slot
    Pending,
    Initializing,
    Ready,
    Failed(String),
}

impl ControllerState {
    /// Only ready items may render or play
    pub fn is_playable(&self) -> bool {
        matches!(self, ControllerState::Ready)
    }
}
