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


//! Preload window engine
//!
//! Owns the feed and the controller-handle map. After every change the live
//! slot set is reconciled against the window around the current index:
//! slots outside the window are dropped immediately (async release is
//! spawned), new slots are queued closest-first and started while fewer than
//! `max_concurrent_inits` initialisations are in flight.
//!
//! Handles are keyed by item id. Replacing an item's payload or reordering
//! the feed never touches a live handle.
//!
//! Mutating methods are synchronous but spawn work, so they must be called
//! from inside a Tokio runtime.

use crate::config::PreloadConfig;
use crate::error::Result;
use crate::preload::controller::{ControllerFactory, ControllerState};
use crate::preload::item::VideoItem;
use crate::preload::window::{plan_window, WindowPlan};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;

/// Observer view of the window
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WindowSnapshot {
    pub current_index: usize,
    pub len: usize,

    /// Live slots in feed order
    pub states: Vec<(String, ControllerState)>,
}

enum SlotState<H> {
    Pending,
    Initializing,
    Ready(Arc<H>),
    Failed(String),
}

struct Slot<H> {
    generation: u64,
    cancel: CancellationToken,
    state: SlotState<H>,
}

impl<H> Slot<H> {
    fn controller_state(&self) -> ControllerState {
        match &self.state {
            SlotState::Pending => ControllerState::Pending,
            SlotState::Initializing => ControllerState::Initializing,
            SlotState::Ready(_) => ControllerState::Ready,
            SlotState::Failed(message) => ControllerState::Failed(message.clone()),
        }
    }
}

struct WindowState<T, H> {
    items: Vec<VideoItem<T>>,
    current_index: usize,
    slots: HashMap<String, Slot<H>>,
    pending: VecDeque<String>,
    in_flight: usize,
    releasing: usize,
    next_generation: u64,
}

impl<T, H> WindowState<T, H> {
    fn current_id(&self) -> Option<&str> {
        if self.items.is_empty() {
            return None;
        }
        let index = self.current_index.min(self.items.len() - 1);
        Some(self.items[index].id.as_str())
    }

    fn is_settled(&self) -> bool {
        self.pending.is_empty() && self.in_flight == 0 && self.releasing == 0
    }

    fn snapshot(&self) -> WindowSnapshot {
        WindowSnapshot {
            current_index: self.current_index,
            len: self.items.len(),
            states: self
                .items
                .iter()
                .filter_map(|item| {
                    self.slots
                        .get(&item.id)
                        .map(|slot| (item.id.clone(), slot.controller_state()))
                })
                .collect(),
        }
    }

    /// Drop slots for `ids`, returning ready handles to release
    fn remove_slots(&mut self, ids: &[String]) -> Vec<Arc<H>> {
        let mut handles = Vec::new();
        for id in ids {
            if let Some(slot) = self.slots.remove(id) {
                slot.cancel.cancel();
                if let SlotState::Ready(handle) = slot.state {
                    handles.push(handle);
                }
            }
        }
        self.pending.retain(|id| self.slots.contains_key(id));
        handles
    }
}

struct WindowInner<T, F: ControllerFactory> {
    config: PreloadConfig,
    factory: Arc<F>,
    state: Mutex<WindowState<T, F::Handle>>,
    snapshot_tx: watch::Sender<WindowSnapshot>,
    idle: Notify,
    shutdown: CancellationToken,
}

/// Viewport-aware controller preloading over a feed of `VideoItem<T>`
pub struct PreloadWindow<T, F: ControllerFactory>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<WindowInner<T, F>>,
}

impl<T, F> PreloadWindow<T, F>
where
    T: Clone + Send + Sync + 'static,
    F: ControllerFactory,
{
    pub fn new(factory: Arc<F>, config: PreloadConfig) -> Result<Self> {
        config.validate()?;
        let (snapshot_tx, _) = watch::channel(WindowSnapshot::default());

        Ok(Self {
            inner: Arc::new(WindowInner {
                config,
                factory,
                state: Mutex::new(WindowState {
                    items: Vec::new(),
                    current_index: 0,
                    slots: HashMap::new(),
                    pending: VecDeque::new(),
                    in_flight: 0,
                    releasing: 0,
                    next_generation: 0,
                }),
                snapshot_tx,
                idle: Notify::new(),
                shutdown: CancellationToken::new(),
            }),
        })
    }

    pub fn config(&self) -> &PreloadConfig {
        &self.inner.config
    }

    /// Move the viewport and reconcile the window around it
    pub fn recompute_window(&self, current_index: usize) -> WindowPlan {
        {
            let mut state = self.inner.state.lock();
            if state.current_index != current_index {
                // Failed slots hold no handle; dropping them lets reconcile retry
                state.slots.retain(|_, slot| !matches!(slot.state, SlotState::Failed(_)));
            }
            state.current_index = current_index;
        }
        self.inner.reconcile()
    }

    pub fn current_index(&self) -> usize {
        self.inner.state.lock().current_index
    }

    /// Replace one item's payload in place; live handles are untouched
    pub fn update_item_data(&self, id: &str, data: T) -> bool {
        let updated = {
            let mut state = self.inner.state.lock();
            match state.items.iter_mut().find(|item| item.id == id) {
                Some(item) => {
                    item.data = data;
                    true
                }
                None => false,
            }
        };

        if updated {
            tracing::debug!(id, "Item data updated");
        }
        updated
    }

    /// Replace the feed, keeping handles for ids present in both
    pub fn update_items(&self, items: Vec<VideoItem<T>>) -> WindowPlan {
        {
            let mut state = self.inner.state.lock();
            state.items = dedupe_by_id(items);
        }
        self.inner.reconcile()
    }

    /// Replace the feed and move the viewport in one step
    pub fn reset_items(&self, items: Vec<VideoItem<T>>, current_index: usize) -> WindowPlan {
        {
            let mut state = self.inner.state.lock();
            state.items = dedupe_by_id(items);
            state.current_index = current_index;
        }
        self.inner.reconcile()
    }

    /// Append items whose ids are not already in the feed
    ///
    /// Existing entries keep their payload. Returns the number appended.
    pub fn append_items(&self, items: Vec<VideoItem<T>>) -> usize {
        let appended = {
            let mut state = self.inner.state.lock();
            let mut known: HashSet<String> = state.items.iter().map(|item| item.id.clone()).collect();
            let before = state.items.len();
            for item in items {
                if known.insert(item.id.clone()) {
                    state.items.push(item);
                }
            }
            state.items.len() - before
        };

        if appended > 0 {
            self.inner.reconcile();
        }
        appended
    }

    /// Release every handle outside the window around `index`
    ///
    /// Nothing new is created; the current index is left as is.
    pub fn dispose_except(&self, index: usize) -> Vec<String> {
        let (disposed, handles) = {
            let mut state = self.inner.state.lock();
            let plan = plan_window(index, &state.items, state.slots.keys(), &self.inner.config);
            let handles = state.remove_slots(&plan.to_dispose);
            (plan.to_dispose, handles)
        };

        if !disposed.is_empty() {
            tracing::info!(count = disposed.len(), index, "Disposed controllers outside window");
        }
        self.inner.release(handles);
        self.inner.publish();
        disposed
    }

    pub fn items(&self) -> Vec<VideoItem<T>> {
        self.inner.state.lock().items.clone()
    }

    pub fn item(&self, id: &str) -> Option<VideoItem<T>> {
        self.inner.state.lock().items.iter().find(|item| item.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The live handle for an id, if ready
    pub fn handle(&self, id: &str) -> Option<Arc<F::Handle>> {
        match self.inner.state.lock().slots.get(id).map(|slot| &slot.state) {
            Some(SlotState::Ready(handle)) => Some(Arc::clone(handle)),
            _ => None,
        }
    }

    pub fn state(&self, id: &str) -> ControllerState {
        self.inner
            .state
            .lock()
            .slots
            .get(id)
            .map(Slot::controller_state)
            .unwrap_or(ControllerState::Inactive)
    }

    /// Ids holding a ready handle, in feed order
    pub fn ready_ids(&self) -> Vec<String> {
        let state = self.inner.state.lock();
        state
            .items
            .iter()
            .filter(|item| matches!(state.slots.get(&item.id).map(|s| &s.state), Some(SlotState::Ready(_))))
            .map(|item| item.id.clone())
            .collect()
    }

    /// Ids with any slot (pending, initializing, ready or failed), in feed order
    pub fn live_ids(&self) -> Vec<String> {
        let state = self.inner.state.lock();
        state
            .items
            .iter()
            .filter(|item| state.slots.contains_key(&item.id))
            .map(|item| item.id.clone())
            .collect()
    }

    pub fn initializing_count(&self) -> usize {
        self.inner.state.lock().in_flight
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        self.inner.state.lock().snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<WindowSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    /// Wait until no initialisation is pending or in flight and every
    /// release has completed
    pub async fn settled(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.inner.state.lock().is_settled() {
                return;
            }
            notified.await;
        }
    }

    /// Cancel outstanding initialisations and release every handle
    ///
    /// Fire-and-forget: releases are spawned, not awaited.
    pub fn dispose(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        self.inner.shutdown.cancel();

        let handles = {
            let mut state = self.inner.state.lock();
            let ids: Vec<String> = state.slots.keys().cloned().collect();
            state.remove_slots(&ids)
        };
        tracing::info!(released = handles.len(), "Disposing preload window");
        self.inner.release(handles);
        self.inner.publish();
    }
}

impl<T, F> Drop for PreloadWindow<T, F>
where
    T: Clone + Send + Sync + 'static,
    F: ControllerFactory,
{
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<T, F> WindowInner<T, F>
where
    T: Clone + Send + Sync + 'static,
    F: ControllerFactory,
{
    /// Bring the slot map in line with the window around the current index
    fn reconcile(self: &Arc<Self>) -> WindowPlan {
        let (plan, handles) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            let plan = plan_window(state.current_index, &state.items, state.slots.keys(), &self.config);
            let handles = state.remove_slots(&plan.to_dispose);

            if !self.shutdown.is_cancelled() {
                for id in &plan.to_create {
                    state.next_generation += 1;
                    state.slots.insert(
                        id.clone(),
                        Slot {
                            generation: state.next_generation,
                            cancel: self.shutdown.child_token(),
                            state: SlotState::Pending,
                        },
                    );
                }
            }

            // Pending work is re-ordered around the new viewport
            let slots = &state.slots;
            state.pending = plan
                .desired
                .iter()
                .filter(|id| matches!(slots.get(*id).map(|s| &s.state), Some(SlotState::Pending)))
                .cloned()
                .collect();

            (plan, handles)
        };

        if !plan.is_noop() {
            tracing::debug!(
                current = ?plan.current_index,
                create = plan.to_create.len(),
                dispose = plan.to_dispose.len(),
                "Window recomputed"
            );
        }

        self.release(handles);
        self.pump();
        self.publish();
        plan
    }

    /// Start pending initialisations while slots are free
    fn pump(self: &Arc<Self>) {
        let mut launches = Vec::new();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            while state.in_flight < self.config.max_concurrent_inits {
                let Some(id) = state.pending.pop_front() else {
                    break;
                };
                let Some(url) = state.items.iter().find(|item| item.id == id).map(|item| item.url.clone()) else {
                    state.slots.remove(&id);
                    continue;
                };
                let Some(slot) = state.slots.get_mut(&id) else {
                    continue;
                };
                if !matches!(slot.state, SlotState::Pending) {
                    continue;
                }

                slot.state = SlotState::Initializing;
                launches.push((id, slot.generation, slot.cancel.clone(), url));
                state.in_flight += 1;
            }
        }

        let started = !launches.is_empty();
        for (id, generation, cancel, url) in launches {
            tracing::debug!(id = %id, generation, "Controller initialization started");
            let inner = Arc::clone(self);
            tokio::spawn(async move {
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    result = inner.factory.create_handle(&url) => Some(result),
                };
                inner.finish_init(&id, generation, result);
            });
        }
        if started {
            self.publish();
        }
    }

    fn finish_init(self: &Arc<Self>, id: &str, generation: u64, result: Option<Result<F::Handle>>) {
        let mut orphan = None;
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.in_flight -= 1;

            let is_current = state.current_id() == Some(id);
            let matches_slot = state
                .slots
                .get(id)
                .map(|slot| slot.generation == generation)
                .unwrap_or(false);

            match (matches_slot, result) {
                (true, Some(Ok(handle))) => {
                    if let Some(slot) = state.slots.get_mut(id) {
                        slot.state = SlotState::Ready(Arc::new(handle));
                    }
                    tracing::debug!(id, "Controller ready");
                }
                (true, Some(Err(e))) if is_current => {
                    tracing::error!(id, error = %e, "Controller initialization failed for current item");
                    if let Some(slot) = state.slots.get_mut(id) {
                        slot.state = SlotState::Failed(e.to_string());
                    }
                }
                (true, Some(Err(e))) => {
                    tracing::warn!(id, error = %e, "Controller initialization failed, skipping");
                    state.slots.remove(id);
                }
                (true, None) => {
                    state.slots.remove(id);
                }
                (false, Some(Ok(handle))) => {
                    orphan = Some(Arc::new(handle));
                }
                (false, _) => {}
            }
        }

        if let Some(handle) = orphan {
            tracing::debug!(id, "Releasing controller that left the window during initialization");
            self.release(vec![handle]);
        }

        self.pump();
        self.publish();
    }

    fn release(self: &Arc<Self>, handles: Vec<Arc<F::Handle>>) {
        if handles.is_empty() {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(count = handles.len(), "No runtime available, dropping controllers without release");
            return;
        };

        self.state.lock().releasing += handles.len();
        for handle in handles {
            let inner = Arc::clone(self);
            runtime.spawn(async move {
                inner.factory.release_handle(handle).await;
                inner.state.lock().releasing -= 1;
                inner.publish();
            });
        }
    }

    fn publish(&self) {
        let (snapshot, settled) = {
            let state = self.state.lock();
            (state.snapshot(), state.is_settled())
        };
        self.snapshot_tx.send_replace(snapshot);
        if settled {
            self.idle.notify_waiters();
        }
    }
}

fn dedupe_by_id<T>(items: Vec<VideoItem<T>>) -> Vec<VideoItem<T>> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|item| seen.insert(item.id.clone())).collect()
}
