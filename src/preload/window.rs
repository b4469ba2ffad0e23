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


//! Window arithmetic
//!
//! Pure functions: which positions belong to the window, in which order they
//! should be initialised, and what changes between the live set and the
//! desired set.
//!
//! # Window
//! `[current - keep_behind, current + preload_ahead]`, clipped to the feed.
//! A current index past the end is clamped to the last item; an empty feed
//! has no window.
//!
//! # Creation order
//! Ascending distance from the current index. On a tie the position ahead
//! wins, since that is the direction of travel.

use crate::config::PreloadConfig;
use crate::preload::item::VideoItem;
use std::collections::HashSet;
use std::ops::RangeInclusive;

/// Positions in the window, or `None` for an empty feed
pub fn window_range(
    current: usize,
    len: usize,
    preload_ahead: usize,
    keep_behind: usize,
) -> Option<RangeInclusive<usize>> {
    if len == 0 {
        return None;
    }

    let current = current.min(len - 1);
    let start = current.saturating_sub(keep_behind);
    let end = current.saturating_add(preload_ahead).min(len - 1);
    Some(start..=end)
}

/// Positions of `range` ordered closest-first around `current`
pub fn closest_first(current: usize, range: RangeInclusive<usize>) -> Vec<usize> {
    let mut positions: Vec<usize> = range.collect();
    positions.sort_by_key(|&pos| (pos.abs_diff(current), pos < current));
    positions
}

/// Difference between the live controller set and the desired window
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowPlan {
    /// Clamped current position, `None` for an empty feed
    pub current_index: Option<usize>,

    /// Ids that should be live, closest-first
    pub desired: Vec<String>,

    /// Desired ids with no live slot yet, closest-first
    pub to_create: Vec<String>,

    /// Live ids outside the window, sorted
    pub to_dispose: Vec<String>,
}

impl WindowPlan {
    pub fn is_noop(&self) -> bool {
        self.to_create.is_empty() && self.to_dispose.is_empty()
    }
}

/// Compute the transition from `live` to the window around `current`
pub fn plan_window<'a, T>(
    current: usize,
    items: &[VideoItem<T>],
    live: impl IntoIterator<Item = &'a String>,
    config: &PreloadConfig,
) -> WindowPlan {
    let live: HashSet<&String> = live.into_iter().collect();

    let Some(range) = window_range(current, items.len(), config.preload_ahead, config.keep_behind) else {
        let mut to_dispose: Vec<String> = live.into_iter().cloned().collect();
        to_dispose.sort();
        return WindowPlan {
            to_dispose,
            ..Default::default()
        };
    };

    let current = current.min(items.len() - 1);
    let desired: Vec<String> = closest_first(current, range)
        .into_iter()
        .map(|pos| items[pos].id.clone())
        .collect();
    let desired_set: HashSet<&String> = desired.iter().collect();

    let to_create = desired.iter().filter(|id| !live.contains(id)).cloned().collect();
    let mut to_dispose: Vec<String> = live
        .iter()
        .filter(|id| !desired_set.contains(*id))
        .map(|id| (*id).clone())
        .collect();
    to_dispose.sort();

    WindowPlan {
        current_index: Some(current),
        desired,
        to_create,
        to_dispose,
    }
}
