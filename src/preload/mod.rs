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


//! Video preloading
//!
//! Keeps decoder/player handles alive for a sliding window around the item on
//! screen, so that scrolling one step lands on an already initialised
//! controller.
//!
//! - [`window`] - pure window arithmetic and diffing
//! - [`engine`] - the [`PreloadWindow`] that owns handles
//! - [`controller`] - the [`ControllerFactory`] collaborator

pub mod controller;
pub mod engine;
pub mod item;
pub mod window;

pub use controller::{ControllerFactory, ControllerState};
pub use engine::{PreloadWindow, WindowSnapshot};
pub use item::VideoItem;
pub use window::{plan_window, window_range, WindowPlan};
