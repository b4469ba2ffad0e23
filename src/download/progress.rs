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


//! Transfer progress tracking
//!
//! A transfer reports raw byte counts through [`ProgressFn`]. The
//! [`ProgressTracker`] sits on the transfer side: it smooths speed over a
//! sliding window and throttles how often the engine is told.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Progress callback; a `None` total means the size is unknown
pub type ProgressFn = Arc<dyn Fn(ProgressReport) + Send + Sync>;

/// One progress report from a transfer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressReport {
    pub received: u64,
    pub total: Option<u64>,
    pub bytes_per_sec: f64,
}

impl ProgressReport {
    pub fn new(received: u64, total: Option<u64>) -> Self {
        Self {
            received,
            total,
            bytes_per_sec: 0.0,
        }
    }

    /// Ratio in `[0.0, 1.0]`, or `None` when the total is unknown
    pub fn ratio(&self) -> Option<f64> {
        match self.total {
            Some(total) if total > 0 => Some((self.received as f64 / total as f64).min(1.0)),
            _ => None,
        }
    }

    /// Estimated time remaining, when both total and speed are known
    pub fn eta(&self) -> Option<Duration> {
        let total = self.total?;
        if self.bytes_per_sec <= 0.0 {
            return None;
        }
        let remaining = total.saturating_sub(self.received);
        Some(Duration::from_secs_f64(remaining as f64 / self.bytes_per_sec))
    }
}

/// Speed tracker with moving average
///
/// Uses a sliding window to smooth out network fluctuations
#[derive(Debug)]
pub struct SpeedTracker {
    samples: VecDeque<(Instant, u64)>,
    window_duration: Duration,
}

impl SpeedTracker {
    /// Create new speed tracker with default 10-second window
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(10))
    }

    pub fn with_window(window_duration: Duration) -> Self {
        Self {
            samples: VecDeque::new(),
            window_duration,
        }
    }

    /// Add a position sample (total bytes received so far)
    pub fn add_position(&mut self, position: u64) {
        self.add_position_at(Instant::now(), position);
    }

    fn add_position_at(&mut self, now: Instant, position: u64) {
        self.samples.push_back((now, position));

        while let Some((timestamp, _)) = self.samples.front() {
            if now.duration_since(*timestamp) > self.window_duration {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Current average speed in bytes per second
    pub fn average_speed(&self) -> f64 {
        let (Some(first), Some(last)) = (self.samples.front(), self.samples.back()) else {
            return 0.0;
        };

        let bytes_delta = last.1.saturating_sub(first.1);
        let time_delta = last.0.duration_since(first.0).as_secs_f64();

        if time_delta > 0.0 {
            bytes_delta as f64 / time_delta
        } else {
            0.0
        }
    }
}

impl Default for SpeedTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Throttled progress reporting for one transfer attempt
pub struct ProgressTracker {
    callback: ProgressFn,
    speed: SpeedTracker,
    total: Option<u64>,
    received: u64,
    last_emit: Option<Instant>,
    interval: Duration,
}

impl ProgressTracker {
    pub fn new(callback: ProgressFn, total: Option<u64>, interval: Duration) -> Self {
        Self {
            callback,
            speed: SpeedTracker::new(),
            total,
            received: 0,
            last_emit: None,
            interval,
        }
    }

    /// Record newly received bytes, emitting if the interval has elapsed
    pub fn advance(&mut self, chunk_len: u64) {
        self.received += chunk_len;
        self.speed.add_position(self.received);

        let now = Instant::now();
        let due = self
            .last_emit
            .map(|last| now.duration_since(last) >= self.interval)
            .unwrap_or(true);

        if due {
            self.last_emit = Some(now);
            self.emit();
        }
    }

    /// Emit unconditionally (used for the final report)
    pub fn flush(&mut self) {
        self.last_emit = Some(Instant::now());
        self.emit();
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    fn emit(&self) {
        (self.callback)(ProgressReport {
            received: self.received,
            total: self.total,
            bytes_per_sec: self.speed.average_speed(),
        });
    }
}
