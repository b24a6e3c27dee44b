//! Scan-cycle timer gating the harvest loop to its time window.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::debug;

use crate::model::ScanWindow;
use crate::timing::{non_negative, Clock};

/// Gates execution to a `[start, end)` window and paces scan cycles.
///
/// The gate owns the `next_time` marker. It only moves forward by one
/// period per [`stop`](Self::stop) that returns `false`, or backward by
/// exactly one period on [`rewind`](Self::rewind). A second rewind without
/// an intervening advance is ignored so the marker never regresses further.
#[derive(Debug)]
pub struct WallClockGate<C: Clock> {
    window: ScanWindow,
    next_time: DateTime<Utc>,
    rewindable: bool,
    clock: C,
}

impl<C: Clock> WallClockGate<C> {
    pub fn new(window: ScanWindow, clock: C) -> Self {
        Self {
            window,
            next_time: window.start(),
            rewindable: false,
            clock,
        }
    }

    pub fn window(&self) -> &ScanWindow {
        &self.window
    }

    /// Boundary the next non-terminal `stop()` waits for.
    pub fn next_time(&self) -> DateTime<Utc> {
        self.next_time
    }

    /// Waits until the window opens. Returns at once if already past it.
    pub async fn start(&self) {
        self.clock.sleep_until(self.window.start()).await;
    }

    /// Time since the window opened.
    pub fn elapsed(&self) -> Duration {
        non_negative(self.clock.now() - self.window.start())
    }

    /// Time since the nominal start of the current cycle, overrun included.
    pub fn lapse(&self) -> Duration {
        non_negative(self.clock.now() - self.next_time + self.window.period())
    }

    /// Re-offers the current cycle boundary on the next `stop()`.
    pub fn rewind(&mut self) {
        if !self.rewindable {
            debug!(next_time = %self.next_time, "Gate already rewound, ignoring");
            return;
        }
        self.next_time -= self.window.period();
        self.rewindable = false;
        debug!(next_time = %self.next_time, "Gate rewound one period");
    }

    /// Returns `true` once the window has closed.
    ///
    /// Otherwise waits for the next cycle boundary, advances it by one
    /// period and returns `false`. A boundary at or past `end` is never
    /// offered: the wait is cut short at `end` and yields `true`.
    pub async fn stop(&mut self) -> bool {
        if self.clock.now() >= self.window.end() {
            return true;
        }

        let deadline = self.next_time.min(self.window.end());
        self.clock.sleep_until(deadline).await;

        if self.clock.now() >= self.window.end() {
            return true;
        }

        self.next_time += self.window.period();
        self.rewindable = true;
        false
    }
}
