use chrono::{DateTime, Duration, Utc};

use crate::harvest::HarvestError;

/// Immutable `(start, end, period)` triple resolved once before a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    period: Duration,
}

impl ScanWindow {
    /// Creates a window, rejecting `start >= end` and non-positive periods.
    pub fn new(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        period: Duration,
    ) -> Result<Self, HarvestError> {
        if start >= end {
            return Err(HarvestError::Time(format!(
                "end time {end} must be later than start time {start}"
            )));
        }
        if period <= Duration::zero() {
            return Err(HarvestError::Time(
                "scan interval must be longer than zero".to_string(),
            ));
        }
        Ok(Self { start, end, period })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

/// Phase of a harvest session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestState {
    AwaitingStart,
    FetchingInventory,
    Downloading,
    Reauthorizing,
    Finished,
}
