//! Wall-clock access and ISO-8601 time parsing.
//!
//! All waiting in the harvester goes through the [`Clock`] trait so the
//! scan loop can be driven by [`SystemClock`] in production and by
//! [`ManualClock`] in simulations and tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use std::sync::{Arc, Mutex};

use crate::harvest::HarvestError;
use crate::model::ScanWindow;

/// Window length used when neither an end time nor a window is given.
pub const DEFAULT_WINDOW: &str = "PT24H";

const NAIVE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

const DURATION_PATTERN: &str = r"^P(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?)?$";

/// Source of wall-clock time and deadline waits.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current time in UTC.
    fn now(&self) -> DateTime<Utc>;

    /// Suspends the caller until `deadline`. Returns immediately if the
    /// deadline has already passed.
    async fn sleep_until(&self, deadline: DateTime<Utc>);
}

/// Real clock backed by `chrono::Utc::now` and `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        let wait = non_negative(deadline - Utc::now());
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

/// Virtual clock: `sleep_until` jumps straight to the deadline.
///
/// Clones share the same timeline, so a test can hand one clone to the
/// code under test and inspect the other. Every requested deadline is
/// recorded, including ones already in the past.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualTimeline>>,
}

#[derive(Debug)]
struct ManualTimeline {
    now: DateTime<Utc>,
    sleeps: Vec<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualTimeline {
                now,
                sleeps: Vec::new(),
            })),
        }
    }

    /// Moves virtual time forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut timeline = self.lock();
        timeline.now += by;
    }

    /// Deadlines passed to `sleep_until`, in call order.
    pub fn sleeps(&self) -> Vec<DateTime<Utc>> {
        self.lock().sleeps.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualTimeline> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.lock().now
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        let mut timeline = self.lock();
        timeline.sleeps.push(deadline);
        if deadline > timeline.now {
            timeline.now = deadline;
        }
    }
}

/// Converts a signed delta to a `std` duration, clamping negatives to zero.
pub fn non_negative(delta: Duration) -> std::time::Duration {
    delta.to_std().unwrap_or(std::time::Duration::ZERO)
}

/// Parses an ISO-8601 date and time into UTC.
///
/// Accepted forms: `2024-01-01T00:00:00` (local time),
/// `2024-01-01T00:00:00Z`, `2024-01-01T00:00:00-0300` and
/// `2024-01-01T00:00:00-03:00`.
pub fn parse_datetime(value: &str) -> Result<DateTime<Utc>, HarvestError> {
    let value = value.trim();

    if let Some(utc) = value.strip_suffix('Z') {
        let naive = NaiveDateTime::parse_from_str(utc, NAIVE_FORMAT)
            .map_err(|e| HarvestError::Time(format!("'{value}': {e}")))?;
        return Ok(Utc.from_utc_datetime(&naive));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%z", "%Y-%m-%dT%H:%M:%S%:z"] {
        if let Ok(parsed) = DateTime::parse_from_str(value, format) {
            return Ok(parsed.with_timezone(&Utc));
        }
    }

    let naive = NaiveDateTime::parse_from_str(value, NAIVE_FORMAT).map_err(|e| {
        HarvestError::Time(format!("'{value}': expected ISO 8601 date and time: {e}"))
    })?;

    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| HarvestError::Time(format!("'{value}' does not exist in local time")))
}

/// Parses an ISO-8601 duration of the form `P[nD][T[nH][nM][nS]]`.
pub fn parse_duration(value: &str) -> Result<Duration, HarvestError> {
    let value = value.trim();
    let pattern = Regex::new(DURATION_PATTERN)
        .map_err(|e| HarvestError::Time(format!("duration pattern: {e}")))?;

    let captures = pattern
        .captures(value)
        .ok_or_else(|| HarvestError::Time(format!("'{value}': expected ISO 8601 duration")))?;

    let mut total = Duration::zero();
    let mut matched = false;

    for (index, unit_seconds) in [(1, 86_400_i64), (2, 3_600), (3, 60), (4, 1)] {
        if let Some(component) = captures.get(index) {
            matched = true;
            let amount: i64 = component
                .as_str()
                .parse()
                .map_err(|e| HarvestError::Time(format!("'{value}': {e}")))?;
            let seconds = amount
                .checked_mul(unit_seconds)
                .ok_or_else(|| HarvestError::Time(format!("'{value}' is too long")))?;
            total = Duration::try_seconds(seconds)
                .and_then(|component| total.checked_add(&component))
                .ok_or_else(|| HarvestError::Time(format!("'{value}' is too long")))?;
        }
    }

    if !matched {
        return Err(HarvestError::Time(format!(
            "'{value}': duration has no components"
        )));
    }

    Ok(total)
}

/// Resolves command-line time arguments into a [`ScanWindow`].
///
/// `start` defaults to `now`. `end` takes precedence over `window`; when
/// absent it is `start + window` (24 hours by default).
pub fn resolve_window(
    now: DateTime<Utc>,
    start: Option<&str>,
    end: Option<&str>,
    window: Option<&str>,
    period: Duration,
) -> Result<ScanWindow, HarvestError> {
    let start = match start {
        Some(value) => parse_datetime(value)?,
        None => now,
    };

    let end = match end {
        Some(value) => parse_datetime(value)?,
        None => {
            let length = parse_duration(window.unwrap_or(DEFAULT_WINDOW))?;
            start
                .checked_add_signed(length)
                .ok_or_else(|| HarvestError::Time("end time out of range".to_string()))?
        }
    };

    ScanWindow::new(start, end, period)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_datetime_utc_and_offsets() {
        assert_eq!(parse_datetime("2024-01-01T12:00:00Z").unwrap(), noon());
        assert_eq!(parse_datetime("2024-01-01T09:00:00-0300").unwrap(), noon());
        assert_eq!(parse_datetime("2024-01-01T09:00:00-03:00").unwrap(), noon());
    }

    #[test]
    fn test_parse_datetime_local() {
        let parsed = parse_datetime("2024-01-01T12:00:00").unwrap();
        // Any real local offset is within a day of UTC.
        assert!((parsed - noon()).num_hours().abs() <= 14);
    }

    #[test]
    fn test_parse_datetime_rejects_garbage() {
        assert!(matches!(
            parse_datetime("yesterday"),
            Err(HarvestError::Time(_))
        ));
        assert!(parse_datetime("2024-13-01T00:00:00Z").is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("PT10M").unwrap(), Duration::minutes(10));
        assert_eq!(
            parse_duration("PT1H30M").unwrap(),
            Duration::minutes(90)
        );
        assert_eq!(
            parse_duration("P1DT2S").unwrap(),
            Duration::seconds(86_402)
        );
        assert_eq!(parse_duration("P2D").unwrap(), Duration::days(2));
    }

    #[test]
    fn test_parse_duration_rejects_empty_and_malformed() {
        assert!(parse_duration("P").is_err());
        assert!(parse_duration("PT").is_err());
        assert!(parse_duration("10 minutes").is_err());
        assert!(parse_duration("PT-5M").is_err());
    }

    #[test]
    fn test_resolve_window_defaults() {
        let window = resolve_window(noon(), None, None, None, Duration::minutes(2)).unwrap();
        assert_eq!(window.start(), noon());
        assert_eq!(window.end(), noon() + Duration::hours(24));
        assert_eq!(window.period(), Duration::minutes(2));
    }

    #[test]
    fn test_resolve_window_end_overrides_length() {
        let window = resolve_window(
            noon(),
            Some("2024-01-01T12:00:00Z"),
            Some("2024-01-01T13:00:00Z"),
            Some("PT5H"),
            Duration::minutes(10),
        )
        .unwrap();
        assert_eq!(window.end(), noon() + Duration::hours(1));
    }

    #[test]
    fn test_resolve_window_rejects_end_before_start() {
        let result = resolve_window(
            noon(),
            Some("2024-01-01T12:00:00Z"),
            Some("2024-01-01T11:00:00Z"),
            None,
            Duration::minutes(10),
        );
        assert!(matches!(result, Err(HarvestError::Time(_))));
    }

    #[tokio::test]
    async fn test_manual_clock_never_goes_backwards() {
        let clock = ManualClock::new(noon());
        clock.sleep_until(noon() - Duration::minutes(5)).await;
        assert_eq!(clock.now(), noon());

        clock.sleep_until(noon() + Duration::minutes(5)).await;
        assert_eq!(clock.now(), noon() + Duration::minutes(5));
        assert_eq!(clock.sleeps().len(), 2);
    }

    #[test]
    fn test_non_negative_clamps() {
        assert_eq!(non_negative(Duration::seconds(-3)), std::time::Duration::ZERO);
        assert_eq!(
            non_negative(Duration::seconds(3)),
            std::time::Duration::from_secs(3)
        );
    }
}
