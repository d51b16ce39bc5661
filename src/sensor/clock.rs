//! Real-time clock sources.

use super::Clock;
use crate::error::{AppResult, NodeError};
use crate::record::Timestamp;
use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, NaiveDateTime, Timelike};
use tokio::time::Instant;

/// Software RTC: a calendar time set at boot, advanced by the monotonic clock
///
/// Uses `tokio::time::Instant`, so it follows a paused test clock.
#[derive(Debug, Clone)]
pub struct RtcClock {
    base: NaiveDateTime,
    started: Instant,
}

impl RtcClock {
    /// Start counting from `base`
    pub fn starting_at(base: NaiveDateTime) -> Self {
        Self {
            base,
            started: Instant::now(),
        }
    }

    /// The time the reference board programs into its RTC on boot:
    /// Thursday 2024-06-13 14:45:00
    pub fn board_default() -> Self {
        let base = NaiveDate::from_ymd_opt(2024, 6, 13)
            .and_then(|date| date.and_hms_opt(14, 45, 0))
            .unwrap_or_default();
        Self::starting_at(base)
    }

    /// Current calendar time
    pub fn datetime(&self) -> AppResult<NaiveDateTime> {
        let elapsed = ChronoDuration::from_std(self.started.elapsed())
            .map_err(|e| NodeError::HardwareFault(format!("RTC overflow: {e}")))?;
        self.base
            .checked_add_signed(elapsed)
            .ok_or_else(|| NodeError::HardwareFault("RTC overflow".into()))
    }
}

impl Clock for RtcClock {
    fn now(&self) -> AppResult<Timestamp> {
        let now = self.datetime()?;
        Timestamp::new(
            now.weekday().num_days_from_sunday() as u8,
            now.hour() as u8,
            now.minute() as u8,
            now.second() as u8,
        )
    }
}

/// Clock frozen at one timestamp
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(Timestamp);

impl FixedClock {
    /// Always report `timestamp`
    pub fn new(timestamp: Timestamp) -> Self {
        Self(timestamp)
    }
}

impl Clock for FixedClock {
    fn now(&self) -> AppResult<Timestamp> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_board_default_is_thursday_afternoon() {
        let clock = RtcClock::board_default();
        let now = clock.now().unwrap();
        assert_eq!(now.weekday, 4);
        assert_eq!((now.hour, now.minute), (14, 45));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rtc_follows_monotonic_time() {
        let clock = RtcClock::board_default();
        tokio::time::advance(Duration::from_secs(75)).await;
        let now = clock.now().unwrap();
        assert_eq!((now.hour, now.minute, now.second), (14, 46, 15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rtc_rolls_over_midnight() {
        let base = NaiveDate::from_ymd_opt(2024, 6, 15)
            .unwrap()
            .and_hms_opt(23, 59, 59)
            .unwrap();
        let clock = RtcClock::starting_at(base);
        tokio::time::advance(Duration::from_secs(2)).await;
        let now = clock.now().unwrap();
        // Saturday -> Sunday
        assert_eq!((now.weekday, now.hour, now.minute, now.second), (0, 0, 0, 1));
    }
}
