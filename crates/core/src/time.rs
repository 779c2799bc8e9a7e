//! Tick-based timestamps as stored in the cache file.
//!
//! A tick is 100 nanoseconds counted from `0001-01-01T00:00:00Z`. Expiry
//! and renewal columns both use this unit.

use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;

/// Ticks per second.
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Ticks between `0001-01-01` and the Unix epoch.
pub const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;

/// `9999-12-31T23:59:59.9999999Z`. Timestamps and spans clamp to it, so the
/// sum of any two stays inside SQLite's INTEGER range.
pub const MAX_TICKS: i64 = 3_155_378_975_999_999_999;

/// A point in time, in ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticks(pub i64);

impl Ticks {
    /// Current UTC time. Read fresh on every call.
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Convert any timezone-aware timestamp, normalizing to UTC. Instants
    /// outside `0001-01-01..=MAX_TICKS` clamp to the nearest bound.
    pub fn from_datetime<Tz: TimeZone>(at: DateTime<Tz>) -> Self {
        let utc = at.with_timezone(&Utc);
        let ticks = i128::from(UNIX_EPOCH_TICKS)
            + i128::from(utc.timestamp()) * i128::from(TICKS_PER_SECOND)
            + i128::from(utc.timestamp_subsec_nanos() / 100);
        Ticks(ticks.clamp(0, i128::from(MAX_TICKS)) as i64)
    }

    /// Back to a UTC timestamp, if representable.
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        let since_epoch = self.0 - UNIX_EPOCH_TICKS;
        let secs = since_epoch.div_euclid(TICKS_PER_SECOND);
        let nanos = (since_epoch.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
        DateTime::from_timestamp(secs, nanos)
    }

    pub fn saturating_add(self, span: TickSpan) -> Self {
        Ticks(self.0.saturating_add(span.0))
    }
}

/// A duration, in ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TickSpan(pub i64);

impl From<Duration> for TickSpan {
    fn from(d: Duration) -> Self {
        TickSpan(i64::try_from(d.as_nanos() / 100).map_or(MAX_TICKS, |ticks| ticks.min(MAX_TICKS)))
    }
}

impl From<TickSpan> for Duration {
    fn from(span: TickSpan) -> Self {
        Duration::from_nanos((span.0.max(0) as u64).saturating_mul(100))
    }
}
