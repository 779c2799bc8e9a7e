//! Entry options and the stored expiry encoding.
//!
//! A row's `expiry`/`renewal` pair is one of three shapes, modeled by
//! [`Expiry`]. Precedence when computing it from [`EntryOptions`]:
//!
//! 1. An absolute expiration, if given, sets the base expiry.
//! 2. Otherwise a relative-to-now duration sets it.
//! 3. A sliding expiration becomes the renewal, and the stored expiry is
//!    `max(base, now) + renewal`. Sliding always extends; an absolute value
//!    only sets the initial floor and is not enforced as a ceiling.

use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;

use crate::Error;
use crate::time::{TickSpan, Ticks};

/// Per-write expiration options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryOptions {
    pub absolute_expiration: Option<DateTime<Utc>>,
    pub absolute_expiration_relative_to_now: Option<Duration>,
    pub sliding_expiration: Option<Duration>,
}

impl EntryOptions {
    /// Options for an entry that never expires.
    pub fn new() -> Self {
        Self::default()
    }

    /// Expire at a fixed point in time. Any timezone is accepted and normalized to UTC.
    pub fn absolute_expiration<Tz: TimeZone>(mut self, at: DateTime<Tz>) -> Self {
        self.absolute_expiration = Some(at.with_timezone(&Utc));
        self
    }

    /// Expire a fixed duration after the write.
    pub fn absolute_expiration_relative_to_now(mut self, ttl: Duration) -> Self {
        self.absolute_expiration_relative_to_now = Some(ttl);
        self
    }

    /// Expire after `idle` without a read or refresh.
    pub fn sliding_expiration(mut self, idle: Duration) -> Self {
        self.sliding_expiration = Some(idle);
        self
    }

    /// Resolve these options against `now`.
    ///
    /// Zero durations are rejected; they would produce entries that are
    /// expired on arrival.
    pub fn resolve(&self, now: Ticks) -> Result<Expiry, Error> {
        if self.absolute_expiration_relative_to_now.is_some_and(|d| d.is_zero()) {
            return Err(Error::InvalidInput("relative expiration must be positive".to_string()));
        }
        if self.sliding_expiration.is_some_and(|d| d.is_zero()) {
            return Err(Error::InvalidInput("sliding expiration must be positive".to_string()));
        }

        let base = match (self.absolute_expiration, self.absolute_expiration_relative_to_now) {
            (Some(at), _) => Some(Ticks::from_datetime(at)),
            (None, Some(ttl)) => Some(now.saturating_add(ttl.into())),
            (None, None) => None,
        };

        Ok(match (base, self.sliding_expiration) {
            (_, Some(idle)) => {
                let renewal = TickSpan::from(idle);
                let floor = base.map_or(now, |b| b.max(now));
                Expiry::Sliding { expiry: floor.saturating_add(renewal), renewal }
            }
            (Some(at), None) => Expiry::Absolute(at),
            (None, None) => Expiry::Never,
        })
    }
}

/// The stored expiry of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    Never,
    Absolute(Ticks),
    /// Next expiry watermark plus the interval each access extends it by.
    Sliding { expiry: Ticks, renewal: TickSpan },
}

impl Expiry {
    /// Column values `(expiry, renewal)` for binding.
    pub fn columns(self) -> (Option<i64>, Option<i64>) {
        match self {
            Expiry::Never => (None, None),
            Expiry::Absolute(at) => (Some(at.0), None),
            Expiry::Sliding { expiry, renewal } => (Some(expiry.0), Some(renewal.0)),
        }
    }

    /// Rebuild from stored columns. A renewal without an expiry violates the
    /// row invariant and yields `None`.
    pub fn from_columns(expiry: Option<i64>, renewal: Option<i64>) -> Option<Self> {
        match (expiry, renewal) {
            (None, None) => Some(Expiry::Never),
            (Some(at), None) => Some(Expiry::Absolute(Ticks(at))),
            (Some(at), Some(r)) => Some(Expiry::Sliding { expiry: Ticks(at), renewal: TickSpan(r) }),
            (None, Some(_)) => None,
        }
    }

    /// Mirrors the SQL predicate `expiry IS NULL OR expiry >= now`.
    pub fn is_live_at(self, now: Ticks) -> bool {
        match self {
            Expiry::Never => true,
            Expiry::Absolute(at) | Expiry::Sliding { expiry: at, .. } => at >= now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::TICKS_PER_SECOND;

    fn now() -> Ticks {
        Ticks::from_datetime(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())
    }

    #[test]
    fn test_no_options_never_expires() {
        let expiry = EntryOptions::new().resolve(now()).unwrap();
        assert_eq!(expiry, Expiry::Never);
        assert_eq!(expiry.columns(), (None, None));
    }

    #[test]
    fn test_absolute_wins_over_relative() {
        let at = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
        let expiry = EntryOptions::new()
            .absolute_expiration(at)
            .absolute_expiration_relative_to_now(Duration::from_secs(5))
            .resolve(now())
            .unwrap();
        assert_eq!(expiry, Expiry::Absolute(Ticks::from_datetime(at)));
    }

    #[test]
    fn test_relative_expiration() {
        let expiry = EntryOptions::new()
            .absolute_expiration_relative_to_now(Duration::from_secs(10))
            .resolve(now())
            .unwrap();
        assert_eq!(expiry, Expiry::Absolute(Ticks(now().0 + 10 * TICKS_PER_SECOND)));
    }

    #[test]
    fn test_sliding_alone_starts_from_now() {
        let expiry = EntryOptions::new().sliding_expiration(Duration::from_secs(60)).resolve(now()).unwrap();
        assert_eq!(
            expiry,
            Expiry::Sliding { expiry: Ticks(now().0 + 60 * TICKS_PER_SECOND), renewal: TickSpan(60 * TICKS_PER_SECOND) }
        );
    }

    #[test]
    fn test_sliding_with_past_absolute_looks_forward() {
        let past = Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap();
        let expiry = EntryOptions::new()
            .absolute_expiration(past)
            .sliding_expiration(Duration::from_secs(60))
            .resolve(now())
            .unwrap();
        assert!(expiry.is_live_at(now()));
        assert_eq!(expiry.columns().0, Some(now().0 + 60 * TICKS_PER_SECOND));
    }

    #[test]
    fn test_sliding_with_future_absolute_extends_past_it() {
        let future = Utc.with_ymd_and_hms(2025, 1, 1, 1, 0, 0).unwrap();
        let expiry = EntryOptions::new()
            .absolute_expiration(future)
            .sliding_expiration(Duration::from_secs(60))
            .resolve(now())
            .unwrap();
        assert_eq!(expiry.columns().0, Some(Ticks::from_datetime(future).0 + 60 * TICKS_PER_SECOND));
    }

    #[test]
    fn test_past_absolute_is_dead() {
        let past = Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 0).unwrap();
        let expiry = EntryOptions::new().absolute_expiration(past).resolve(now()).unwrap();
        assert!(!expiry.is_live_at(now()));
    }

    #[test]
    fn test_zero_durations_rejected() {
        let relative = EntryOptions::new().absolute_expiration_relative_to_now(Duration::ZERO).resolve(now());
        assert!(matches!(relative, Err(Error::InvalidInput(_))));
        let sliding = EntryOptions::new().sliding_expiration(Duration::ZERO).resolve(now());
        assert!(matches!(sliding, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_from_columns() {
        assert_eq!(Expiry::from_columns(None, None), Some(Expiry::Never));
        assert_eq!(Expiry::from_columns(Some(5), None), Some(Expiry::Absolute(Ticks(5))));
        assert_eq!(
            Expiry::from_columns(Some(5), Some(2)),
            Some(Expiry::Sliding { expiry: Ticks(5), renewal: TickSpan(2) })
        );
        assert_eq!(Expiry::from_columns(None, Some(2)), None);
    }
}
