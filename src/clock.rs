//! Time source for the payments core.
//!
//! Expiry checks, plan windows and recon day boundaries all need "now".
//! Services hold a `Clock` instead of calling `Utc::now()` directly so tests
//! can pin time, advance it past an expiry, and get deterministic reports.
//!
//! Invariant: a fixed clock never moves backwards.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Clone)]
pub enum Clock {
    /// Wall time. Production wiring.
    System,
    /// Pinned, manually advanced time. Test wiring.
    Fixed(Arc<RwLock<DateTime<Utc>>>),
}

impl Clock {
    pub fn system() -> Self {
        Clock::System
    }

    pub fn fixed(start: DateTime<Utc>) -> Self {
        Clock::Fixed(Arc::new(RwLock::new(start)))
    }

    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::System => Utc::now(),
            Clock::Fixed(t) => *t.read(),
        }
    }

    /// Moves a fixed clock forward. Panics if asked to move backwards or
    /// called on the system clock; both are test-harness bugs.
    pub fn advance(&self, by: Duration) {
        match self {
            Clock::System => panic!("cannot advance the system clock"),
            Clock::Fixed(t) => {
                let mut guard = t.write();
                let next = *guard + by;
                assert!(
                    next >= *guard,
                    "clock moved backwards: {} -> {}",
                    *guard,
                    next
                );
                *guard = next;
            }
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        match self {
            Clock::System => panic!("cannot set the system clock"),
            Clock::Fixed(t) => {
                let mut guard = t.write();
                assert!(
                    to >= *guard,
                    "clock moved backwards: {} -> {}",
                    *guard,
                    to
                );
                *guard = to;
            }
        }
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Clock::System => write!(f, "Clock::System"),
            Clock::Fixed(t) => write!(f, "Clock::Fixed({})", *t.read()),
        }
    }
}

/// Half-open UTC bounds [start, end) of a calendar day. Recon and balance
/// queries both window on this.
pub fn day_bounds(day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = Utc
        .from_utc_datetime(&day.and_hms_opt(0, 0, 0).unwrap_or_default());
    (start, start + Duration::days(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn fixed_clock_advances() {
        let clock = Clock::fixed(ts("2025-03-14T10:00:00Z"));
        assert_eq!(clock.now(), ts("2025-03-14T10:00:00Z"));
        clock.advance(Duration::hours(3));
        assert_eq!(clock.now(), ts("2025-03-14T13:00:00Z"));
    }

    #[test]
    #[should_panic(expected = "clock moved backwards")]
    fn fixed_clock_rejects_backwards_set() {
        let clock = Clock::fixed(ts("2025-03-14T10:00:00Z"));
        clock.set(ts("2025-03-14T09:00:00Z"));
    }

    #[test]
    fn day_bounds_are_half_open() {
        let day = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let (start, end) = day_bounds(day);
        assert_eq!(start, ts("2025-03-14T00:00:00Z"));
        assert_eq!(end, ts("2025-03-15T00:00:00Z"));
        assert!(ts("2025-03-14T23:59:59Z") < end);
    }
}
