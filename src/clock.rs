use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use chrono::{DateTime, TimeZone, Utc};

/// Source of "now" for the engine. Swapped for a manual clock in tests.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for deterministic runs.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().expect("clock lock") = now;
    }

    pub fn advance_seconds(&self, seconds: f64) {
        let mut now = self.now.lock().expect("clock lock");
        *now = *now + chrono::Duration::milliseconds((seconds * 1_000.0) as i64);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock")
    }
}

/// Fractional seconds from `from` to `to`; negative when `to` is earlier.
pub fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1_000.0
}

/// First instant after December 31 of `year`, i.e. the moment a
/// year-end population figure stops being current.
pub fn year_boundary(year: i32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year + 1, 1, 1, 0, 0, 0)
        .single()
        .expect("valid calendar date")
}

/// Per-reset cache of year boundaries; most records share a handful of
/// measurement years.
#[derive(Debug, Default)]
pub struct YearBoundaryCache {
    by_year: HashMap<i32, DateTime<Utc>>,
}

impl YearBoundaryCache {
    pub fn get(&mut self, year: i32) -> DateTime<Utc> {
        *self.by_year.entry(year).or_insert_with(|| year_boundary(year))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::starting_at(year_boundary(2010));
        let start = clock.now();
        clock.advance_seconds(1.5);
        assert_eq!(seconds_between(start, clock.now()), 1.5);
    }

    #[test]
    fn year_boundary_is_midnight_january_first() {
        let boundary = year_boundary(2010);
        assert_eq!(boundary.to_rfc3339(), "2011-01-01T00:00:00+00:00");
    }

    #[test]
    fn boundary_cache_returns_same_instant() {
        let mut cache = YearBoundaryCache::default();
        let first = cache.get(1999);
        assert_eq!(first, cache.get(1999));
        assert_eq!(first, year_boundary(1999));
    }

    #[test]
    fn seconds_between_is_signed() {
        let a = year_boundary(2010);
        let b = year_boundary(2011);
        assert!(seconds_between(a, b) > 0.0);
        assert_eq!(seconds_between(b, a), -seconds_between(a, b));
    }
}
