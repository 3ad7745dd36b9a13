//! Wall-clock access
//!
//! Everything that compares against "now" goes through a [`Clock`] so the
//! authorization deadline, the UTC day boundary and the reset schedule can be
//! driven deterministically.

use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, TimeZone, Utc};
use std::sync::{Arc, Mutex};

/// Source of the current instant
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to; clones share the same instant
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = instant;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Resolve a wall-clock time in `tz` to an instant.
///
/// Ambiguous times (clocks falling back) take the earliest instant. Times
/// inside a DST gap move forward to the first valid instant after it.
pub fn resolve_local<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(instant) => instant,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => {
            let mut probe = naive;
            for _ in 0..MAX_GAP_MINUTES {
                probe += Duration::minutes(1);
                if let Some(instant) = tz.from_local_datetime(&probe).earliest() {
                    return instant;
                }
            }
            tracing::warn!(%naive, "No valid local time near requested time, using UTC reading");
            tz.from_utc_datetime(&naive)
        }
    }
}

const MAX_GAP_MINUTES: u32 = 24 * 60;
