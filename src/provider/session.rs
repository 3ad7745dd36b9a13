//! Pedometer session tracking
//!
//! The device step counter only ever grows until the device reboots, when it
//! starts again from zero. A session turns successive readings into positive
//! deltas and treats any decrease as a counter reset: it re-baselines without
//! reporting anything, so steps taken across a reboot are not estimated.

use serde::Serialize;

use crate::types::StepDelta;

/// Counters owned by a session; reset whenever tracking (re)starts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionCounters {
    pub baseline_reading: u64,
    pub last_reading: u64,
    pub session_accumulated: u64,
    pub is_tracking: bool,
}

/// What a single reading did to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Not tracking; the reading was ignored
    Idle,
    /// First reading after a start without a usable counter value
    Baselined,
    Unchanged,
    Advanced(StepDelta),
    /// The counter went backwards (reboot); re-baselined silently
    CounterReset,
}

/// `Idle -> Tracking -> Idle` state machine over device counter readings
#[derive(Debug, Clone, Default)]
pub struct PedometerSession {
    counters: SessionCounters,
    awaiting_baseline: bool,
    resets_detected: u32,
}

impl PedometerSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counters(&self) -> SessionCounters {
        self.counters
    }

    pub fn is_tracking(&self) -> bool {
        self.counters.is_tracking
    }

    /// Number of counter resets seen since the session started
    pub fn resets_detected(&self) -> u32 {
        self.resets_detected
    }

    /// Start tracking from `reading`. Without a reading, the first successful
    /// observation becomes the baseline.
    pub fn start(&mut self, reading: Option<u64>) {
        let baseline = reading.unwrap_or(0);
        self.counters = SessionCounters {
            baseline_reading: baseline,
            last_reading: baseline,
            session_accumulated: 0,
            is_tracking: true,
        };
        self.awaiting_baseline = reading.is_none();
        self.resets_detected = 0;
    }

    /// Stop tracking; `session_accumulated` stays readable
    pub fn stop(&mut self) {
        self.counters.is_tracking = false;
        self.awaiting_baseline = false;
    }

    /// Feed one counter reading
    pub fn observe(&mut self, current: u64) -> Observation {
        if !self.counters.is_tracking {
            return Observation::Idle;
        }

        if self.awaiting_baseline {
            self.counters.baseline_reading = current;
            self.counters.last_reading = current;
            self.awaiting_baseline = false;
            return Observation::Baselined;
        }

        let last = self.counters.last_reading;
        if current == last {
            return Observation::Unchanged;
        }

        if current < last {
            self.counters.baseline_reading = current;
            self.counters.last_reading = current;
            self.resets_detected += 1;
            return Observation::CounterReset;
        }

        // current > last, so the difference is never zero
        let difference = i64::try_from(current - last).unwrap_or(i64::MAX);
        match StepDelta::from_difference(difference) {
            Some(delta) => {
                self.counters.session_accumulated = self
                    .counters
                    .session_accumulated
                    .saturating_add(u64::from(delta.get()));
                // A jump wider than one delta is carried into the next observation
                self.counters.last_reading = last.saturating_add(u64::from(delta.get()));
                Observation::Advanced(delta)
            }
            None => Observation::Unchanged,
        }
    }

    /// Resynchronize after a suspension without reporting the gap
    pub fn resync(&mut self, current: u64) {
        if !self.counters.is_tracking {
            return;
        }
        if self.awaiting_baseline {
            self.counters.baseline_reading = current;
            self.awaiting_baseline = false;
        }
        self.counters.last_reading = current;
    }
}
