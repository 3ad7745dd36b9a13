//! Step reconciliation
//!
//! Folds positive step counts into a [`StepRecord`]. The per-day counter is
//! reset by comparing `last_step_date` with today's UTC calendar date, never
//! by elapsed time, so a gap of any length produces exactly one reset.
//! Reconciliation cannot fail; arithmetic saturates.

use chrono::NaiveDate;
use serde::Serialize;

use crate::types::{StepDelta, StepRecord, StepSource};

/// What one reconciliation did to the record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    /// The per-day counter was reset before applying
    pub day_rolled: bool,
    /// Steps added to both counters, including folded pending steps
    pub applied: u64,
    pub steps_today: u32,
    pub total_steps_all_time: u64,
}

/// Reset `steps_today` if `today` is past the last recorded step date.
/// Returns whether a reset happened.
pub fn roll_day(record: &mut StepRecord, today: NaiveDate) -> bool {
    let stale = match record.last_step_date {
        Some(last) => last < today,
        None => true,
    };
    if stale {
        record.steps_today = 0;
        record.last_step_date = Some(today);
    }
    stale
}

/// Reconcile a delta from the active provider
pub fn apply_delta(
    record: &mut StepRecord,
    delta: StepDelta,
    source: StepSource,
    today: NaiveDate,
) -> Reconciliation {
    apply_steps(record, delta.get(), source, today)
}

/// Reconcile `steps` (plus any parked pedometer steps) into the record.
///
/// Both counters move by the same amount in one step.
pub fn apply_steps(
    record: &mut StepRecord,
    steps: u32,
    source: StepSource,
    today: NaiveDate,
) -> Reconciliation {
    let day_rolled = roll_day(record, today);

    let pending = std::mem::take(&mut record.pending_pedometer_steps);
    let added = steps.saturating_add(pending);

    record.total_steps_all_time = record.total_steps_all_time.saturating_add(u64::from(added));
    record.steps_today = record.steps_today.saturating_add(added);
    record.last_active_source = source;

    Reconciliation {
        day_rolled,
        applied: u64::from(added),
        steps_today: record.steps_today,
        total_steps_all_time: record.total_steps_all_time,
    }
}

/// Hold a delta that arrived while the controller was not ready
pub fn park_pending(record: &mut StepRecord, delta: StepDelta) {
    record.pending_pedometer_steps = record.pending_pedometer_steps.saturating_add(delta.get());
}
