//! Daily reset scheduler
//!
//! Detects when a configured local time-of-day boundary (04:00 by default)
//! has been crossed since the last reset and fires the registered handlers
//! in ascending priority order. Nothing runs in the background: the host
//! calls [`DailyResetScheduler::check_and_reset`] on launch and whenever it
//! wants the check made.
//!
//! Boundaries are compared, not elapsed time: a reset is due when the most
//! recent boundary before "now" is later than the most recent boundary
//! before the last reset.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::clock::{resolve_local, Clock};
use crate::config::StrideConfig;
use crate::error::StepError;
use crate::record::{DirtyTracked, PersistedRecord, RecordDecodeError, RecordFields};
use crate::store::KeyValueStore;

/// Error type handlers may return
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A zero-argument reset action
pub type ResetHandler = Box<dyn FnMut() -> Result<(), HandlerError>>;

/// Observes each completed reset
pub type ResetListener = Box<dyn FnMut(&ResetReport)>;

/// Persisted scheduler state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetState {
    pub last_reset_time: Option<DateTime<Utc>>,
}

impl PersistedRecord for ResetState {
    const STORE_KEY: &'static str = "stride.daily_reset";
    const SCHEMA_VERSION: u32 = 1;

    fn encode(&self) -> Value {
        json!({
            "schemaVersion": Self::SCHEMA_VERSION,
            "lastResetTime": self.last_reset_time.map(|t| t.to_rfc3339()),
        })
    }

    fn decode(fields: &RecordFields<'_>) -> Result<Self, RecordDecodeError> {
        Ok(Self {
            last_reset_time: fields.optional_timestamp("lastResetTime")?,
        })
    }
}

/// A handler that returned an error or panicked
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandlerFailure {
    pub priority: i32,
    pub reason: String,
}

/// Outcome of one reset run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetReport {
    pub reset_at: DateTime<Utc>,
    /// Boundary the reset belongs to
    pub boundary: DateTime<Utc>,
    pub handlers_run: usize,
    pub failures: Vec<HandlerFailure>,
}

impl ResetReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

fn insert_handler(
    handlers: &mut BTreeMap<i32, ResetHandler>,
    priority: i32,
    handler: ResetHandler,
) -> Result<(), StepError> {
    if handlers.contains_key(&priority) {
        tracing::warn!(priority, "Duplicate reset handler priority rejected");
        return Err(StepError::DuplicatePriority(priority));
    }
    handlers.insert(priority, handler);
    Ok(())
}

/// Handlers registered before the scheduler exists
#[derive(Default)]
pub struct PendingResetHandlers {
    handlers: BTreeMap<i32, ResetHandler>,
}

impl PendingResetHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a handler; a duplicate priority is rejected and the first kept
    pub fn register(
        &mut self,
        priority: i32,
        handler: impl FnMut() -> Result<(), HandlerError> + 'static,
    ) -> Result<(), StepError> {
        insert_handler(&mut self.handlers, priority, Box::new(handler))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Boundary-crossing detector with priority-ordered handlers
pub struct DailyResetScheduler<Tz: TimeZone = Local> {
    reset_time: NaiveTime,
    tz: Tz,
    clock: Arc<dyn Clock>,
    state: DirtyTracked<ResetState>,
    handlers: BTreeMap<i32, ResetHandler>,
    listeners: Vec<ResetListener>,
}

impl DailyResetScheduler<Local> {
    /// Scheduler on the device's local time zone
    pub fn new(
        config: &StrideConfig,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StepError> {
        Self::with_timezone(config, Local, store, clock)
    }
}

impl<Tz: TimeZone> DailyResetScheduler<Tz> {
    pub fn with_timezone(
        config: &StrideConfig,
        tz: Tz,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StepError> {
        config.validate()?;
        let reset_time = config.reset_time().ok_or_else(|| {
            StepError::InvalidConfig("reset time is not a valid time of day".to_string())
        })?;

        Ok(Self {
            reset_time,
            tz,
            clock,
            state: DirtyTracked::new(store),
            handlers: BTreeMap::new(),
            listeners: Vec::new(),
        })
    }

    /// Take over handlers queued before this scheduler existed. Priorities
    /// that are already registered here are rejected and logged.
    pub fn adopt(&mut self, pending: PendingResetHandlers) -> usize {
        let mut adopted = 0;
        for (priority, handler) in pending.handlers {
            if insert_handler(&mut self.handlers, priority, handler).is_ok() {
                adopted += 1;
            }
        }
        adopted
    }

    /// Register a handler. Lower priorities run first; a duplicate priority
    /// is rejected without replacing the existing handler.
    pub fn register(
        &mut self,
        priority: i32,
        handler: impl FnMut() -> Result<(), HandlerError> + 'static,
    ) -> Result<(), StepError> {
        insert_handler(&mut self.handlers, priority, Box::new(handler))
    }

    pub fn unregister(&mut self, priority: i32) -> bool {
        self.handlers.remove(&priority).is_some()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn on_reset_complete(&mut self, listener: impl FnMut(&ResetReport) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub fn last_reset_time(&mut self) -> Option<DateTime<Utc>> {
        self.state.value().last_reset_time
    }

    fn boundary_on(&self, date: NaiveDate) -> DateTime<Utc> {
        resolve_local(&self.tz, date.and_time(self.reset_time)).with_timezone(&Utc)
    }

    /// Most recent boundary at or before `t`
    pub fn reset_boundary_for(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        let today = t.with_timezone(&self.tz).date_naive();
        let candidate = self.boundary_on(today);
        if candidate <= t {
            return candidate;
        }
        match today.pred_opt() {
            Some(yesterday) => self.boundary_on(yesterday),
            None => candidate,
        }
    }

    /// First boundary strictly after `t`
    pub fn next_reset_after(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        let today = t.with_timezone(&self.tz).date_naive();
        let candidate = self.boundary_on(today);
        if candidate > t {
            return candidate;
        }
        match today.succ_opt() {
            Some(tomorrow) => self.boundary_on(tomorrow),
            None => candidate,
        }
    }

    pub fn is_reset_due_at(&mut self, now: DateTime<Utc>) -> bool {
        match self.last_reset_time() {
            None => true,
            Some(last) => self.reset_boundary_for(now) > self.reset_boundary_for(last),
        }
    }

    pub fn is_reset_due(&mut self) -> bool {
        let now = self.clock.now();
        self.is_reset_due_at(now)
    }

    /// Run every handler, notify listeners, then persist the reset time.
    ///
    /// Handler errors and panics are recorded in the report; they never stop
    /// later handlers or the completion notification.
    pub fn perform_reset(&mut self) -> ResetReport {
        let now = self.clock.now();
        let boundary = self.reset_boundary_for(now);
        tracing::info!(%boundary, handlers = self.handlers.len(), "Performing daily reset");

        let mut failures = Vec::new();
        for (priority, handler) in self.handlers.iter_mut() {
            let reason = match panic::catch_unwind(AssertUnwindSafe(|| handler())) {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err.to_string(),
                Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
            };
            tracing::error!(priority = *priority, %reason, "Reset handler failed");
            failures.push(HandlerFailure {
                priority: *priority,
                reason,
            });
        }

        let report = ResetReport {
            reset_at: now,
            boundary,
            handlers_run: self.handlers.len(),
            failures,
        };

        for listener in &mut self.listeners {
            if panic::catch_unwind(AssertUnwindSafe(|| listener(&report))).is_err() {
                tracing::error!("Reset completion listener panicked");
            }
        }

        self.state.update(|state| state.last_reset_time = Some(now));
        self.state.save();
        report
    }

    /// Reset if a boundary was crossed since the last reset
    pub fn check_and_reset(&mut self) -> Option<ResetReport> {
        if !self.is_reset_due() {
            tracing::debug!("Daily reset not due");
            return None;
        }
        Some(self.perform_reset())
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
