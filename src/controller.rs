//! Step acquisition controller
//!
//! The controller owns provider selection, the bounded authorization
//! handshake and the durable [`StepRecord`]. It is driven cooperatively:
//! the host calls [`StepController::tick`] periodically, and every tick polls
//! the active provider, drains provider events, checks the handshake deadline
//! and saves the record when dirty.
//!
//! ```text
//! Uninitialized --initialize--> Initializing --reply / deadline--> Ready
//!       ^                                                            |
//!       +------------------------- reinitialize ---------------------+
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::bridge::StepQueryResult;
use crate::clock::Clock;
use crate::config::StrideConfig;
use crate::error::StepError;
use crate::events::{AuthorizationReply, EventSink, ProviderEvent, QueryReply};
use crate::provider::{NoneProvider, StepProvider};
use crate::reconcile::{apply_steps, park_pending, Reconciliation};
use crate::record::DirtyTracked;
use crate::store::KeyValueStore;
use crate::types::{ProviderKind, StepDelta, StepRecord, StepSnapshot, StepSource};

/// Builds a fresh provider instance for one initialization attempt
pub type ProviderFactory = Box<dyn FnMut() -> Box<dyn StepProvider>>;

/// Receives the initialization outcome: `true` when an authorized provider is active
pub type InitCallback = Box<dyn FnOnce(bool)>;

/// Observes every reconciliation
pub type StepListener = Box<dyn FnMut(&Reconciliation)>;

/// Lifecycle of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    Uninitialized,
    Initializing,
    Ready,
}

struct PendingSync {
    request_id: Uuid,
    started_at: DateTime<Utc>,
}

struct Handshake {
    request_id: Uuid,
    started_at: DateTime<Utc>,
    callbacks: Vec<InitCallback>,
}

/// Selects a provider, reconciles its deltas and keeps the step record durable
pub struct StepController {
    config: StrideConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn KeyValueStore>,
    record: DirtyTracked<StepRecord>,
    candidates: Vec<(ProviderKind, ProviderFactory)>,
    state: ControllerState,
    active: Box<dyn StepProvider>,
    authorized: bool,
    handshake: Option<Handshake>,
    pending_sync: Option<PendingSync>,
    last_sync_error: Option<StepError>,
    sink: EventSink,
    events: Receiver<ProviderEvent>,
    listeners: Vec<StepListener>,
}

impl StepController {
    pub fn new(config: StrideConfig, store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        let (sink, events) = EventSink::channel();
        Self {
            config,
            clock,
            record: DirtyTracked::new(Arc::clone(&store)),
            store,
            candidates: Vec::new(),
            state: ControllerState::Uninitialized,
            active: Box::new(NoneProvider),
            authorized: false,
            handshake: None,
            pending_sync: None,
            last_sync_error: None,
            sink,
            events,
            listeners: Vec::new(),
        }
    }

    /// Make a provider kind selectable. Candidates are tried in the
    /// configured `provider_order`; a later registration for the same kind
    /// replaces the earlier one.
    pub fn register_provider(&mut self, kind: ProviderKind, factory: ProviderFactory) {
        self.candidates.retain(|(existing, _)| *existing != kind);
        self.candidates.push((kind, factory));
    }

    /// Observe every reconciliation. A panicking listener is logged and
    /// does not affect the others.
    pub fn on_steps_reconciled(&mut self, listener: impl FnMut(&Reconciliation) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn active_provider(&self) -> ProviderKind {
        self.active.kind()
    }

    /// Ready with an authorized provider
    pub fn is_tracking_available(&self) -> bool {
        self.state == ControllerState::Ready
            && self.authorized
            && self.active.kind() != ProviderKind::None
    }

    pub fn is_tracking(&self) -> bool {
        self.active.is_tracking()
    }

    /// Failure of the most recent history sync, cleared by the next success
    pub fn last_sync_error(&self) -> Option<&StepError> {
        self.last_sync_error.as_ref()
    }

    /// Current record, loading it on first access
    pub fn record(&mut self) -> &StepRecord {
        self.record.value()
    }

    /// Select a provider and request authorization.
    ///
    /// # Arguments
    /// * `callback` - Invoked once with `true` when an authorized provider is
    ///   active. Invoked immediately when already `Ready`.
    ///
    /// Completion may happen on this call (nothing available, access already
    /// granted) or on a later [`Self::tick`] (prompt answered, deadline hit).
    ///
    /// # Example
    /// ```ignore
    /// controller.initialize(|ready| {
    ///     if ready {
    ///         tracing::info!("Step tracking available");
    ///     }
    /// });
    /// ```
    pub fn initialize(&mut self, callback: impl FnOnce(bool) + 'static) {
        match self.state {
            ControllerState::Ready => invoke_init_callback(Box::new(callback), true),
            ControllerState::Initializing => match self.handshake.as_mut() {
                Some(handshake) => handshake.callbacks.push(Box::new(callback)),
                None => invoke_init_callback(Box::new(callback), false),
            },
            ControllerState::Uninitialized => self.begin_handshake(Box::new(callback)),
        }
    }

    /// Drop the current selection and run the handshake again
    pub fn reinitialize(&mut self, callback: impl FnOnce(bool) + 'static) {
        tracing::info!(provider = ?self.active.kind(), "Reinitializing step acquisition");
        self.release_provider();

        if let Some(disowned) = self.handshake.take() {
            for callback in disowned.callbacks {
                invoke_init_callback(callback, false);
            }
        }

        self.state = ControllerState::Uninitialized;
        self.initialize(callback);
    }

    fn release_provider(&mut self) {
        if self.active.is_tracking() {
            self.active.stop_realtime_tracking();
        }
        self.active.unsubscribe();
        self.active = Box::new(NoneProvider);
        self.authorized = false;
        self.pending_sync = None;
    }

    fn begin_handshake(&mut self, callback: InitCallback) {
        self.state = ControllerState::Initializing;
        self.record.value();

        self.active = self.select_provider();
        let kind = self.active.kind();
        if kind == ProviderKind::None {
            tracing::info!("No step provider available, manual entry only");
            self.state = ControllerState::Ready;
            invoke_init_callback(callback, false);
            return;
        }

        let request_id = Uuid::new_v4();
        self.handshake = Some(Handshake {
            request_id,
            started_at: self.clock.now(),
            callbacks: vec![callback],
        });
        tracing::debug!(provider = ?kind, %request_id, "Requesting step access");
        self.active
            .request_authorization(AuthorizationReply::new(request_id, kind, self.sink.clone()));

        // Providers that are already authorized answer synchronously
        self.process_events();
    }

    fn select_provider(&mut self) -> Box<dyn StepProvider> {
        for kind in &self.config.provider_order {
            let Some((_, factory)) = self.candidates.iter_mut().find(|(k, _)| k == kind) else {
                continue;
            };
            let provider = factory();
            let availability = provider.availability();
            if availability.is_available() {
                tracing::info!(provider = ?kind, "Selected step provider");
                return provider;
            }
            tracing::debug!(provider = ?kind, ?availability, "Step provider not available");
        }
        Box::new(NoneProvider)
    }

    fn resolve_handshake(&mut self, request_id: Uuid, granted: bool) {
        let current = self.handshake.as_ref().map(|h| h.request_id);
        if current != Some(request_id) {
            tracing::debug!(%request_id, "Ignoring stale authorization reply");
            return;
        }

        if granted {
            self.authorized = true;
            self.active.subscribe(self.sink.clone());
        } else {
            tracing::info!(provider = ?self.active.kind(), "Step access denied");
            self.release_provider();
        }
        let success = self.authorized && self.active.kind() != ProviderKind::None;
        self.complete_handshake(success);
    }

    fn check_handshake_deadline(&mut self, now: DateTime<Utc>) {
        let Some(handshake) = &self.handshake else {
            return;
        };
        let timeout = self.config.authorization_timeout();
        if now - handshake.started_at < timeout {
            return;
        }

        let err = StepError::Timeout {
            operation: "step authorization".to_string(),
            seconds: self.config.authorization_timeout_secs,
        };
        tracing::warn!(provider = ?self.active.kind(), error = %err, "Authorization handshake abandoned");
        self.complete_handshake(false);
    }

    fn check_sync_deadline(&mut self, now: DateTime<Utc>) {
        let Some(pending) = &self.pending_sync else {
            return;
        };
        if now - pending.started_at < self.config.query_timeout() {
            return;
        }

        let request_id = pending.request_id;
        self.pending_sync = None;
        self.active.abandon_query(request_id);
        let err = StepError::Timeout {
            operation: "step query".to_string(),
            seconds: self.config.query_timeout_secs,
        };
        tracing::warn!(%request_id, error = %err, "History sync abandoned");
        self.last_sync_error = Some(err);
    }

    fn complete_handshake(&mut self, success: bool) {
        self.state = ControllerState::Ready;
        if let Some(handshake) = self.handshake.take() {
            tracing::info!(success, provider = ?self.active.kind(), "Step acquisition initialized");
            for callback in handshake.callbacks {
                invoke_init_callback(callback, success);
            }
        }
    }

    /// Advance the controller by one cooperative step
    pub fn tick(&mut self) {
        let now = self.clock.now();
        self.active.poll(now);
        self.process_events();
        self.check_handshake_deadline(now);
        self.check_sync_deadline(now);
        if self.config.autosave {
            self.record.save();
        }
    }

    fn process_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                ProviderEvent::StepsUpdated { provider, delta } => {
                    self.handle_delta(provider, delta);
                }
                ProviderEvent::AuthorizationResolved {
                    request_id,
                    granted,
                    ..
                } => self.resolve_handshake(request_id, granted),
                ProviderEvent::QueryCompleted {
                    request_id,
                    provider,
                    result,
                } => self.handle_query(request_id, provider, result),
            }
        }
    }

    fn handle_delta(&mut self, provider: ProviderKind, delta: StepDelta) {
        if self.state == ControllerState::Ready
            && self.authorized
            && provider == self.active.kind()
        {
            self.reconcile(delta.get(), provider.step_source());
        } else {
            tracing::debug!(steps = delta.get(), "Controller not ready, parking steps");
            self.record.update(|record| park_pending(record, delta));
        }
    }

    fn handle_query(&mut self, request_id: Uuid, provider: ProviderKind, result: StepQueryResult) {
        if self.pending_sync.as_ref().map(|p| p.request_id) != Some(request_id) {
            tracing::debug!(%request_id, "Ignoring stale query result");
            return;
        }
        self.pending_sync = None;

        match result.into_result() {
            Ok(result) => {
                let steps = u32::try_from(result.step_count()).unwrap_or(u32::MAX);
                tracing::info!(steps, source = ?result.source, "History sync completed");
                if steps > 0 {
                    self.reconcile(steps, provider.step_source());
                }
                let synced_until = result.end_time_utc().unwrap_or_else(|| self.clock.now());
                self.record
                    .update(|record| record.last_health_sync_time = Some(synced_until));
                self.last_sync_error = None;
            }
            Err(err) => {
                tracing::warn!(error = %err, "History sync failed");
                self.last_sync_error = Some(err);
            }
        }
    }

    fn reconcile(&mut self, steps: u32, source: StepSource) -> Reconciliation {
        let today = self.clock.now().date_naive();
        let outcome = self
            .record
            .update(|record| apply_steps(record, steps, source, today));

        if outcome.day_rolled {
            tracing::info!(%today, "New day, steps today reset");
        }
        tracing::debug!(
            applied = outcome.applied,
            steps_today = outcome.steps_today,
            total = outcome.total_steps_all_time,
            "Steps reconciled"
        );

        for listener in &mut self.listeners {
            let result = panic::catch_unwind(AssertUnwindSafe(|| listener(&outcome)));
            if result.is_err() {
                tracing::error!("Step listener panicked");
            }
        }
        outcome
    }

    fn tracking_allowed(&self, operation: &str) -> bool {
        if self.state != ControllerState::Ready {
            tracing::warn!(operation, state = ?self.state, "Step controller not ready");
            return false;
        }
        if !self.is_tracking_available() {
            tracing::warn!(operation, "No authorized step provider");
            return false;
        }
        if !self.active.supports_realtime() {
            tracing::warn!(operation, provider = ?self.active.kind(), "Provider has no real-time tracking");
            return false;
        }
        true
    }

    pub fn start_tracking(&mut self) {
        if self.tracking_allowed("start_tracking") {
            self.active.start_realtime_tracking();
        }
    }

    pub fn stop_tracking(&mut self) {
        if self.tracking_allowed("stop_tracking") {
            self.active.stop_realtime_tracking();
        }
    }

    pub fn suspend(&mut self) {
        self.active.suspend();
    }

    pub fn resume(&mut self) {
        self.active.resume();
    }

    /// Query the active provider for steps since the last sync.
    ///
    /// The window starts at `lastHealthSyncTime`, or at today's UTC midnight
    /// when history was never synced. The result is reconciled on a later
    /// tick (or immediately when the provider fails synchronously).
    ///
    /// # Returns
    /// The id of the query in flight. A sync already in flight is reused
    /// until it is answered or `query_timeout_secs` passes.
    pub fn sync_history(&mut self) -> Result<Uuid, StepError> {
        if let Some(pending) = &self.pending_sync {
            return Ok(pending.request_id);
        }
        if self.state != ControllerState::Ready || self.active.kind() == ProviderKind::None {
            return Err(StepError::Unavailable(
                "no step provider is active".to_string(),
            ));
        }
        if !self.active.supports_history() {
            return Err(StepError::Unavailable(format!(
                "{} provider does not support historical queries",
                self.active.kind().as_str()
            )));
        }
        if !self.authorized {
            return Err(StepError::Unauthorized(format!(
                "{} provider is not authorized",
                self.active.kind().as_str()
            )));
        }

        let now = self.clock.now();
        let since = self
            .record
            .value()
            .last_health_sync_time
            .unwrap_or_else(|| Utc.from_utc_datetime(&now.date_naive().and_time(NaiveTime::MIN)));

        let request_id = Uuid::new_v4();
        self.pending_sync = Some(PendingSync {
            request_id,
            started_at: now,
        });
        tracing::debug!(%since, %request_id, "Starting history sync");
        self.active.get_steps_since(
            since,
            QueryReply::new(request_id, self.active.kind(), self.sink.clone()),
        );
        self.process_events();
        Ok(request_id)
    }

    /// Inject steps by hand; allowed in every state. Zero is a no-op.
    pub fn add_manual_steps(&mut self, steps: u32) -> Option<Reconciliation> {
        let delta = StepDelta::new(steps)?;
        let source = self.active.kind().step_source();
        Some(self.reconcile(delta.get(), source))
    }

    pub fn snapshot(&mut self) -> StepSnapshot {
        let authorized = self.is_tracking_available();
        let tracking = self.active.is_tracking();
        let active_provider = self.active.kind();
        let record = self.record.value();
        StepSnapshot {
            total_steps_all_time: record.total_steps_all_time,
            steps_today: record.steps_today,
            pending_pedometer_steps: record.pending_pedometer_steps,
            last_step_date: record.last_step_date,
            last_active_source: record.last_active_source,
            active_provider,
            authorized,
            tracking,
        }
    }

    /// Delete the step record and start again from zero
    pub fn clear_all(&mut self) {
        tracing::info!("Clearing step record");
        self.record.clear();
        self.last_sync_error = None;
    }

    /// Write the record if dirty and flush the store
    pub fn flush(&mut self) -> Result<(), StepError> {
        self.record.try_save()?;
        self.store.flush()?;
        Ok(())
    }
}

fn invoke_init_callback(callback: InitCallback, success: bool) {
    if panic::catch_unwind(AssertUnwindSafe(|| callback(success))).is_err() {
        tracing::error!("Initialization callback panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::provider::{HistoricalProvider, PedometerProvider};
    use crate::record::PersistedRecord;
    use crate::store::MemoryStore;
    use crate::testing::{FakeHealthData, FakePedometer};
    use chrono::{Duration, NaiveDate, TimeZone};
    use pretty_assertions::assert_eq;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    struct Harness {
        controller: StepController,
        clock: ManualClock,
        store: Arc<MemoryStore>,
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 8, 0, 0).unwrap()
    }

    fn harness() -> Harness {
        let clock = ManualClock::new(start());
        let store = Arc::new(MemoryStore::new());
        let controller = StepController::new(
            StrideConfig::default(),
            store.clone(),
            Arc::new(clock.clone()),
        );
        Harness {
            controller,
            clock,
            store,
        }
    }

    fn with_pedometer(h: &mut Harness, fake: &FakePedometer) {
        let fake = fake.clone();
        h.controller.register_provider(
            ProviderKind::Pedometer,
            Box::new(move || Box::new(PedometerProvider::new(fake.bridge())) as Box<dyn StepProvider>),
        );
    }

    fn with_health_data(h: &mut Harness, fake: &FakeHealthData) {
        let fake = fake.clone();
        let clock: Arc<dyn Clock> = Arc::new(h.clock.clone());
        h.controller.register_provider(
            ProviderKind::Historical,
            Box::new(move || {
                Box::new(HistoricalProvider::new(fake.bridge(), Arc::clone(&clock)))
                    as Box<dyn StepProvider>
            }),
        );
    }

    fn outcome_cell() -> (Rc<Cell<Option<bool>>>, impl FnOnce(bool) + 'static) {
        let cell = Rc::new(Cell::new(None));
        let writer = Rc::clone(&cell);
        (cell, move |success| writer.set(Some(success)))
    }

    #[test]
    fn test_nothing_available_completes_false() {
        let mut h = harness();
        with_pedometer(&mut h, &FakePedometer::unavailable());
        let (outcome, callback) = outcome_cell();

        h.controller.initialize(callback);

        assert_eq!(outcome.get(), Some(false));
        assert_eq!(h.controller.state(), ControllerState::Ready);
        assert_eq!(h.controller.active_provider(), ProviderKind::None);
    }

    #[test]
    fn test_already_authorized_completes_synchronously() {
        let mut h = harness();
        let fake = FakePedometer::authorized();
        with_pedometer(&mut h, &fake);
        let (outcome, callback) = outcome_cell();

        h.controller.initialize(callback);

        assert_eq!(outcome.get(), Some(true));
        assert!(!fake.prompt_shown());
        assert!(h.controller.is_tracking_available());
    }

    #[test]
    fn test_grant_after_prompt() {
        let mut h = harness();
        let fake = FakePedometer::available();
        with_pedometer(&mut h, &fake);
        let (outcome, callback) = outcome_cell();

        h.controller.initialize(callback);
        assert_eq!(h.controller.state(), ControllerState::Initializing);
        h.controller.tick();
        assert_eq!(outcome.get(), None);

        fake.close_prompt(true);
        h.clock.advance(Duration::seconds(3));
        h.controller.tick();

        assert_eq!(outcome.get(), Some(true));
        assert_eq!(h.controller.active_provider(), ProviderKind::Pedometer);
    }

    #[test]
    fn test_denial_clears_provider() {
        let mut h = harness();
        let fake = FakePedometer::available();
        with_pedometer(&mut h, &fake);
        let (outcome, callback) = outcome_cell();

        h.controller.initialize(callback);
        fake.close_prompt(false);
        h.controller.tick();

        assert_eq!(outcome.get(), Some(false));
        assert_eq!(h.controller.state(), ControllerState::Ready);
        assert_eq!(h.controller.active_provider(), ProviderKind::None);
    }

    #[test]
    fn test_authorization_timeout_completes_false() {
        let mut h = harness();
        let fake = FakePedometer::available();
        with_pedometer(&mut h, &fake);
        let (outcome, callback) = outcome_cell();

        h.controller.initialize(callback);
        h.clock.advance(Duration::seconds(9));
        h.controller.tick();
        assert_eq!(outcome.get(), None);
        assert_eq!(h.controller.state(), ControllerState::Initializing);

        h.clock.advance(Duration::seconds(1));
        h.controller.tick();

        assert_eq!(outcome.get(), Some(false));
        assert_eq!(h.controller.state(), ControllerState::Ready);
        // Selection survives, authorization does not
        assert_eq!(h.controller.active_provider(), ProviderKind::Pedometer);
        assert!(!h.controller.is_tracking_available());

        // A reply that arrives after the deadline is ignored
        fake.close_prompt(true);
        h.controller.tick();
        assert!(!h.controller.is_tracking_available());
    }

    #[test]
    fn test_initialize_when_ready_reports_true() {
        let mut h = harness();
        with_pedometer(&mut h, &FakePedometer::unavailable());
        h.controller.initialize(|_| {});

        let (outcome, callback) = outcome_cell();
        h.controller.initialize(callback);
        assert_eq!(outcome.get(), Some(true));
    }

    #[test]
    fn test_second_initialize_joins_running_handshake() {
        let mut h = harness();
        let fake = FakePedometer::available();
        with_pedometer(&mut h, &fake);
        let (first, first_cb) = outcome_cell();
        let (second, second_cb) = outcome_cell();

        h.controller.initialize(first_cb);
        h.controller.initialize(second_cb);
        fake.close_prompt(true);
        h.controller.tick();

        assert_eq!(first.get(), Some(true));
        assert_eq!(second.get(), Some(true));
    }

    #[test]
    fn test_pedometer_deltas_are_reconciled() {
        let mut h = harness();
        let fake = FakePedometer::authorized();
        fake.set_counter(500);
        with_pedometer(&mut h, &fake);
        h.controller.initialize(|_| {});
        h.controller.start_tracking();
        assert!(h.controller.is_tracking());

        fake.set_counter(540);
        h.controller.tick();
        fake.set_counter(600);
        h.controller.tick();

        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.steps_today, 100);
        assert_eq!(snapshot.total_steps_all_time, 100);
        assert_eq!(snapshot.last_active_source, StepSource::FallbackPedometer);
        assert_eq!(snapshot.last_step_date, NaiveDate::from_ymd_opt(2024, 1, 15));
        assert!(snapshot.tracking);
    }

    #[test]
    fn test_tick_autosaves_dirty_record() {
        let mut h = harness();
        let fake = FakePedometer::authorized();
        with_pedometer(&mut h, &fake);
        h.controller.initialize(|_| {});
        h.controller.start_tracking();

        fake.set_counter(25);
        h.controller.tick();
        let writes = h.store.write_count();
        assert!(writes >= 1);
        assert!(h.store.entries().contains_key(StepRecord::STORE_KEY));

        // Nothing changed, nothing written
        h.controller.tick();
        assert_eq!(h.store.write_count(), writes);
    }

    #[test]
    fn test_tracking_refused_without_authorization() {
        let mut h = harness();
        let fake = FakePedometer::available();
        with_pedometer(&mut h, &fake);
        h.controller.initialize(|_| {});

        h.controller.start_tracking();
        assert!(!h.controller.is_tracking());
    }

    #[test]
    fn test_day_boundary_resets_today_only() {
        let mut h = harness();
        let fake = FakePedometer::authorized();
        with_pedometer(&mut h, &fake);
        h.controller.initialize(|_| {});
        h.controller.start_tracking();

        fake.set_counter(300);
        h.controller.tick();
        h.clock.advance(Duration::days(1));
        fake.set_counter(320);
        h.controller.tick();

        let record = h.controller.record().clone();
        assert_eq!(record.steps_today, 20);
        assert_eq!(record.total_steps_all_time, 320);
        assert_eq!(record.last_step_date, NaiveDate::from_ymd_opt(2024, 1, 16));
    }

    #[test]
    fn test_steps_before_ready_are_parked_then_folded() {
        let mut h = harness();
        let fake = FakePedometer::available();
        with_pedometer(&mut h, &fake);
        h.controller.initialize(|_| {});

        // A delta that arrives while the handshake is still running
        h.controller
            .sink
            .emit_steps(ProviderKind::Pedometer, StepDelta::new(45).unwrap());
        h.controller.tick();
        assert_eq!(h.controller.record().pending_pedometer_steps, 45);
        assert_eq!(h.controller.record().total_steps_all_time, 0);

        fake.close_prompt(true);
        h.controller.tick();
        h.controller.start_tracking();
        fake.set_counter(5);
        h.controller.tick();

        let record = h.controller.record().clone();
        assert_eq!(record.pending_pedometer_steps, 0);
        assert_eq!(record.total_steps_all_time, 50);
        assert_eq!(record.steps_today, 50);
    }

    #[test]
    fn test_reinitialize_ignores_disowned_reply() {
        let mut h = harness();
        let fake = FakePedometer::available();
        with_pedometer(&mut h, &fake);
        let (first, first_cb) = outcome_cell();
        h.controller.initialize(first_cb);
        let stale_id = h.controller.handshake.as_ref().unwrap().request_id;

        let (second, second_cb) = outcome_cell();
        h.controller.reinitialize(second_cb);
        assert_eq!(first.get(), Some(false));

        h.controller.resolve_handshake(stale_id, true);
        assert_eq!(second.get(), None);
        assert_eq!(h.controller.state(), ControllerState::Initializing);
    }

    #[test]
    fn test_manual_steps_without_provider() {
        let mut h = harness();
        h.controller.initialize(|_| {});

        assert!(h.controller.add_manual_steps(0).is_none());
        let outcome = h.controller.add_manual_steps(1200).unwrap();

        assert_eq!(outcome.steps_today, 1200);
        assert_eq!(h.controller.record().last_active_source, StepSource::None);
    }

    #[test]
    fn test_history_sync_reconciles_and_advances_window() {
        let mut h = harness();
        h.controller.config.provider_order = vec![ProviderKind::Historical];
        let fake = FakeHealthData::authorized();
        with_health_data(&mut h, &fake);
        h.controller.initialize(|_| {});
        assert!(h.controller.is_tracking_available());

        h.controller.sync_history().unwrap();
        let midnight = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        assert_eq!(
            fake.queries(),
            vec![(midnight.timestamp_millis(), start().timestamp_millis())]
        );

        fake.respond_steps(2400);
        h.controller.tick();

        let record = h.controller.record().clone();
        assert_eq!(record.steps_today, 2400);
        assert_eq!(record.last_active_source, StepSource::NativeHistorical);
        assert_eq!(record.last_health_sync_time, Some(start()));
        assert!(h.controller.last_sync_error().is_none());

        // The next window starts where the last one ended
        h.clock.advance(Duration::hours(2));
        h.controller.sync_history().unwrap();
        assert_eq!(fake.queries()[1].0, start().timestamp_millis());
    }

    #[test]
    fn test_history_sync_failure_is_surfaced() {
        let mut h = harness();
        h.controller.config.provider_order = vec![ProviderKind::Historical];
        let fake = FakeHealthData::authorized();
        with_health_data(&mut h, &fake);
        h.controller.initialize(|_| {});

        h.controller.sync_history().unwrap();
        fake.push_payload(r#"{"success":false,"errorCode":"QueryFailed","errorMessage":"Binder died"}"#);
        h.controller.tick();

        assert!(matches!(
            h.controller.last_sync_error(),
            Some(StepError::QueryFailed { .. })
        ));
        assert_eq!(h.controller.record().total_steps_all_time, 0);
        assert_eq!(h.controller.record().last_health_sync_time, None);
    }

    #[test]
    fn test_unanswered_history_sync_times_out_and_can_retry() {
        let mut h = harness();
        h.controller.config.provider_order = vec![ProviderKind::Historical];
        let fake = FakeHealthData::authorized();
        with_health_data(&mut h, &fake);
        h.controller.initialize(|_| {});

        let first = h.controller.sync_history().unwrap();
        h.clock.advance(Duration::seconds(5));
        h.controller.tick();
        assert_eq!(h.controller.sync_history().unwrap(), first);
        assert_eq!(fake.queries().len(), 1);

        h.clock.advance(Duration::seconds(30));
        h.controller.tick();
        assert!(matches!(
            h.controller.last_sync_error(),
            Some(StepError::Timeout { operation, seconds: 30 }) if operation == "step query"
        ));

        let second = h.controller.sync_history().unwrap();
        assert_ne!(second, first);
        assert_eq!(fake.queries().len(), 2);

        // The abandoned query is answered late, then the retry
        fake.respond_steps(5000);
        fake.respond_steps(700);
        h.controller.tick();

        assert_eq!(h.controller.record().total_steps_all_time, 700);
        assert!(h.controller.last_sync_error().is_none());
    }

    #[test]
    fn test_history_success_without_end_time_keeps_window() {
        let mut h = harness();
        h.controller.config.provider_order = vec![ProviderKind::Historical];
        let fake = FakeHealthData::authorized();
        with_health_data(&mut h, &fake);
        h.controller.initialize(|_| {});

        h.controller.sync_history().unwrap();
        fake.push_payload(r#"{"success":true,"steps":100}"#);
        h.controller.tick();

        assert!(matches!(
            h.controller.last_sync_error(),
            Some(StepError::QueryFailed { code, .. }) if code == "JSONError"
        ));
        assert_eq!(h.controller.record().total_steps_all_time, 0);
        assert_eq!(h.controller.record().last_health_sync_time, None);
    }

    #[test]
    fn test_history_sync_requires_history_provider() {
        let mut h = harness();
        with_pedometer(&mut h, &FakePedometer::authorized());
        h.controller.initialize(|_| {});

        assert!(matches!(
            h.controller.sync_history(),
            Err(StepError::Unavailable(_))
        ));
    }

    #[test]
    fn test_falls_back_to_next_candidate() {
        let mut h = harness();
        with_pedometer(&mut h, &FakePedometer::unavailable());
        with_health_data(&mut h, &FakeHealthData::authorized());

        h.controller.initialize(|_| {});
        assert_eq!(h.controller.active_provider(), ProviderKind::Historical);
    }

    #[test]
    fn test_provider_needing_update_is_skipped() {
        let mut h = harness();
        with_pedometer(&mut h, &FakePedometer::unavailable());
        with_health_data(&mut h, &FakeHealthData::needs_update());
        let (outcome, callback) = outcome_cell();

        h.controller.initialize(callback);
        assert_eq!(outcome.get(), Some(false));
        assert_eq!(h.controller.active_provider(), ProviderKind::None);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let mut h = harness();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        h.controller.on_steps_reconciled(|_| panic!("listener failure"));
        h.controller
            .on_steps_reconciled(move |outcome| sink.borrow_mut().push(outcome.applied));

        h.controller.add_manual_steps(10);
        h.controller.add_manual_steps(15);

        assert_eq!(*seen.borrow(), vec![10, 15]);
        assert_eq!(h.controller.record().total_steps_all_time, 25);
    }

    #[test]
    fn test_clear_all_resets_record() {
        let mut h = harness();
        h.controller.add_manual_steps(99);
        h.controller.flush().unwrap();
        assert!(h.store.entries().contains_key(StepRecord::STORE_KEY));

        h.controller.clear_all();

        assert_eq!(h.controller.record(), &StepRecord::default());
        assert!(!h.store.entries().contains_key(StepRecord::STORE_KEY));
    }

    #[test]
    fn test_record_survives_restart() {
        let mut h = harness();
        h.controller.add_manual_steps(321);
        h.controller.flush().unwrap();

        let mut restarted = StepController::new(
            StrideConfig::default(),
            h.store.clone(),
            Arc::new(h.clock.clone()),
        );
        assert_eq!(restarted.record().total_steps_all_time, 321);
    }
}
