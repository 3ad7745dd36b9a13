//! Composition root
//!
//! Wires one store and one clock into the step controller and the daily
//! reset scheduler for the lifetime of the host process.

use std::sync::Arc;

use chrono::{Local, TimeZone};

use crate::bridge::{HealthDataBridge, PedometerBridge};
use crate::clock::{Clock, SystemClock};
use crate::config::StrideConfig;
use crate::controller::{ProviderFactory, StepController};
use crate::error::StepError;
use crate::provider::{HistoricalProvider, PedometerProvider, StepProvider};
use crate::scheduler::{DailyResetScheduler, HandlerError, PendingResetHandlers, ResetReport};
use crate::store::{KeyValueStore, MemoryStore};
use crate::types::ProviderKind;

type DeferredFactory = Box<dyn FnOnce(Arc<dyn Clock>) -> ProviderFactory>;

/// Collects collaborators before the runtime exists
pub struct StepRuntimeBuilder {
    config: StrideConfig,
    store: Option<Arc<dyn KeyValueStore>>,
    clock: Option<Arc<dyn Clock>>,
    providers: Vec<(ProviderKind, DeferredFactory)>,
    pending: PendingResetHandlers,
    rejected: Option<StepError>,
}

impl Default for StepRuntimeBuilder {
    fn default() -> Self {
        Self::new(StrideConfig::default())
    }
}

impl StepRuntimeBuilder {
    pub fn new(config: StrideConfig) -> Self {
        Self {
            config,
            store: None,
            clock: None,
            providers: Vec::new(),
            pending: PendingResetHandlers::new(),
            rejected: None,
        }
    }

    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Offer the motion-sensor step counter. `bridge` is called once per
    /// initialization attempt.
    pub fn with_pedometer<B, F>(mut self, mut bridge: F) -> Self
    where
        B: PedometerBridge + 'static,
        F: FnMut() -> B + 'static,
    {
        let deferred: DeferredFactory = Box::new(move |_clock: Arc<dyn Clock>| {
            let factory: ProviderFactory = Box::new(move || {
                Box::new(PedometerProvider::new(bridge())) as Box<dyn StepProvider>
            });
            factory
        });
        self.providers.push((ProviderKind::Pedometer, deferred));
        self
    }

    /// Offer the OS health-data store
    pub fn with_health_data<B, F>(mut self, mut bridge: F) -> Self
    where
        B: HealthDataBridge + 'static,
        F: FnMut() -> B + 'static,
    {
        let deferred: DeferredFactory = Box::new(move |clock: Arc<dyn Clock>| {
            let factory: ProviderFactory = Box::new(move || {
                Box::new(HistoricalProvider::new(bridge(), Arc::clone(&clock)))
                    as Box<dyn StepProvider>
            });
            factory
        });
        self.providers.push((ProviderKind::Historical, deferred));
        self
    }

    /// Queue a daily reset handler; it is handed to the scheduler on build.
    /// A duplicate priority makes `build` fail.
    pub fn with_reset_handler(
        mut self,
        priority: i32,
        handler: impl FnMut() -> Result<(), HandlerError> + 'static,
    ) -> Self {
        if let Err(err) = self.pending.register(priority, handler) {
            self.rejected.get_or_insert(err);
        }
        self
    }

    /// Build on the device's local time zone
    pub fn build(self) -> Result<StepRuntime<Local>, StepError> {
        self.build_with_timezone(Local)
    }

    pub fn build_with_timezone<Tz: TimeZone>(self, tz: Tz) -> Result<StepRuntime<Tz>, StepError> {
        self.config.validate()?;
        if let Some(err) = self.rejected {
            return Err(err);
        }

        let store = self.store.unwrap_or_else(|| {
            tracing::warn!("No store configured, step totals will not survive a restart");
            Arc::new(MemoryStore::new())
        });
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let mut scheduler = DailyResetScheduler::with_timezone(
            &self.config,
            tz,
            Arc::clone(&store),
            Arc::clone(&clock),
        )?;
        let queued = self.pending.len();
        let adopted = scheduler.adopt(self.pending);
        tracing::debug!(queued, adopted, "Reset handlers handed to scheduler");

        let mut controller = StepController::new(self.config, store, Arc::clone(&clock));
        for (kind, deferred) in self.providers {
            controller.register_provider(kind, deferred(Arc::clone(&clock)));
        }

        Ok(StepRuntime {
            controller,
            scheduler,
        })
    }
}

/// The wired engine: one controller and one scheduler sharing a store
pub struct StepRuntime<Tz: TimeZone = Local> {
    controller: StepController,
    scheduler: DailyResetScheduler<Tz>,
}

impl<Tz: TimeZone> StepRuntime<Tz> {
    pub fn controller(&self) -> &StepController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut StepController {
        &mut self.controller
    }

    pub fn scheduler_mut(&mut self) -> &mut DailyResetScheduler<Tz> {
        &mut self.scheduler
    }

    /// App launch: run a due daily reset, then start initialization
    pub fn launch(&mut self, callback: impl FnOnce(bool) + 'static) -> Option<ResetReport> {
        let report = self.scheduler.check_and_reset();
        self.controller.initialize(callback);
        report
    }

    pub fn tick(&mut self) {
        self.controller.tick();
    }

    pub fn check_daily_reset(&mut self) -> Option<ResetReport> {
        self.scheduler.check_and_reset()
    }

    pub fn suspend(&mut self) {
        self.controller.suspend();
        if let Err(err) = self.controller.flush() {
            tracing::warn!(error = %err, "Failed to flush step record on suspend");
        }
    }

    /// Foreground again: resync the provider and catch up on a missed reset
    pub fn resume(&mut self) -> Option<ResetReport> {
        self.controller.resume();
        self.scheduler.check_and_reset()
    }

    /// Stop tracking and make the record durable
    pub fn shutdown(&mut self) -> Result<(), StepError> {
        if self.controller.is_tracking() {
            self.controller.stop_tracking();
        }
        self.controller.flush()
    }
}
