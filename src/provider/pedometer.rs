//! Motion-sensor pedometer provider

use chrono::{DateTime, Utc};

use super::session::{Observation, PedometerSession};
use super::{AuthorizationFlow, StepProvider};
use crate::bridge::PedometerBridge;
use crate::events::{AuthorizationReply, EventSink};
use crate::types::{Availability, ProviderKind};

/// Real-time provider over the device step counter.
///
/// Each poll samples the counter and feeds it to a [`PedometerSession`];
/// positive deltas are published to the subscribed sink.
pub struct PedometerProvider<B: PedometerBridge> {
    bridge: B,
    auth: AuthorizationFlow,
    session: PedometerSession,
    sink: Option<EventSink>,
    suspended: bool,
}

impl<B: PedometerBridge> PedometerProvider<B> {
    pub fn new(bridge: B) -> Self {
        Self {
            bridge,
            auth: AuthorizationFlow::default(),
            session: PedometerSession::new(),
            sink: None,
            suspended: false,
        }
    }

    pub fn session(&self) -> &PedometerSession {
        &self.session
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }
}

impl<B: PedometerBridge> StepProvider for PedometerProvider<B> {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Pedometer
    }

    fn availability(&self) -> Availability {
        self.bridge.probe_availability()
    }

    fn is_authorized(&self) -> bool {
        self.bridge.authorization_status().is_authorized()
    }

    fn supports_realtime(&self) -> bool {
        true
    }

    fn supports_history(&self) -> bool {
        false
    }

    fn request_authorization(&mut self, reply: AuthorizationReply) {
        self.auth.begin(&mut self.bridge, reply);
    }

    fn start_realtime_tracking(&mut self) {
        if self.session.is_tracking() {
            tracing::debug!("Pedometer already tracking");
            return;
        }

        let reading = self.bridge.read_step_counter();
        if reading.is_none() {
            tracing::warn!("Step counter unreadable, baseline deferred to first reading");
        }
        self.session.start(reading);
        self.suspended = false;
        tracing::info!(baseline = ?reading, "Pedometer tracking started");
    }

    fn stop_realtime_tracking(&mut self) {
        if !self.session.is_tracking() {
            return;
        }
        self.session.stop();
        self.suspended = false;
        tracing::info!(
            session_steps = self.session.counters().session_accumulated,
            "Pedometer tracking stopped"
        );
    }

    fn is_tracking(&self) -> bool {
        self.session.is_tracking()
    }

    fn subscribe(&mut self, sink: EventSink) {
        self.sink = Some(sink);
    }

    fn unsubscribe(&mut self) {
        self.sink = None;
    }

    fn poll(&mut self, _now: DateTime<Utc>) {
        self.auth.poll(&self.bridge);

        if !self.session.is_tracking() || self.suspended {
            return;
        }
        let Some(reading) = self.bridge.read_step_counter() else {
            return;
        };

        match self.session.observe(reading) {
            Observation::Advanced(delta) => {
                if let Some(sink) = &self.sink {
                    sink.emit_steps(ProviderKind::Pedometer, delta);
                }
            }
            Observation::CounterReset => {
                tracing::info!(reading, "Step counter went backwards, re-baselined");
            }
            Observation::Baselined => {
                tracing::debug!(reading, "Pedometer baseline established");
            }
            Observation::Unchanged | Observation::Idle => {}
        }
    }

    fn suspend(&mut self) {
        if self.session.is_tracking() {
            self.suspended = true;
        }
    }

    fn resume(&mut self) {
        if !self.suspended {
            return;
        }
        self.suspended = false;
        if let Some(reading) = self.bridge.read_step_counter() {
            self.session.resync(reading);
        }
    }
}
