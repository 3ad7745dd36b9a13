//! Step providers
//!
//! A provider wraps one acquisition backend and exposes the same capability
//! surface regardless of what the backend can actually do:
//!
//! - [`PedometerProvider`]: local step counter, real-time deltas, no history
//! - [`HistoricalProvider`]: OS health-data aggregation, history only
//! - [`NoneProvider`]: sentinel used when nothing is available
//!
//! Failures never cross the provider boundary as errors: queries answer with
//! a failed [`StepQueryResult`] and authorization answers `false`.

mod historical;
mod pedometer;
pub mod session;

pub use historical::HistoricalProvider;
pub use pedometer::PedometerProvider;
pub use session::{Observation, PedometerSession, SessionCounters};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::bridge::{AuthorizationBridge, BridgeErrorCode, StepQueryResult};
use crate::events::{AuthorizationReply, EventSink, QueryReply};
use crate::types::{Availability, ProviderKind};

/// Capability surface shared by every acquisition backend
pub trait StepProvider {
    fn kind(&self) -> ProviderKind;

    /// Pure availability probe; never blocks or prompts
    fn availability(&self) -> Availability;

    fn is_available(&self) -> bool {
        self.availability().is_available()
    }

    /// Last known permission state; may be stale until authorization completes
    fn is_authorized(&self) -> bool;

    fn supports_realtime(&self) -> bool;

    fn supports_history(&self) -> bool;

    /// Ask for access. `reply` is answered once, on this call or a later poll,
    /// with the actual grant state.
    fn request_authorization(&mut self, reply: AuthorizationReply);

    /// Steps counted since `since`. Providers without history answer with a
    /// failed result.
    fn get_steps_since(&mut self, since: DateTime<Utc>, reply: QueryReply) {
        let _ = since;
        reply.send(unsupported_query(self.kind()));
    }

    /// Forget a query the caller stopped waiting for; its reply is never sent
    fn abandon_query(&mut self, request_id: Uuid) {
        let _ = request_id;
    }

    fn start_realtime_tracking(&mut self) {}

    fn stop_realtime_tracking(&mut self) {}

    fn is_tracking(&self) -> bool {
        false
    }

    /// Route `OnStepsUpdated` deltas into `sink`
    fn subscribe(&mut self, sink: EventSink);

    fn unsubscribe(&mut self);

    /// Advance pending work: prompts closing, queries completing, sensor reads
    fn poll(&mut self, now: DateTime<Utc>);

    /// The host app left the foreground
    fn suspend(&mut self) {}

    /// The host app came back to the foreground
    fn resume(&mut self) {}
}

pub(crate) fn unsupported_query(kind: ProviderKind) -> StepQueryResult {
    StepQueryResult::failure(
        BridgeErrorCode::Unsupported,
        format!("{} provider does not support historical queries", kind.as_str()),
    )
}

/// Sentinel provider for devices without any step capability
#[derive(Debug, Default)]
pub struct NoneProvider;

impl StepProvider for NoneProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::None
    }

    fn availability(&self) -> Availability {
        Availability::Unavailable
    }

    fn is_authorized(&self) -> bool {
        false
    }

    fn supports_realtime(&self) -> bool {
        false
    }

    fn supports_history(&self) -> bool {
        false
    }

    fn request_authorization(&mut self, reply: AuthorizationReply) {
        reply.send(false);
    }

    fn subscribe(&mut self, _sink: EventSink) {}

    fn unsubscribe(&mut self) {}

    fn poll(&mut self, _now: DateTime<Utc>) {}
}

/// Drives a permission prompt to completion across polls.
///
/// A closed prompt only means the user answered; the grant state is
/// re-queried from the bridge before replying.
#[derive(Debug, Default)]
pub(crate) struct AuthorizationFlow {
    pending: Option<AuthorizationReply>,
}

impl AuthorizationFlow {
    pub(crate) fn begin<B: AuthorizationBridge + ?Sized>(
        &mut self,
        bridge: &mut B,
        reply: AuthorizationReply,
    ) {
        if let Some(superseded) = self.pending.take() {
            tracing::debug!(request_id = %superseded.request_id(), "Authorization request superseded");
            superseded.send(false);
        }

        if bridge.authorization_status().is_authorized() {
            tracing::debug!("Step access already granted");
            reply.send(true);
            return;
        }

        bridge.present_authorization();
        self.pending = Some(reply);
    }

    pub(crate) fn poll<B: AuthorizationBridge + ?Sized>(&mut self, bridge: &B) {
        if self.pending.is_none() || bridge.authorization_pending() {
            return;
        }
        let granted = bridge.authorization_status().is_authorized();
        if let Some(reply) = self.pending.take() {
            tracing::info!(granted, "Authorization prompt closed");
            reply.send(granted);
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}
