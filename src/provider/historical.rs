//! Health-data aggregation provider

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveTime, Utc};

use super::{AuthorizationFlow, StepProvider};
use crate::bridge::{BridgeErrorCode, HealthDataBridge, StepQueryResult};
use crate::clock::{resolve_local, Clock};
use crate::events::{AuthorizationReply, EventSink, QueryReply};
use crate::types::{Availability, ProviderKind};
use uuid::Uuid;

struct InFlightQuery {
    start_millis: i64,
    end_millis: i64,
    reply: QueryReply,
}

/// History-only provider backed by the OS health store.
///
/// Queries are started on the bridge immediately and answered from [`poll`]
/// as payloads arrive. A successful payload answers the query with the same
/// window; failures carry no window and answer the oldest query.
///
/// [`poll`]: StepProvider::poll
pub struct HistoricalProvider<B: HealthDataBridge> {
    bridge: B,
    clock: Arc<dyn Clock>,
    auth: AuthorizationFlow,
    in_flight: VecDeque<InFlightQuery>,
}

impl<B: HealthDataBridge> HistoricalProvider<B> {
    pub fn new(bridge: B, clock: Arc<dyn Clock>) -> Self {
        Self {
            bridge,
            clock,
            auth: AuthorizationFlow::default(),
            in_flight: VecDeque::new(),
        }
    }

    /// Number of queries still waiting for a bridge payload
    pub fn queries_in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Aggregate steps over `[start, end]`
    pub fn get_steps_for_range(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        reply: QueryReply,
    ) {
        if !self.is_authorized() {
            reply.send(StepQueryResult::failure(
                BridgeErrorCode::NotInitialized,
                "Health data access has not been granted",
            ));
            return;
        }
        if end < start {
            reply.send(StepQueryResult::failure(
                BridgeErrorCode::QueryFailed,
                format!("Query window ends before it starts ({start} > {end})"),
            ));
            return;
        }

        tracing::debug!(%start, %end, request_id = %reply.request_id(), "Starting step query");
        let (start_millis, end_millis) = (start.timestamp_millis(), end.timestamp_millis());
        self.bridge.begin_step_query(start_millis, end_millis);
        self.in_flight.push_back(InFlightQuery {
            start_millis,
            end_millis,
            reply,
        });
    }

    /// Steps since local midnight
    pub fn get_steps_today(&mut self, reply: QueryReply) {
        let now = self.clock.now();
        let midnight = now
            .with_timezone(&Local)
            .date_naive()
            .and_time(NaiveTime::MIN);
        let start = resolve_local(&Local, midnight).with_timezone(&Utc);
        self.get_steps_for_range(start, now, reply);
    }

    fn decode_payload(payload: &str) -> StepQueryResult {
        match StepQueryResult::from_json(payload) {
            Ok(result) if result.success && result.end_time <= 0 => {
                tracing::warn!("Step query payload reports success without an end time");
                StepQueryResult::failure(
                    BridgeErrorCode::JsonError,
                    "successful step query payload is missing endTime",
                )
            }
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(error = %err, "Undecodable step query payload");
                StepQueryResult::failure(BridgeErrorCode::JsonError, err.to_string())
            }
        }
    }

    fn take_matching(&mut self, result: &StepQueryResult) -> Option<InFlightQuery> {
        if !result.success {
            return self.in_flight.pop_front();
        }
        let index = self.in_flight.iter().position(|query| {
            query.start_millis == result.start_time && query.end_millis == result.end_time
        })?;
        self.in_flight.remove(index)
    }
}

impl<B: HealthDataBridge> StepProvider for HistoricalProvider<B> {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Historical
    }

    fn availability(&self) -> Availability {
        self.bridge.probe_availability()
    }

    fn is_authorized(&self) -> bool {
        self.bridge.authorization_status().is_authorized()
    }

    fn supports_realtime(&self) -> bool {
        false
    }

    fn supports_history(&self) -> bool {
        true
    }

    fn request_authorization(&mut self, reply: AuthorizationReply) {
        self.auth.begin(&mut self.bridge, reply);
    }

    fn get_steps_since(&mut self, since: DateTime<Utc>, reply: QueryReply) {
        let now = self.clock.now();
        self.get_steps_for_range(since, now, reply);
    }

    fn abandon_query(&mut self, request_id: Uuid) {
        let before = self.in_flight.len();
        self.in_flight
            .retain(|query| query.reply.request_id() != request_id);
        if self.in_flight.len() < before {
            tracing::debug!(%request_id, "Step query abandoned");
        }
    }

    // Deltas only come from real-time providers
    fn subscribe(&mut self, _sink: EventSink) {}

    fn unsubscribe(&mut self) {}

    fn poll(&mut self, _now: DateTime<Utc>) {
        self.auth.poll(&self.bridge);

        while let Some(payload) = self.bridge.take_query_payload() {
            let result = Self::decode_payload(&payload);
            match self.take_matching(&result) {
                Some(query) => query.reply.send(result),
                None => tracing::warn!(
                    start = result.start_time,
                    end = result.end_time,
                    "Step query payload matches no query in flight"
                ),
            }
        }
    }
}
