//! Test doubles for the native bridges and the time zone layer

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use chrono::{FixedOffset, LocalResult, NaiveDate, NaiveDateTime, TimeZone};

use crate::bridge::{AuthorizationBridge, HealthDataBridge, PedometerBridge, StepQueryResult};
use crate::types::{Availability, AuthorizationStatus};

#[derive(Debug)]
struct PromptState {
    availability: Availability,
    status: AuthorizationStatus,
    prompt_open: bool,
    prompt_shown: bool,
}

impl PromptState {
    fn new(availability: Availability, status: AuthorizationStatus) -> Self {
        Self {
            availability,
            status,
            prompt_open: false,
            prompt_shown: false,
        }
    }

    fn close(&mut self, granted: bool) {
        self.prompt_open = false;
        self.status = if granted {
            AuthorizationStatus::Authorized
        } else {
            AuthorizationStatus::Denied
        };
    }
}

#[derive(Debug)]
struct PedometerState {
    prompt: PromptState,
    counter: Option<u64>,
}

/// Test-side handle of a fake step counter. The bridge it hands out shares
/// state with it, so tests can move the counter and answer prompts after the
/// bridge has been given to a provider.
#[derive(Debug, Clone)]
pub(crate) struct FakePedometer {
    state: Rc<RefCell<PedometerState>>,
}

#[derive(Debug)]
pub(crate) struct FakePedometerBridge {
    state: Rc<RefCell<PedometerState>>,
}

impl FakePedometer {
    fn with(availability: Availability, status: AuthorizationStatus) -> Self {
        Self {
            state: Rc::new(RefCell::new(PedometerState {
                prompt: PromptState::new(availability, status),
                counter: Some(0),
            })),
        }
    }

    pub(crate) fn available() -> Self {
        Self::with(Availability::Available, AuthorizationStatus::NotDetermined)
    }

    pub(crate) fn authorized() -> Self {
        Self::with(Availability::Available, AuthorizationStatus::Authorized)
    }

    pub(crate) fn unavailable() -> Self {
        Self::with(Availability::Unavailable, AuthorizationStatus::NotDetermined)
    }

    pub(crate) fn bridge(&self) -> FakePedometerBridge {
        FakePedometerBridge {
            state: Rc::clone(&self.state),
        }
    }

    pub(crate) fn prompt_shown(&self) -> bool {
        self.state.borrow().prompt.prompt_shown
    }

    pub(crate) fn close_prompt(&self, granted: bool) {
        self.state.borrow_mut().prompt.close(granted);
    }

    pub(crate) fn set_counter(&self, reading: u64) {
        self.state.borrow_mut().counter = Some(reading);
    }

    pub(crate) fn set_counter_unreadable(&self) {
        self.state.borrow_mut().counter = None;
    }
}

impl AuthorizationBridge for FakePedometerBridge {
    fn probe_availability(&self) -> Availability {
        self.state.borrow().prompt.availability
    }

    fn authorization_status(&self) -> AuthorizationStatus {
        self.state.borrow().prompt.status
    }

    fn present_authorization(&mut self) {
        let mut state = self.state.borrow_mut();
        state.prompt.prompt_open = true;
        state.prompt.prompt_shown = true;
    }

    fn authorization_pending(&self) -> bool {
        self.state.borrow().prompt.prompt_open
    }
}

impl PedometerBridge for FakePedometerBridge {
    fn read_step_counter(&mut self) -> Option<u64> {
        self.state.borrow().counter
    }
}

#[derive(Debug)]
struct HealthDataState {
    prompt: PromptState,
    queries: Vec<(i64, i64)>,
    answered: usize,
    payloads: VecDeque<String>,
}

/// Test-side handle of a fake health store
#[derive(Debug, Clone)]
pub(crate) struct FakeHealthData {
    state: Rc<RefCell<HealthDataState>>,
}

#[derive(Debug)]
pub(crate) struct FakeHealthDataBridge {
    state: Rc<RefCell<HealthDataState>>,
}

impl FakeHealthData {
    fn with(availability: Availability, status: AuthorizationStatus) -> Self {
        Self {
            state: Rc::new(RefCell::new(HealthDataState {
                prompt: PromptState::new(availability, status),
                queries: Vec::new(),
                answered: 0,
                payloads: VecDeque::new(),
            })),
        }
    }

    pub(crate) fn available() -> Self {
        Self::with(Availability::Available, AuthorizationStatus::NotDetermined)
    }

    pub(crate) fn authorized() -> Self {
        Self::with(Availability::Available, AuthorizationStatus::Authorized)
    }

    pub(crate) fn needs_update() -> Self {
        Self::with(Availability::NeedsUpdate, AuthorizationStatus::NotDetermined)
    }

    pub(crate) fn bridge(&self) -> FakeHealthDataBridge {
        FakeHealthDataBridge {
            state: Rc::clone(&self.state),
        }
    }

    pub(crate) fn prompt_shown(&self) -> bool {
        self.state.borrow().prompt.prompt_shown
    }

    pub(crate) fn close_prompt(&self, granted: bool) {
        self.state.borrow_mut().prompt.close(granted);
    }

    /// Windows of every query started so far, as epoch milliseconds
    pub(crate) fn queries(&self) -> Vec<(i64, i64)> {
        self.state.borrow().queries.clone()
    }

    /// Answer the oldest unanswered query with a successful aggregate
    pub(crate) fn respond_steps(&self, steps: i64) {
        let mut state = self.state.borrow_mut();
        let (start, end) = state.queries[state.answered];
        state.answered += 1;
        let payload = StepQueryResult {
            success: true,
            steps,
            start_time: start,
            end_time: end,
            error_code: None,
            error_message: None,
            source: Some("HealthConnect".to_string()),
        };
        state.payloads.push_back(payload.to_json().unwrap());
    }

    /// Queue a raw payload for the oldest unanswered query
    pub(crate) fn push_payload(&self, payload: &str) {
        let mut state = self.state.borrow_mut();
        state.answered += 1;
        state.payloads.push_back(payload.to_string());
    }
}

impl AuthorizationBridge for FakeHealthDataBridge {
    fn probe_availability(&self) -> Availability {
        self.state.borrow().prompt.availability
    }

    fn authorization_status(&self) -> AuthorizationStatus {
        self.state.borrow().prompt.status
    }

    fn present_authorization(&mut self) {
        let mut state = self.state.borrow_mut();
        state.prompt.prompt_open = true;
        state.prompt.prompt_shown = true;
    }

    fn authorization_pending(&self) -> bool {
        self.state.borrow().prompt.prompt_open
    }
}

impl HealthDataBridge for FakeHealthDataBridge {
    fn begin_step_query(&mut self, start_millis: i64, end_millis: i64) {
        self.state
            .borrow_mut()
            .queries
            .push((start_millis, end_millis));
    }

    fn take_query_payload(&mut self) -> Option<String> {
        self.state.borrow_mut().payloads.pop_front()
    }
}

/// Central European time for 2024 only: UTC+1, jumping to UTC+2 at
/// 2024-03-31 01:00 UTC (local 02:00 becomes 03:00) and back at
/// 2024-10-27 01:00 UTC (local 03:00 becomes 02:00).
#[derive(Debug, Clone, Copy)]
pub(crate) struct Cet2024;

impl Cet2024 {
    fn winter() -> FixedOffset {
        FixedOffset::east_opt(3600).unwrap()
    }

    fn summer() -> FixedOffset {
        FixedOffset::east_opt(2 * 3600).unwrap()
    }

    fn local(month: u32, day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, month, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }
}

#[allow(deprecated)]
impl TimeZone for Cet2024 {
    type Offset = FixedOffset;

    fn from_offset(_offset: &FixedOffset) -> Self {
        Cet2024
    }

    fn offset_from_local_date(&self, local: &NaiveDate) -> LocalResult<FixedOffset> {
        self.offset_from_local_datetime(&local.and_hms_opt(0, 0, 0).unwrap())
    }

    fn offset_from_local_datetime(&self, local: &NaiveDateTime) -> LocalResult<FixedOffset> {
        let spring_gap = (Self::local(3, 31, 2), Self::local(3, 31, 3));
        let autumn_overlap = (Self::local(10, 27, 2), Self::local(10, 27, 3));

        if *local >= spring_gap.0 && *local < spring_gap.1 {
            LocalResult::None
        } else if *local >= autumn_overlap.0 && *local < autumn_overlap.1 {
            LocalResult::Ambiguous(Self::summer(), Self::winter())
        } else if *local >= spring_gap.1 && *local < autumn_overlap.0 {
            LocalResult::Single(Self::summer())
        } else {
            LocalResult::Single(Self::winter())
        }
    }

    fn offset_from_utc_date(&self, utc: &NaiveDate) -> FixedOffset {
        self.offset_from_utc_datetime(&utc.and_hms_opt(0, 0, 0).unwrap())
    }

    fn offset_from_utc_datetime(&self, utc: &NaiveDateTime) -> FixedOffset {
        if *utc >= Self::local(3, 31, 1) && *utc < Self::local(10, 27, 1) {
            Self::summer()
        } else {
            Self::winter()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::resolve_local;
    use chrono::Utc;

    #[test]
    fn test_gap_resolves_to_first_instant_after() {
        let half_past_two = Cet2024::local(3, 31, 2) + chrono::Duration::minutes(30);
        let resolved = resolve_local(&Cet2024, half_past_two);
        assert_eq!(
            resolved.with_timezone(&Utc),
            Utc.with_ymd_and_hms(2024, 3, 31, 1, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_ambiguous_resolves_to_earliest() {
        let resolved = resolve_local(&Cet2024, Cet2024::local(10, 27, 2));
        assert_eq!(
            resolved.with_timezone(&Utc),
            Utc.with_ymd_and_hms(2024, 10, 27, 0, 0, 0).unwrap()
        );
    }
}
