//! Native bridge traits
//!
//! Each platform module (HealthKit, Health Connect, the motion-sensor step
//! counter) implements one of these. Calls never block: prompts and queries
//! are started by one call and observed completing on later polls.

use crate::types::{Availability, AuthorizationStatus};

/// Permission surface shared by every native bridge
pub trait AuthorizationBridge {
    /// Whether the capability exists on this device; never prompts
    fn probe_availability(&self) -> Availability;

    /// Current grant state as reported by the platform
    fn authorization_status(&self) -> AuthorizationStatus;

    /// Show the permission prompt and return immediately
    fn present_authorization(&mut self);

    /// True while a permission prompt is still on screen
    fn authorization_pending(&self) -> bool;
}

/// Motion-sensor step counter
pub trait PedometerBridge: AuthorizationBridge {
    /// Cumulative steps counted by the device since its last reboot
    fn read_step_counter(&mut self) -> Option<u64>;
}

/// OS health-data aggregation API
pub trait HealthDataBridge: AuthorizationBridge {
    /// Start an aggregate step query over `[start_millis, end_millis]`
    fn begin_step_query(&mut self, start_millis: i64, end_millis: i64);

    /// Next completed query payload, in the order queries were started
    fn take_query_payload(&mut self) -> Option<String>;
}
