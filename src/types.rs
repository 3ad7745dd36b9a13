//! Core types for Synheart Stride
//!
//! This module defines the values that flow between providers, the
//! acquisition controller and the persisted step record.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::num::NonZeroU32;

use crate::record::{PersistedRecord, RecordDecodeError, RecordFields};

/// Acquisition backend kind, as selected by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    None,
    Pedometer,
    Historical,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::None => "none",
            ProviderKind::Pedometer => "pedometer",
            ProviderKind::Historical => "historical",
        }
    }

    /// Source attributed to steps reconciled from this provider kind
    pub fn step_source(&self) -> StepSource {
        match self {
            ProviderKind::None => StepSource::None,
            ProviderKind::Pedometer => StepSource::FallbackPedometer,
            ProviderKind::Historical => StepSource::NativeHistorical,
        }
    }
}

/// Source that last contributed steps to the persisted record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StepSource {
    #[default]
    None,
    NativeHistorical,
    NativeRealtime,
    FallbackPedometer,
}

impl StepSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepSource::None => "None",
            StepSource::NativeHistorical => "NativeHistorical",
            StepSource::NativeRealtime => "NativeRealtime",
            StepSource::FallbackPedometer => "FallbackPedometer",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "None" => Some(StepSource::None),
            "NativeHistorical" => Some(StepSource::NativeHistorical),
            "NativeRealtime" => Some(StepSource::NativeRealtime),
            "FallbackPedometer" => Some(StepSource::FallbackPedometer),
            _ => None,
        }
    }
}

/// A strictly positive step increment
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepDelta(NonZeroU32);

impl StepDelta {
    /// Returns `None` for zero; a delta is never empty
    pub fn new(steps: u32) -> Option<Self> {
        NonZeroU32::new(steps).map(StepDelta)
    }

    /// Clamps a counter difference into a delta; zero and negative values yield `None`
    pub fn from_difference(difference: i64) -> Option<Self> {
        if difference <= 0 {
            return None;
        }
        Self::new(u32::try_from(difference).unwrap_or(u32::MAX))
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

/// Whether a capability exists on this device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Unavailable,
    Available,
    /// The platform provider is installed but must be updated first
    NeedsUpdate,
}

impl Availability {
    /// Decode the bridge integer code (0 = unavailable, 1 = available, 2 = needs update)
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Availability::Available,
            2 => Availability::NeedsUpdate,
            _ => Availability::Unavailable,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available)
    }
}

/// Last known permission state for step data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    Authorized,
    Denied,
    NotDetermined,
}

impl AuthorizationStatus {
    /// Decode the bridge integer code (1 = authorized, 0 = denied, -1 = not determined)
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => AuthorizationStatus::Authorized,
            0 => AuthorizationStatus::Denied,
            _ => AuthorizationStatus::NotDetermined,
        }
    }

    pub fn is_authorized(&self) -> bool {
        matches!(self, AuthorizationStatus::Authorized)
    }
}

/// Durable step totals
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StepRecord {
    /// End of the last successful historical query window
    pub last_health_sync_time: Option<DateTime<Utc>>,
    /// Pedometer steps received while the controller was not ready
    pub pending_pedometer_steps: u32,
    pub last_active_source: StepSource,
    pub total_steps_all_time: u64,
    pub steps_today: u32,
    /// UTC calendar date of the last recorded step
    pub last_step_date: Option<NaiveDate>,
}

impl PersistedRecord for StepRecord {
    const STORE_KEY: &'static str = "stride.step_record";
    const SCHEMA_VERSION: u32 = 1;

    fn encode(&self) -> Value {
        json!({
            "schemaVersion": Self::SCHEMA_VERSION,
            "lastHealthSyncTime": self.last_health_sync_time.map(|t| t.to_rfc3339()),
            "pendingPedometerSteps": self.pending_pedometer_steps,
            "lastActiveSource": self.last_active_source.as_str(),
            "totalStepsAllTime": self.total_steps_all_time,
            "stepsToday": self.steps_today,
            "lastStepDate": self.last_step_date.map(|d| d.format("%Y-%m-%d").to_string()),
        })
    }

    fn decode(fields: &RecordFields<'_>) -> Result<Self, RecordDecodeError> {
        let source = fields.string("lastActiveSource")?;
        let last_active_source = StepSource::parse(source).ok_or_else(|| {
            RecordDecodeError::InvalidField {
                field: "lastActiveSource".to_string(),
                reason: format!("unknown source '{source}'"),
            }
        })?;

        Ok(Self {
            last_health_sync_time: fields.optional_timestamp("lastHealthSyncTime")?,
            pending_pedometer_steps: fields.u32("pendingPedometerSteps")?,
            last_active_source,
            total_steps_all_time: fields.u64("totalStepsAllTime")?,
            steps_today: fields.u32("stepsToday")?,
            last_step_date: fields.optional_date("lastStepDate")?,
        })
    }
}

/// Read-only view of the step totals for host UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSnapshot {
    pub total_steps_all_time: u64,
    pub steps_today: u32,
    pub pending_pedometer_steps: u32,
    pub last_step_date: Option<NaiveDate>,
    pub last_active_source: StepSource,
    pub active_provider: ProviderKind,
    pub authorized: bool,
    pub tracking: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_delta_rejects_zero_and_negative() {
        assert!(StepDelta::new(0).is_none());
        assert!(StepDelta::from_difference(0).is_none());
        assert!(StepDelta::from_difference(-12).is_none());
        assert_eq!(StepDelta::from_difference(42).map(StepDelta::get), Some(42));
    }

    #[test]
    fn test_step_delta_saturates_large_differences() {
        let delta = StepDelta::from_difference(i64::MAX).unwrap();
        assert_eq!(delta.get(), u32::MAX);
    }

    #[test]
    fn test_bridge_codes() {
        assert_eq!(Availability::from_code(0), Availability::Unavailable);
        assert_eq!(Availability::from_code(1), Availability::Available);
        assert_eq!(Availability::from_code(2), Availability::NeedsUpdate);
        assert!(!Availability::NeedsUpdate.is_available());

        assert_eq!(AuthorizationStatus::from_code(1), AuthorizationStatus::Authorized);
        assert_eq!(AuthorizationStatus::from_code(0), AuthorizationStatus::Denied);
        assert_eq!(AuthorizationStatus::from_code(-1), AuthorizationStatus::NotDetermined);
    }

    #[test]
    fn test_provider_kind_source_mapping() {
        assert_eq!(ProviderKind::Pedometer.step_source(), StepSource::FallbackPedometer);
        assert_eq!(ProviderKind::Historical.step_source(), StepSource::NativeHistorical);
        assert_eq!(ProviderKind::None.step_source(), StepSource::None);
    }

    #[test]
    fn test_step_record_encoding_carries_schema_version() {
        let record = StepRecord {
            total_steps_all_time: 1200,
            steps_today: 300,
            last_step_date: NaiveDate::from_ymd_opt(2024, 1, 15),
            last_active_source: StepSource::FallbackPedometer,
            ..Default::default()
        };

        let value = record.encode();
        assert_eq!(value["schemaVersion"], 1);
        assert_eq!(value["totalStepsAllTime"], 1200);
        assert_eq!(value["lastStepDate"], "2024-01-15");
        assert_eq!(value["lastActiveSource"], "FallbackPedometer");
        assert!(value["lastHealthSyncTime"].is_null());
    }
}
