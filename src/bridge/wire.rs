//! Step query result wire format
//!
//! Every platform bridge answers a step query with the same flat JSON record:
//!
//! ```json
//! { "success": true, "steps": 8500, "startTime": 1705276800000,
//!   "endTime": 1705312800000, "source": "HealthConnect" }
//! { "success": false, "errorCode": "QueryFailed", "errorMessage": "..." }
//! ```
//!
//! Timestamps are milliseconds since the Unix epoch (UTC). The shape is shared
//! by every bridge and must not change.
//!
//! Bridges that can list the individual samples behind an aggregate answer a
//! record query with [`StepRecordsResult`]:
//!
//! ```json
//! { "success": true, "count": 1, "records": [
//!   { "count": 420, "startTime": 1705305600000, "endTime": 1705306200000,
//!     "dataOrigin": "com.google.android.apps.fitness" } ] }
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StepError;

/// Error codes reported by the native bridges
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeErrorCode {
    NoContext,
    NoActivity,
    NotInitialized,
    InitFailed,
    PermissionRequestFailed,
    PermissionCheckFailed,
    QueryFailed,
    QueryRecordsFailed,
    #[serde(rename = "JSONError")]
    JsonError,
    Unsupported,
    /// Codes this version does not know about are kept verbatim
    #[serde(untagged)]
    Other(String),
}

impl BridgeErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            BridgeErrorCode::NoContext => "NoContext",
            BridgeErrorCode::NoActivity => "NoActivity",
            BridgeErrorCode::NotInitialized => "NotInitialized",
            BridgeErrorCode::InitFailed => "InitFailed",
            BridgeErrorCode::PermissionRequestFailed => "PermissionRequestFailed",
            BridgeErrorCode::PermissionCheckFailed => "PermissionCheckFailed",
            BridgeErrorCode::QueryFailed => "QueryFailed",
            BridgeErrorCode::QueryRecordsFailed => "QueryRecordsFailed",
            BridgeErrorCode::JsonError => "JSONError",
            BridgeErrorCode::Unsupported => "Unsupported",
            BridgeErrorCode::Other(code) => code.as_str(),
        }
    }
}

/// Result of a historical step query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepQueryResult {
    pub success: bool,
    /// Aggregate step count over the window
    #[serde(default)]
    pub steps: i64,
    /// Window start, epoch milliseconds
    #[serde(default)]
    pub start_time: i64,
    /// Window end, epoch milliseconds
    #[serde(default)]
    pub end_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<BridgeErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Platform data source (e.g. "HealthConnect", "HealthKit")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl StepQueryResult {
    /// A successful aggregate over `[start, end]`
    pub fn success(steps: i64, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            success: true,
            steps,
            start_time: start.timestamp_millis(),
            end_time: end.timestamp_millis(),
            error_code: None,
            error_message: None,
            source: None,
        }
    }

    /// A failed query with a descriptive reason
    pub fn failure(code: BridgeErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            steps: 0,
            start_time: 0,
            end_time: 0,
            error_code: Some(code),
            error_message: Some(message.into()),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Parse a bridge payload
    pub fn from_json(json: &str) -> Result<Self, StepError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to the bridge payload shape
    pub fn to_json(&self) -> Result<String, StepError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn start_time_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.start_time)
    }

    pub fn end_time_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.end_time)
    }

    /// Step count usable for reconciliation; negative counts are treated as zero
    pub fn step_count(&self) -> u64 {
        u64::try_from(self.steps).unwrap_or(0)
    }

    /// Convert into a `Result`, mapping failures to [`StepError::QueryFailed`]
    pub fn into_result(self) -> Result<Self, StepError> {
        if self.success {
            return Ok(self);
        }
        Err(query_failed(self.error_code.as_ref(), self.error_message.as_deref()))
    }
}

fn query_failed(code: Option<&BridgeErrorCode>, message: Option<&str>) -> StepError {
    StepError::QueryFailed {
        code: code
            .map(|c| c.as_str().to_string())
            .unwrap_or_else(|| "Unknown".to_string()),
        message: message.unwrap_or("Unknown error").to_string(),
    }
}

/// One step sample as stored by the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSample {
    pub count: i64,
    pub start_time: i64,
    pub end_time: i64,
    /// Package or bundle id of the app that wrote the sample
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_origin: Option<String>,
}

impl StepSample {
    pub fn start_time_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.start_time)
    }

    pub fn end_time_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.end_time)
    }
}

/// Result of a raw step-record query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecordsResult {
    pub success: bool,
    #[serde(default)]
    pub records: Vec<StepSample>,
    /// Number of records as reported by the bridge
    #[serde(default)]
    pub count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<BridgeErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl StepRecordsResult {
    pub fn from_json(json: &str) -> Result<Self, StepError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Sum of all sample counts, ignoring negative samples
    pub fn total_steps(&self) -> u64 {
        self.records
            .iter()
            .filter_map(|sample| u64::try_from(sample.count).ok())
            .fold(0, u64::saturating_add)
    }

    /// Samples grouped by the app that wrote them, with their step totals
    pub fn steps_by_origin(&self) -> BTreeMap<String, u64> {
        let mut totals = BTreeMap::new();
        for sample in &self.records {
            let origin = sample.data_origin.clone().unwrap_or_default();
            let steps = u64::try_from(sample.count).unwrap_or(0);
            let total: &mut u64 = totals.entry(origin).or_default();
            *total = total.saturating_add(steps);
        }
        totals
    }

    pub fn into_result(self) -> Result<Self, StepError> {
        if !self.success {
            return Err(query_failed(
                self.error_code.as_ref(),
                self.error_message.as_deref(),
            ));
        }
        if self.count != self.records.len() {
            tracing::warn!(
                reported = self.count,
                received = self.records.len(),
                "Step record count disagrees with the records received"
            );
        }
        Ok(self)
    }
}
