//! Engine configuration

use chrono::{Duration, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::StepError;
use crate::types::ProviderKind;

/// Tunables for the acquisition controller and the daily reset scheduler.
///
/// Every field has a default, so `{}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrideConfig {
    /// How long to wait for an authorization reply before giving up
    pub authorization_timeout_secs: u64,
    /// How long a history query may stay unanswered before it is abandoned
    pub query_timeout_secs: u64,
    /// Local hour of the daily reset boundary
    pub reset_hour: u32,
    /// Local minute of the daily reset boundary
    pub reset_minute: u32,
    /// Save the step record at the end of every tick when dirty
    pub autosave: bool,
    /// Providers to try, most preferred first
    pub provider_order: Vec<ProviderKind>,
}

impl Default for StrideConfig {
    fn default() -> Self {
        Self {
            authorization_timeout_secs: 10,
            query_timeout_secs: 30,
            reset_hour: 4,
            reset_minute: 0,
            autosave: true,
            provider_order: vec![ProviderKind::Pedometer, ProviderKind::Historical],
        }
    }
}

impl StrideConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json(json: &str) -> Result<Self, StepError> {
        let config: StrideConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), StepError> {
        if self.authorization_timeout_secs == 0 {
            return Err(StepError::InvalidConfig(
                "authorization_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.query_timeout_secs == 0 {
            return Err(StepError::InvalidConfig(
                "query_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.reset_time().is_none() {
            return Err(StepError::InvalidConfig(format!(
                "reset time {:02}:{:02} is not a valid time of day",
                self.reset_hour, self.reset_minute
            )));
        }
        for (i, kind) in self.provider_order.iter().enumerate() {
            if *kind == ProviderKind::None {
                return Err(StepError::InvalidConfig(
                    "provider_order cannot list the none provider".to_string(),
                ));
            }
            if self.provider_order[..i].contains(kind) {
                return Err(StepError::InvalidConfig(format!(
                    "provider_order lists {} more than once",
                    kind.as_str()
                )));
            }
        }
        Ok(())
    }

    pub fn authorization_timeout(&self) -> Duration {
        seconds(self.authorization_timeout_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        seconds(self.query_timeout_secs)
    }

    /// Daily reset boundary, `None` when hour or minute is out of range
    pub fn reset_time(&self) -> Option<NaiveTime> {
        NaiveTime::from_hms_opt(self.reset_hour, self.reset_minute, 0)
    }
}

fn seconds(secs: u64) -> Duration {
    let secs = i64::try_from(secs).unwrap_or(i64::MAX);
    Duration::seconds(secs.min(i64::MAX / 1000))
}
