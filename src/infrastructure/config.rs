use crate::domain::models::SelectionMode;
use crate::infrastructure::error::InfraError;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

const TRACKER_JSON: &str = "tracker.json";
const SUPPORTED_SCHEMA: u64 = 1;
pub const MAX_DAY_POLL_SECONDS: u64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationSettings {
    pub max_attempts: u8,
    pub retry_delay_ms: u64,
}

impl Default for ReconciliationSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackerConfig {
    pub schema: u8,
    pub api_base_url: String,
    pub timezone: String,
    pub day_poll_seconds: u64,
    #[serde(default)]
    pub selection_mode: SelectionMode,
    #[serde(default)]
    pub reconciliation: ReconciliationSettings,
    #[serde(default = "default_channel_capacity")]
    pub invalidation_channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    64
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            schema: 1,
            api_base_url: "http://127.0.0.1:3000/".to_string(),
            timezone: "UTC".to_string(),
            day_poll_seconds: MAX_DAY_POLL_SECONDS,
            selection_mode: SelectionMode::Card,
            reconciliation: ReconciliationSettings::default(),
            invalidation_channel_capacity: default_channel_capacity(),
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), InfraError> {
        if self.api_base_url.trim().is_empty() {
            return Err(InfraError::InvalidConfig("apiBaseUrl must not be empty".to_string()));
        }
        self.time_zone()?;
        if self.day_poll_seconds == 0 || self.day_poll_seconds > MAX_DAY_POLL_SECONDS {
            return Err(InfraError::InvalidConfig(format!(
                "dayPollSeconds must be between 1 and {MAX_DAY_POLL_SECONDS}"
            )));
        }
        if self.reconciliation.max_attempts == 0 {
            return Err(InfraError::InvalidConfig(
                "reconciliation.maxAttempts must be >= 1".to_string(),
            ));
        }
        if self.invalidation_channel_capacity == 0 {
            return Err(InfraError::InvalidConfig(
                "invalidationChannelCapacity must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn time_zone(&self) -> Result<Tz, InfraError> {
        self.timezone.trim().parse::<Tz>().map_err(|error| {
            InfraError::InvalidConfig(format!("unknown timezone '{}': {error}", self.timezone))
        })
    }

    pub fn day_poll_interval(&self) -> Duration {
        Duration::from_secs(self.day_poll_seconds.clamp(1, MAX_DAY_POLL_SECONDS))
    }
}

pub fn ensure_default_config(config_dir: &Path) -> Result<(), InfraError> {
    let path = config_dir.join(TRACKER_JSON);
    if !path.exists() {
        fs::create_dir_all(config_dir)?;
        let formatted = serde_json::to_string_pretty(&TrackerConfig::default())?;
        fs::write(path, format!("{formatted}\n"))?;
    }
    Ok(())
}

pub fn load_config(config_dir: &Path) -> Result<TrackerConfig, InfraError> {
    let path = config_dir.join(TRACKER_JSON);
    let raw = fs::read_to_string(&path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != SUPPORTED_SCHEMA {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }

    let config: TrackerConfig = serde_json::from_value(parsed)?;
    config.validate()?;
    Ok(config)
}
