pub mod cache;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    db::models::DeviceKind,
    shelly::{models::PlugReading, DeviceError},
};

pub use cache::{CacheSettings, CacheStats, StatusCache, StatusError};

/// A plug the service polls, keyed by its logical name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedDevice {
    pub kind: DeviceKind,
    /// Vendor device id.
    pub id: String,
}

/// Where a [`DeviceState`] came from in the current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Live,
    Cache,
    Error,
}

/// Canonical state of one plug.
///
/// `verified` is only true for a successful live poll this cycle, in which
/// case `source` is `Live` and `age_seconds` is zero. `output_on` is `None`
/// only when the state is unknown (`Source::Error`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceState {
    pub device_id: String,
    pub output_on: Option<bool>,
    pub power_watts: f64,
    pub voltage: f64,
    pub current_amps: f64,
    pub energy_kwh: f64,
    pub temperature_c: Option<f64>,
    pub online: bool,
    pub verified: bool,
    pub source: Source,
    pub age_seconds: Option<u64>,
    /// Failure reason for cache and error states.
    pub error: Option<String>,
}

impl DeviceState {
    pub fn live(device_id: &str, reading: PlugReading) -> Self {
        Self {
            device_id: device_id.to_owned(),
            output_on: Some(reading.output_on),
            power_watts: reading.power_watts,
            voltage: reading.voltage,
            current_amps: reading.current_amps,
            energy_kwh: reading.energy_kwh,
            temperature_c: reading.temperature_c,
            online: reading.online,
            verified: true,
            source: Source::Live,
            age_seconds: Some(0),
            error: None,
        }
    }

    /// Previously verified state reused after a failed poll.
    pub fn from_cache(previous: &DeviceState, age_seconds: u64, reason: &DeviceError) -> Self {
        Self {
            verified: false,
            source: Source::Cache,
            age_seconds: Some(age_seconds),
            error: Some(reason.to_string()),
            ..previous.clone()
        }
    }

    pub fn unknown(device_id: &str, reason: &DeviceError) -> Self {
        Self {
            device_id: device_id.to_owned(),
            output_on: None,
            power_watts: 0.0,
            voltage: 0.0,
            current_amps: 0.0,
            energy_kwh: 0.0,
            temperature_c: None,
            online: false,
            verified: false,
            source: Source::Error,
            age_seconds: None,
            error: Some(reason.to_string()),
        }
    }
}

/// Status of every tracked plug resolved in one read.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateStatus {
    pub devices: BTreeMap<DeviceKind, DeviceState>,
    /// Every tracked device was verified live. Only such results are cached
    /// or persisted as readings.
    pub all_verified: bool,
    pub any_verified: bool,
    /// Served from the cache, entirely (hot hit) or for some device.
    pub cached: bool,
    pub cache_age: u64,
    pub timestamp: DateTime<Utc>,
}

impl AggregateStatus {
    pub fn new(
        devices: BTreeMap<DeviceKind, DeviceState>,
        cached: bool,
        cache_age: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let all_verified = !devices.is_empty() && devices.values().all(|d| d.verified);
        let any_verified = devices.values().any(|d| d.verified);
        Self {
            devices,
            all_verified,
            any_verified,
            cached,
            cache_age,
            timestamp,
        }
    }

    pub fn device(&self, kind: DeviceKind) -> Option<&DeviceState> {
        self.devices.get(&kind)
    }

    /// Relay position of `kind`, if known.
    pub fn output_of(&self, kind: DeviceKind) -> Option<bool> {
        self.device(kind).and_then(|d| d.output_on)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(on: bool) -> PlugReading {
        PlugReading {
            output_on: on,
            power_watts: 20.0,
            voltage: 230.0,
            current_amps: 0.1,
            energy_kwh: 3.0,
            temperature_c: Some(38.0),
            online: true,
        }
    }

    #[test]
    fn live_state_is_verified_with_zero_age() {
        let state = DeviceState::live("abc", reading(true));
        assert!(state.verified);
        assert_eq!(state.source, Source::Live);
        assert_eq!(state.age_seconds, Some(0));
        assert_eq!(state.output_on, Some(true));
    }

    #[test]
    fn cached_state_keeps_values_but_drops_verification() {
        let live = DeviceState::live("abc", reading(true));
        let cached = DeviceState::from_cache(&live, 42, &DeviceError::Timeout);
        assert!(!cached.verified);
        assert_eq!(cached.source, Source::Cache);
        assert_eq!(cached.age_seconds, Some(42));
        assert_eq!(cached.output_on, Some(true));
        assert_eq!(cached.power_watts, 20.0);
        assert_eq!(cached.error.as_deref(), Some("request timed out"));
    }

    #[test]
    fn unknown_state_has_no_output() {
        let state = DeviceState::unknown("abc", &DeviceError::RateLimited);
        assert_eq!(state.output_on, None);
        assert!(!state.online);
        assert_eq!(state.source, Source::Error);
    }

    #[test]
    fn aggregate_flags_follow_devices() {
        let now = Utc::now();
        let mut devices = BTreeMap::new();
        devices.insert(DeviceKind::Light, DeviceState::live("l", reading(true)));
        devices.insert(
            DeviceKind::Heater,
            DeviceState::unknown("h", &DeviceError::Timeout),
        );

        let status = AggregateStatus::new(devices, false, 0, now);
        assert!(!status.all_verified);
        assert!(status.any_verified);
        assert_eq!(status.output_of(DeviceKind::Light), Some(true));
        assert_eq!(status.output_of(DeviceKind::Heater), None);

        let empty = AggregateStatus::new(BTreeMap::new(), false, 0, now);
        assert!(!empty.all_verified);
        assert!(!empty.any_verified);
    }
}
