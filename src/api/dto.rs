use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::{
    control::TickOutcome,
    db::models::{DeviceEvent, DeviceKind, SwitchAction},
    sensors::CollectOutcome,
    status::{AggregateStatus, DeviceState, Source},
};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct StatusParams {
    /// Bypass the hot cache and poll every plug.
    #[serde(default)]
    pub refresh: bool,
}

/// Full state of each plug, `outputOn` included.
#[derive(Debug, Serialize, ToSchema)]
pub struct PlugStates {
    pub light: Option<DeviceState>,
    pub heater: Option<DeviceState>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeviceMeta {
    pub verified: bool,
    pub source: Source,
    /// Seconds since the value was observed live.
    pub age: Option<u64>,
    pub error: Option<String>,
}

impl DeviceMeta {
    fn of(state: Option<&DeviceState>) -> Self {
        match state {
            Some(s) => Self {
                verified: s.verified,
                source: s.source,
                age: s.age_seconds,
                error: s.error.clone(),
            },
            None => Self {
                verified: false,
                source: Source::Error,
                age: None,
                error: Some("device not tracked".to_owned()),
            },
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatusMeta {
    pub light: DeviceMeta,
    pub heater: DeviceMeta,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub success: bool,
    pub status: PlugStates,
    pub meta: StatusMeta,
    pub all_verified: bool,
    pub cached: bool,
    pub cache_age: u64,
    pub timestamp: DateTime<Utc>,
}

impl From<AggregateStatus> for StatusResponse {
    fn from(mut s: AggregateStatus) -> Self {
        let meta = StatusMeta {
            light: DeviceMeta::of(s.device(DeviceKind::Light)),
            heater: DeviceMeta::of(s.device(DeviceKind::Heater)),
        };
        Self {
            success: true,
            status: PlugStates {
                light: s.devices.remove(&DeviceKind::Light),
                heater: s.devices.remove(&DeviceKind::Heater),
            },
            meta,
            all_verified: s.all_verified,
            cached: s.cached,
            cache_age: s.cache_age,
            timestamp: s.timestamp,
        }
    }
}

// ---------------------------------------------------------------------------
// Manual control
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct ControlRequest {
    pub target: DeviceKind,
    pub action: SwitchAction,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ControlResponse {
    pub success: bool,
    pub target: DeviceKind,
    pub state: SwitchAction,
}

// ---------------------------------------------------------------------------
// Triggers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TriggerParams {
    /// Shared trigger secret, alternative to a bearer token.
    pub key: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TickResponse {
    pub success: bool,
    pub result: TickOutcome,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CollectResponse {
    pub success: bool,
    pub result: CollectOutcome,
}

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct ScheduleRequest {
    pub enabled: bool,
    /// `H:MM` or `HH:MM`, local time.
    pub time_on: String,
    pub time_off: String,
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct EventParams {
    /// Look-back window in hours (default 24).
    pub hours: Option<u32>,
    pub device: Option<DeviceKind>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EventsResponse {
    pub events: Vec<DeviceEvent>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HistoryParams {
    /// `24h` (default), `7d` or `30d`.
    pub range: Option<String>,
}
