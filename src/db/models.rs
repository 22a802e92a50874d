use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Logical name of a tracked smart plug.
///
/// Mirrors the `device_kind` Postgres enum.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    sqlx::Type,
    ToSchema,
)]
#[sqlx(type_name = "device_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Light,
    Heater,
}

impl DeviceKind {
    pub const ALL: [DeviceKind; 2] = [DeviceKind::Light, DeviceKind::Heater];

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceKind::Light => "light",
            DeviceKind::Heater => "heater",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested or observed relay position. Mirrors the `switch_action` Postgres enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "switch_action", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SwitchAction {
    On,
    Off,
}

impl SwitchAction {
    pub fn from_output(on: bool) -> Self {
        if on {
            SwitchAction::On
        } else {
            SwitchAction::Off
        }
    }

    pub fn is_on(self) -> bool {
        self == SwitchAction::On
    }

    /// Value of the vendor's `turn` form field.
    pub fn as_str(self) -> &'static str {
        match self {
            SwitchAction::On => "on",
            SwitchAction::Off => "off",
        }
    }
}

impl fmt::Display for SwitchAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who caused a device event. Mirrors the `event_source` Postgres enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "event_source", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    User,
    Automation,
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventSource::User => "user",
            EventSource::Automation => "automation",
        })
    }
}

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

/// One row of environment history plus the plug positions observed with it.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize, ToSchema)]
pub struct Reading {
    pub id: i64,
    pub recorded_at: DateTime<Utc>,
    /// Degrees Celsius.
    pub temperature: Option<f64>,
    /// Relative humidity in percent.
    pub humidity: Option<f64>,
    pub light_status: Option<bool>,
    pub heater_status: Option<bool>,
}

/// Readings folded into one time bucket: averaged environment values and
/// whether each plug was on at any point in it.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ReadingBucket {
    pub bucket_start: DateTime<Utc>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub light_status: Option<bool>,
    pub heater_status: Option<bool>,
}

impl Reading {
    pub fn status_of(&self, kind: DeviceKind) -> Option<bool> {
        match kind {
            DeviceKind::Light => self.light_status,
            DeviceKind::Heater => self.heater_status,
        }
    }

    pub fn set_status(&mut self, kind: DeviceKind, value: Option<bool>) {
        match kind {
            DeviceKind::Light => self.light_status = value,
            DeviceKind::Heater => self.heater_status = value,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewReading {
    pub recorded_at: DateTime<Utc>,
    pub temperature: f64,
    pub humidity: Option<f64>,
    pub light_status: bool,
    pub heater_status: bool,
}

// ---------------------------------------------------------------------------
// Device events
// ---------------------------------------------------------------------------

/// Append-only audit entry for a relay transition.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize, ToSchema)]
pub struct DeviceEvent {
    pub id: i64,
    pub recorded_at: DateTime<Utc>,
    pub device: DeviceKind,
    pub action: SwitchAction,
    pub source: EventSource,
    #[schema(value_type = Object)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewDeviceEvent {
    pub recorded_at: DateTime<Utc>,
    pub device: DeviceKind,
    pub action: SwitchAction,
    pub source: EventSource,
    pub metadata: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

/// Singleton light schedule row.
///
/// `time_on` / `time_off` are zero-padded local `HH:MM` strings.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize, ToSchema)]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub time_on: String,
    pub time_off: String,
    pub last_action: Option<SwitchAction>,
    pub last_action_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for ScheduleConfig {
    /// What readers see before the configuration UI has saved anything.
    fn default() -> Self {
        Self {
            enabled: false,
            time_on: "08:00".to_owned(),
            time_off: "20:00".to_owned(),
            last_action: None,
            last_action_at: None,
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleUpdate {
    pub enabled: bool,
    pub time_on: String,
    pub time_off: String,
    pub updated_at: DateTime<Utc>,
}
