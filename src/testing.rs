//! In-memory doubles shared by the unit tests.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::{
    clock::Clock,
    db::{
        models::{
            DeviceEvent, DeviceKind, NewDeviceEvent, NewReading, Reading, ScheduleConfig,
            ScheduleUpdate, SwitchAction,
        },
        Store,
    },
    govee::{EnvironmentSample, EnvironmentSensor},
    shelly::{models::PlugReading, DeviceApi, DeviceError},
    status::{CacheSettings, DeviceState, TrackedDevice},
};

pub const LIGHT_ID: &str = "light-plug";
pub const HEATER_ID: &str = "heater-plug";

pub fn tracked_devices() -> Vec<TrackedDevice> {
    vec![
        TrackedDevice {
            kind: DeviceKind::Light,
            id: LIGHT_ID.to_owned(),
        },
        TrackedDevice {
            kind: DeviceKind::Heater,
            id: HEATER_ID.to_owned(),
        },
    ]
}

pub fn cache_settings() -> CacheSettings {
    CacheSettings {
        hot_ttl: Duration::from_secs(10),
        stale_ceiling: Duration::from_secs(300),
        pacing: Duration::ZERO,
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.0.lock().unwrap() = now;
    }

    pub fn advance_secs(&self, secs: i64) {
        *self.0.lock().unwrap() += chrono::Duration::seconds(secs);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::at(Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

// ---------------------------------------------------------------------------
// Plug vendor
// ---------------------------------------------------------------------------

/// Plugs that start switched off and follow every successful switch call.
#[derive(Default)]
pub struct FakeDeviceApi {
    outputs: Mutex<HashMap<String, bool>>,
    status_failures: Mutex<HashMap<String, DeviceError>>,
    control_failure: Mutex<Option<DeviceError>>,
    status_calls: AtomicUsize,
    control_calls: Mutex<Vec<(String, SwitchAction)>>,
}

impl FakeDeviceApi {
    pub fn new() -> Self {
        let api = Self::default();
        api.set_output(LIGHT_ID, false);
        api.set_output(HEATER_ID, false);
        api
    }

    pub fn set_output(&self, device_id: &str, on: bool) {
        self.outputs.lock().unwrap().insert(device_id.to_owned(), on);
    }

    pub fn output(&self, device_id: &str) -> Option<bool> {
        self.outputs.lock().unwrap().get(device_id).copied()
    }

    pub fn fail(&self, device_id: &str, error: DeviceError) {
        self.status_failures
            .lock()
            .unwrap()
            .insert(device_id.to_owned(), error);
    }

    pub fn recover(&self, device_id: &str) {
        self.status_failures.lock().unwrap().remove(device_id);
    }

    pub fn fail_control(&self, error: DeviceError) {
        *self.control_failure.lock().unwrap() = Some(error);
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn control_calls(&self) -> Vec<(String, SwitchAction)> {
        self.control_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeviceApi for FakeDeviceApi {
    async fn fetch_status(&self, device_id: &str) -> Result<DeviceState, DeviceError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.status_failures.lock().unwrap().get(device_id) {
            return Err(err.clone());
        }
        let on = self.output(device_id).unwrap_or(false);
        Ok(DeviceState::live(
            device_id,
            PlugReading {
                output_on: on,
                power_watts: if on { 40.0 } else { 0.0 },
                voltage: 230.0,
                current_amps: if on { 0.17 } else { 0.0 },
                energy_kwh: 1.5,
                temperature_c: Some(35.0),
                online: true,
            },
        ))
    }

    async fn switch_output(&self, device_id: &str, action: SwitchAction) -> Result<(), DeviceError> {
        self.control_calls
            .lock()
            .unwrap()
            .push((device_id.to_owned(), action));
        if let Some(err) = self.control_failure.lock().unwrap().clone() {
            return Err(err);
        }
        self.set_output(device_id, action.is_on());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreState {
    schedule: Option<ScheduleConfig>,
    readings: Vec<Reading>,
    events: Vec<DeviceEvent>,
    next_id: i64,
    fail_event_inserts: bool,
    fail_schedule_writes: bool,
}

impl StoreState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct MemoryStore(Mutex<StoreState>);

impl MemoryStore {
    pub fn with_schedule(schedule: ScheduleConfig) -> Self {
        let store = Self::default();
        store.0.lock().unwrap().schedule = Some(schedule);
        store
    }

    pub fn schedule(&self) -> Option<ScheduleConfig> {
        self.0.lock().unwrap().schedule.clone()
    }

    pub fn readings(&self) -> Vec<Reading> {
        self.0.lock().unwrap().readings.clone()
    }

    pub fn events(&self) -> Vec<DeviceEvent> {
        self.0.lock().unwrap().events.clone()
    }

    pub fn fail_event_inserts(&self) {
        self.0.lock().unwrap().fail_event_inserts = true;
    }

    pub fn fail_schedule_writes(&self) {
        self.0.lock().unwrap().fail_schedule_writes = true;
    }

    pub fn push_reading(&self, mut reading: Reading) -> Reading {
        let mut state = self.0.lock().unwrap();
        reading.id = state.next_id();
        state.readings.push(reading.clone());
        reading
    }

    /// Seed a reading with both plug positions known.
    pub fn seed_reading(&self, at: DateTime<Utc>, light: bool, heater: bool) -> Reading {
        let mut state = self.0.lock().unwrap();
        let reading = Reading {
            id: state.next_id(),
            recorded_at: at,
            temperature: Some(27.0),
            humidity: Some(60.0),
            light_status: Some(light),
            heater_status: Some(heater),
        };
        state.readings.push(reading.clone());
        reading
    }

    pub fn seed_event(&self, at: DateTime<Utc>, device: DeviceKind, action: SwitchAction) {
        let mut state = self.0.lock().unwrap();
        let event = DeviceEvent {
            id: state.next_id(),
            recorded_at: at,
            device,
            action,
            source: crate::db::models::EventSource::User,
            metadata: serde_json::json!({}),
        };
        state.events.push(event);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn load_schedule(&self) -> Result<Option<ScheduleConfig>> {
        Ok(self.0.lock().unwrap().schedule.clone())
    }

    async fn save_schedule(&self, update: &ScheduleUpdate) -> Result<ScheduleConfig> {
        let mut state = self.0.lock().unwrap();
        let previous = state.schedule.clone().unwrap_or_default();
        let saved = ScheduleConfig {
            enabled: update.enabled,
            time_on: update.time_on.clone(),
            time_off: update.time_off.clone(),
            updated_at: Some(update.updated_at),
            ..previous
        };
        state.schedule = Some(saved.clone());
        Ok(saved)
    }

    async fn record_schedule_action(&self, action: SwitchAction, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.0.lock().unwrap();
        if state.fail_schedule_writes {
            return Err(anyhow!("light_schedule is read-only"));
        }
        let schedule = state
            .schedule
            .as_mut()
            .ok_or_else(|| anyhow!("no schedule row"))?;
        schedule.last_action = Some(action);
        schedule.last_action_at = Some(at);
        Ok(())
    }

    async fn latest_reading(&self) -> Result<Option<Reading>> {
        Ok(self
            .0
            .lock()
            .unwrap()
            .readings
            .iter()
            .max_by_key(|r| r.recorded_at)
            .cloned())
    }

    async fn insert_reading(&self, reading: &NewReading) -> Result<Reading> {
        let mut state = self.0.lock().unwrap();
        let row = Reading {
            id: state.next_id(),
            recorded_at: reading.recorded_at,
            temperature: Some(reading.temperature),
            humidity: reading.humidity,
            light_status: Some(reading.light_status),
            heater_status: Some(reading.heater_status),
        };
        state.readings.push(row.clone());
        Ok(row)
    }

    async fn readings_since(&self, since: DateTime<Utc>) -> Result<Vec<Reading>> {
        let mut rows: Vec<Reading> = self
            .0
            .lock()
            .unwrap()
            .readings
            .iter()
            .filter(|r| r.recorded_at > since)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.recorded_at);
        Ok(rows)
    }

    async fn insert_event(&self, event: &NewDeviceEvent) -> Result<DeviceEvent> {
        let mut state = self.0.lock().unwrap();
        if state.fail_event_inserts {
            return Err(anyhow!("device_events is read-only"));
        }
        let row = DeviceEvent {
            id: state.next_id(),
            recorded_at: event.recorded_at,
            device: event.device,
            action: event.action,
            source: event.source,
            metadata: event.metadata.clone(),
        };
        state.events.push(row.clone());
        Ok(row)
    }

    async fn latest_event(&self, device: DeviceKind) -> Result<Option<DeviceEvent>> {
        Ok(self
            .0
            .lock()
            .unwrap()
            .events
            .iter()
            .filter(|e| e.device == device)
            .max_by_key(|e| (e.recorded_at, e.id))
            .cloned())
    }

    async fn events_since(
        &self,
        since: DateTime<Utc>,
        device: Option<DeviceKind>,
        limit: i64,
    ) -> Result<Vec<DeviceEvent>> {
        let mut rows: Vec<DeviceEvent> = self
            .0
            .lock()
            .unwrap()
            .events
            .iter()
            .filter(|e| e.recorded_at > since && device.map_or(true, |d| e.device == d))
            .cloned()
            .collect();
        rows.sort_by(|a, b| (b.recorded_at, b.id).cmp(&(a.recorded_at, a.id)));
        rows.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(rows)
    }
}

// ---------------------------------------------------------------------------
// Environment sensor
// ---------------------------------------------------------------------------

pub struct FakeSensor(Mutex<Option<EnvironmentSample>>);

impl FakeSensor {
    pub fn reporting(temperature_c: f64, humidity_pct: f64) -> Self {
        Self(Mutex::new(Some(EnvironmentSample {
            temperature_c: Some(temperature_c),
            humidity_pct: Some(humidity_pct),
        })))
    }

    /// A sensor whose every request fails.
    pub fn broken() -> Self {
        Self(Mutex::new(None))
    }
}

#[async_trait]
impl EnvironmentSensor for FakeSensor {
    async fn sample(&self) -> Result<EnvironmentSample> {
        self.0
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow!("sensor cloud unreachable"))
    }
}
