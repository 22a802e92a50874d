//! Narrow read/write contracts over the durable store.
//!
//! Services only ever talk to [`Store`]; [`PgStore`] is the Postgres-backed
//! implementation wired up in `main`.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::PgPool;

use super::models::{
    DeviceEvent, DeviceKind, NewDeviceEvent, NewReading, Reading, ReadingBucket, ScheduleConfig,
    ScheduleUpdate, SwitchAction,
};

#[async_trait]
pub trait Store: Send + Sync {
    /// The singleton schedule row, if it has ever been saved.
    async fn load_schedule(&self) -> Result<Option<ScheduleConfig>>;

    /// Upsert the singleton schedule row. `last_action*` columns are preserved.
    async fn save_schedule(&self, update: &ScheduleUpdate) -> Result<ScheduleConfig>;

    /// Remember the action the scheduler just applied successfully.
    async fn record_schedule_action(&self, action: SwitchAction, at: DateTime<Utc>) -> Result<()>;

    async fn latest_reading(&self) -> Result<Option<Reading>>;

    async fn insert_reading(&self, reading: &NewReading) -> Result<Reading>;

    /// Readings newer than `since`, oldest first.
    async fn readings_since(&self, since: DateTime<Utc>) -> Result<Vec<Reading>>;

    /// Readings newer than `since` folded into `width_secs` buckets aligned to
    /// the Unix epoch, oldest first.
    ///
    /// The default folds the raw rows in memory; [`PgStore`] aggregates in SQL.
    async fn reading_buckets(&self, since: DateTime<Utc>, width_secs: i64) -> Result<Vec<ReadingBucket>> {
        let readings = self.readings_since(since).await?;
        Ok(bucket_readings(&readings, width_secs))
    }

    async fn insert_event(&self, event: &NewDeviceEvent) -> Result<DeviceEvent>;

    /// Newest event for `device`, if any.
    async fn latest_event(&self, device: DeviceKind) -> Result<Option<DeviceEvent>>;

    /// Events newer than `since`, newest first, optionally for one device.
    async fn events_since(
        &self,
        since: DateTime<Utc>,
        device: Option<DeviceKind>,
        limit: i64,
    ) -> Result<Vec<DeviceEvent>>;
}

// ---------------------------------------------------------------------------
// In-memory bucketing
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Fold {
    temperature: Mean,
    humidity: Mean,
    light: Option<bool>,
    heater: Option<bool>,
}

#[derive(Default)]
struct Mean {
    sum: f64,
    n: u32,
}

impl Mean {
    fn push(&mut self, v: Option<f64>) {
        if let Some(v) = v {
            self.sum += v;
            self.n += 1;
        }
    }

    fn get(&self) -> Option<f64> {
        (self.n > 0).then(|| self.sum / f64::from(self.n))
    }
}

/// Null only when every input is null, like SQL `BOOL_OR`.
fn bool_or(acc: Option<bool>, v: Option<bool>) -> Option<bool> {
    match (acc, v) {
        (None, v) => v,
        (a, None) => a,
        (Some(a), Some(b)) => Some(a || b),
    }
}

/// Same aggregation as the SQL in [`PgStore::reading_buckets`].
pub fn bucket_readings(readings: &[Reading], width_secs: i64) -> Vec<ReadingBucket> {
    let width = width_secs.max(1);
    let mut folds: BTreeMap<i64, Fold> = BTreeMap::new();
    for r in readings {
        let start = r.recorded_at.timestamp().div_euclid(width) * width;
        let fold = folds.entry(start).or_default();
        fold.temperature.push(r.temperature);
        fold.humidity.push(r.humidity);
        fold.light = bool_or(fold.light, r.light_status);
        fold.heater = bool_or(fold.heater, r.heater_status);
    }

    folds
        .into_iter()
        .filter_map(|(start, f)| {
            Some(ReadingBucket {
                bucket_start: Utc.timestamp_opt(start, 0).single()?,
                temperature: f.temperature.get(),
                humidity: f.humidity.get(),
                light_status: f.light,
                heater_status: f.heater,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const READING_COLUMNS: &str =
    "id, recorded_at, temperature, humidity, light_status, heater_status";
const EVENT_COLUMNS: &str = "id, recorded_at, device, action, source, metadata";
const SCHEDULE_COLUMNS: &str =
    "enabled, time_on, time_off, last_action, last_action_at, updated_at";

#[async_trait]
impl Store for PgStore {
    async fn load_schedule(&self) -> Result<Option<ScheduleConfig>> {
        let sql = format!("SELECT {SCHEDULE_COLUMNS} FROM light_schedule WHERE id = 1");
        sqlx::query_as::<_, ScheduleConfig>(&sql)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load light schedule")
    }

    async fn save_schedule(&self, update: &ScheduleUpdate) -> Result<ScheduleConfig> {
        let sql = format!(
            r#"
            INSERT INTO light_schedule (id, enabled, time_on, time_off, updated_at)
            VALUES (1, $1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET
                enabled    = EXCLUDED.enabled,
                time_on    = EXCLUDED.time_on,
                time_off   = EXCLUDED.time_off,
                updated_at = EXCLUDED.updated_at
            RETURNING {SCHEDULE_COLUMNS}
            "#
        );
        sqlx::query_as::<_, ScheduleConfig>(&sql)
            .bind(update.enabled)
            .bind(&update.time_on)
            .bind(&update.time_off)
            .bind(update.updated_at)
            .fetch_one(&self.pool)
            .await
            .context("Failed to save light schedule")
    }

    async fn record_schedule_action(&self, action: SwitchAction, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE light_schedule SET last_action = $1, last_action_at = $2 WHERE id = 1",
        )
        .bind(action)
        .bind(at)
        .execute(&self.pool)
        .await
        .context("Failed to record schedule action")?;
        Ok(())
    }

    async fn latest_reading(&self) -> Result<Option<Reading>> {
        let sql = format!("SELECT {READING_COLUMNS} FROM readings ORDER BY recorded_at DESC LIMIT 1");
        sqlx::query_as::<_, Reading>(&sql)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load latest reading")
    }

    async fn insert_reading(&self, reading: &NewReading) -> Result<Reading> {
        let sql = format!(
            r#"
            INSERT INTO readings (recorded_at, temperature, humidity, light_status, heater_status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {READING_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Reading>(&sql)
            .bind(reading.recorded_at)
            .bind(reading.temperature)
            .bind(reading.humidity)
            .bind(reading.light_status)
            .bind(reading.heater_status)
            .fetch_one(&self.pool)
            .await
            .context("Failed to insert reading")
    }

    async fn readings_since(&self, since: DateTime<Utc>) -> Result<Vec<Reading>> {
        let sql = format!(
            "SELECT {READING_COLUMNS} FROM readings WHERE recorded_at > $1 ORDER BY recorded_at ASC"
        );
        sqlx::query_as::<_, Reading>(&sql)
            .bind(since)
            .fetch_all(&self.pool)
            .await
            .context("Failed to load readings")
    }

    async fn reading_buckets(&self, since: DateTime<Utc>, width_secs: i64) -> Result<Vec<ReadingBucket>> {
        sqlx::query_as::<_, ReadingBucket>(
            r#"
            SELECT to_timestamp(floor(extract(epoch FROM recorded_at)::float8 / $2) * $2) AS bucket_start,
                   AVG(temperature)   AS temperature,
                   AVG(humidity)      AS humidity,
                   BOOL_OR(light_status)  AS light_status,
                   BOOL_OR(heater_status) AS heater_status
            FROM readings
            WHERE recorded_at > $1
            GROUP BY 1
            ORDER BY 1 ASC
            "#,
        )
        .bind(since)
        .bind(width_secs.max(1) as f64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to aggregate readings")
    }

    async fn insert_event(&self, event: &NewDeviceEvent) -> Result<DeviceEvent> {
        let sql = format!(
            r#"
            INSERT INTO device_events (recorded_at, device, action, source, metadata)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {EVENT_COLUMNS}
            "#
        );
        sqlx::query_as::<_, DeviceEvent>(&sql)
            .bind(event.recorded_at)
            .bind(event.device)
            .bind(event.action)
            .bind(event.source)
            .bind(&event.metadata)
            .fetch_one(&self.pool)
            .await
            .context("Failed to insert device event")
    }

    async fn latest_event(&self, device: DeviceKind) -> Result<Option<DeviceEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM device_events WHERE device = $1 \
             ORDER BY recorded_at DESC LIMIT 1"
        );
        sqlx::query_as::<_, DeviceEvent>(&sql)
            .bind(device)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load latest device event")
    }

    async fn events_since(
        &self,
        since: DateTime<Utc>,
        device: Option<DeviceKind>,
        limit: i64,
    ) -> Result<Vec<DeviceEvent>> {
        let sql = format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM device_events
            WHERE recorded_at > $1
              AND ($2::device_kind IS NULL OR device = $2)
            ORDER BY recorded_at DESC
            LIMIT $3
            "#
        );
        sqlx::query_as::<_, DeviceEvent>(&sql)
            .bind(since)
            .bind(device)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("Failed to load device events")
    }
}
