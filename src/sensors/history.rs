//! Read side of the reading/event history.

use std::{str::FromStr, sync::Arc};

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    clock::Clock,
    db::{
        models::{DeviceEvent, DeviceKind, Reading, ReadingBucket},
        Store,
    },
};

/// Maximum number of events returned by one query.
pub const EVENT_LIMIT: i64 = 500;
pub const DEFAULT_EVENT_HOURS: u32 = 24;
const MAX_EVENT_HOURS: u32 = 24 * 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryRange {
    /// Raw readings of the last 24 hours.
    #[default]
    Day,
    /// Hourly buckets over 7 days.
    Week,
    /// Four-hour buckets over 30 days.
    Month,
}

impl HistoryRange {
    pub fn window(self) -> Duration {
        match self {
            HistoryRange::Day => Duration::hours(24),
            HistoryRange::Week => Duration::days(7),
            HistoryRange::Month => Duration::days(30),
        }
    }

    /// Bucket width in seconds; `None` for raw rows.
    fn bucket_secs(self) -> Option<i64> {
        match self {
            HistoryRange::Day => None,
            HistoryRange::Week => Some(3600),
            HistoryRange::Month => Some(4 * 3600),
        }
    }
}

impl FromStr for HistoryRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "24h" => Ok(HistoryRange::Day),
            "7d" => Ok(HistoryRange::Week),
            "30d" => Ok(HistoryRange::Month),
            other => Err(format!("unknown range {other:?}, expected 24h, 7d or 30d")),
        }
    }
}

/// One chart point. Bucketed points carry averages and "was on at any time".
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct HistoryPoint {
    pub time: DateTime<Utc>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub light: Option<bool>,
    pub heater: Option<bool>,
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

impl From<&Reading> for HistoryPoint {
    fn from(r: &Reading) -> Self {
        Self {
            time: r.recorded_at,
            temperature: r.temperature.map(round1),
            humidity: r.humidity.map(round1),
            light: r.light_status,
            heater: r.heater_status,
        }
    }
}

impl From<&ReadingBucket> for HistoryPoint {
    fn from(b: &ReadingBucket) -> Self {
        Self {
            time: b.bucket_start,
            temperature: b.temperature.map(round1),
            humidity: b.humidity.map(round1),
            light: b.light_status,
            heater: b.heater_status,
        }
    }
}

#[derive(Clone)]
pub struct HistoryService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl HistoryService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn history(&self, range: HistoryRange) -> Result<Vec<HistoryPoint>> {
        let since = self.clock.now() - range.window();
        let points = match range.bucket_secs() {
            None => self.store.readings_since(since).await?.iter().map(HistoryPoint::from).collect(),
            Some(width) => self
                .store
                .reading_buckets(since, width)
                .await?
                .iter()
                .map(HistoryPoint::from)
                .collect(),
        };
        Ok(points)
    }

    /// Events of the last `hours` (default 24, at most 30 days), newest first.
    pub async fn events(&self, hours: Option<u32>, device: Option<DeviceKind>) -> Result<Vec<DeviceEvent>> {
        let hours = match hours {
            Some(0) | None => DEFAULT_EVENT_HOURS,
            Some(h) => h.min(MAX_EVENT_HOURS),
        };
        let since = self.clock.now() - Duration::hours(i64::from(hours));
        self.store.events_since(since, device, EVENT_LIMIT).await
    }
}
