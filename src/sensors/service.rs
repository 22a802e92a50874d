use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::{
    clock::Clock,
    db::{
        models::{DeviceKind, EventSource, NewReading, Reading},
        Store,
    },
    events::EventRecorder,
    govee::{EnvironmentSample, EnvironmentSensor},
    status::StatusCache,
};

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("no sensor data")]
    NoSensorData,

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CollectOutcome {
    Stored { reading: Reading },
    /// Sensor data was available but the plug positions were not all
    /// confirmed live, so no row was written.
    Skipped { reason: String, sample: EnvironmentSample },
}

/// Periodic environment collection: one sensor sample plus the plug
/// positions, stored together as a [`Reading`].
#[derive(Clone)]
pub struct SensorService {
    sensor: Option<Arc<dyn EnvironmentSensor>>,
    cache: StatusCache,
    recorder: EventRecorder,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl SensorService {
    pub fn new(
        sensor: Option<Arc<dyn EnvironmentSensor>>,
        cache: StatusCache,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sensor,
            cache,
            recorder: EventRecorder::new(store.clone()),
            store,
            clock,
        }
    }

    async fn sample(&self) -> Option<EnvironmentSample> {
        let Some(sensor) = &self.sensor else {
            warn!("No environment sensor configured");
            return None;
        };
        match sensor.sample().await {
            Ok(sample) => Some(sample),
            Err(e) => {
                warn!(error = %e, "Environment sensor request failed");
                None
            }
        }
    }

    /// Take one sample and store it when the plug status is fully verified.
    ///
    /// Relay transitions seen by the forced status read are recorded before
    /// the new reading is inserted, so the previous reading is the baseline.
    pub async fn collect(&self) -> Result<CollectOutcome, CollectError> {
        let sample = self.sample().await;

        let status = match self.cache.read(true).await {
            Ok(status) => {
                let context = json!({ "trigger": "poll" });
                self.recorder
                    .record_against_store(&status, EventSource::Automation, &context)
                    .await;
                Some(status)
            }
            Err(e) => {
                warn!(error = %e, "Plug status unavailable during collection");
                None
            }
        };

        let (sample, temperature) = match sample {
            Some(s) => match s.temperature_c {
                Some(t) => (s, t),
                None => return Err(CollectError::NoSensorData),
            },
            None => return Err(CollectError::NoSensorData),
        };

        let Some(status) = status.filter(|s| s.all_verified) else {
            info!("Plug status not fully verified; reading not stored");
            return Ok(CollectOutcome::Skipped {
                reason: "plug status not fully verified".to_owned(),
                sample,
            });
        };

        let (Some(light), Some(heater)) = (
            status.output_of(DeviceKind::Light),
            status.output_of(DeviceKind::Heater),
        ) else {
            return Ok(CollectOutcome::Skipped {
                reason: "plug position unknown".to_owned(),
                sample,
            });
        };

        let reading = self
            .store
            .insert_reading(&NewReading {
                recorded_at: self.clock.now(),
                temperature: (temperature * 100.0).round() / 100.0,
                humidity: sample.humidity_pct,
                light_status: light,
                heater_status: heater,
            })
            .await?;

        info!(
            reading_id = reading.id,
            temperature = ?reading.temperature,
            humidity = ?reading.humidity,
            light,
            heater,
            "Reading stored"
        );
        Ok(CollectOutcome::Stored { reading })
    }
}
