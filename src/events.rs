use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, error, info};

use crate::{
    db::{
        models::{DeviceKind, EventSource, NewDeviceEvent, Reading, SwitchAction},
        Store,
    },
    status::AggregateStatus,
};

/// A relay change detected between a stored baseline and a fresh status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub device: DeviceKind,
    pub from: bool,
    pub action: SwitchAction,
}

/// Appends a [`DeviceEvent`](crate::db::models::DeviceEvent) per relay
/// transition. Never fails its caller.
#[derive(Clone)]
pub struct EventRecorder {
    store: Arc<dyn Store>,
}

impl EventRecorder {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Devices whose live output differs from the stored baseline.
    ///
    /// Only states verified in this read are compared. A value replayed from
    /// the cache may predate the baseline, so it never produces an event.
    pub fn transitions(previous: Option<&Reading>, current: &AggregateStatus) -> Vec<Transition> {
        let Some(previous) = previous else {
            return Vec::new();
        };

        current
            .devices
            .iter()
            .filter_map(|(&device, state)| {
                let from = previous.status_of(device)?;
                let now = state.output_on.filter(|_| state.verified)?;
                (from != now).then(|| Transition {
                    device,
                    from,
                    action: SwitchAction::from_output(now),
                })
            })
            .collect()
    }

    /// Insert one event per transition; returns how many were stored.
    pub async fn record_transitions(
        &self,
        previous: Option<&Reading>,
        current: &AggregateStatus,
        source: EventSource,
        metadata: &Value,
    ) -> usize {
        let mut recorded = 0;

        for transition in Self::transitions(previous, current) {
            let event = NewDeviceEvent {
                recorded_at: current.timestamp,
                device: transition.device,
                action: transition.action,
                source,
                metadata: event_metadata(metadata, &transition),
            };

            match self.store.insert_event(&event).await {
                Ok(row) => {
                    recorded += 1;
                    info!(
                        event_id = row.id,
                        device = %transition.device,
                        action = %transition.action,
                        source = %source,
                        "Device transition recorded"
                    );
                }
                Err(e) => {
                    error!(device = %transition.device, error = %e, "Failed to record device event");
                }
            }
        }

        recorded
    }

    /// Diff `current` against the freshest durable baseline and record.
    pub async fn record_against_store(
        &self,
        current: &AggregateStatus,
        source: EventSource,
        metadata: &Value,
    ) -> usize {
        match self.baseline().await {
            Ok(baseline) => {
                self.record_transitions(baseline.as_ref(), current, source, metadata)
                    .await
            }
            Err(e) => {
                error!(error = %e, "Failed to load event baseline; skipping transition check");
                0
            }
        }
    }

    /// Latest reading, with each device's value replaced by its newest event
    /// when that event is more recent than the reading.
    ///
    /// Control paths record events without writing a reading, so the event is
    /// the fresher record of what the relay was last seen doing.
    async fn baseline(&self) -> Result<Option<Reading>> {
        let reading = self.store.latest_reading().await?;
        let mut baseline = reading.clone().unwrap_or_else(|| Reading {
            id: 0,
            recorded_at: DateTime::<Utc>::MIN_UTC,
            temperature: None,
            humidity: None,
            light_status: None,
            heater_status: None,
        });

        let mut overlaid = false;
        for device in DeviceKind::ALL {
            if let Some(event) = self.store.latest_event(device).await? {
                if event.recorded_at > baseline.recorded_at {
                    debug!(device = %device, action = %event.action, "Baseline taken from newer event");
                    baseline.set_status(device, Some(event.action.is_on()));
                    overlaid = true;
                }
            }
        }

        Ok((reading.is_some() || overlaid).then_some(baseline))
    }
}

fn event_metadata(context: &Value, transition: &Transition) -> Value {
    let mut map = match context {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => Map::from_iter([("context".to_owned(), other.clone())]),
    };
    map.insert("from".to_owned(), json!(on_off(transition.from)));
    map.insert("to".to_owned(), json!(transition.action.as_str()));
    Value::Object(map)
}

fn on_off(on: bool) -> &'static str {
    SwitchAction::from_output(on).as_str()
}
