use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

// ---------------------------------------------------------------------------
// Device state - POST /router/api/v1/device/state
//
// Request:
//   { "requestId": "...", "payload": { "sku": "H5179", "device": "<mac>" } }
//
// Response:
//   { "code": 200, "msg": "success",
//     "payload": { "capabilities": [
//         { "instance": "sensorTemperature", "state": { "value": 78.8 } },
//         { "instance": "sensorHumidity",    "state": { "value": 61 } } ] } }
// ---------------------------------------------------------------------------

pub const TEMPERATURE_INSTANCE: &str = "sensorTemperature";
pub const HUMIDITY_INSTANCE: &str = "sensorHumidity";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateRequest<'a> {
    pub request_id: String,
    pub payload: StateRequestPayload<'a>,
}

#[derive(Debug, Serialize)]
pub struct StateRequestPayload<'a> {
    pub sku: &'a str,
    pub device: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct StateResponse {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub msg: Option<String>,
    pub payload: Option<StatePayload>,
}

#[derive(Debug, Deserialize)]
pub struct StatePayload {
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

#[derive(Debug, Deserialize)]
pub struct Capability {
    pub instance: String,
    pub state: Option<CapabilityState>,
}

#[derive(Debug, Deserialize)]
pub struct CapabilityState {
    /// Number on most firmwares, numeric string on some.
    pub value: Value,
}

impl StatePayload {
    fn numeric(&self, instance: &str) -> Option<f64> {
        let value = &self.capabilities.iter().find(|c| c.instance == instance)?.state.as_ref()?.value;
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// One environment sample in metric units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct EnvironmentSample {
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
}

impl From<&StatePayload> for EnvironmentSample {
    /// The sensor reports Fahrenheit.
    fn from(payload: &StatePayload) -> Self {
        Self {
            temperature_c: payload
                .numeric(TEMPERATURE_INSTANCE)
                .map(|f| (f - 32.0) * 5.0 / 9.0),
            humidity_pct: payload.numeric(HUMIDITY_INSTANCE),
        }
    }
}
