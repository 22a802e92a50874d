use serde::Deserialize;
use serde_json::{Map, Value};

use super::error::DeviceError;

// ---------------------------------------------------------------------------
// Generic response envelope
//
// Every Shelly Cloud call wraps its payload in the same outer object:
//
// Success:
//   { "isok": true, "data": <T> }
//
// Failure:
//   { "isok": false, "errors": ["..."] }
//   { "isok": false, "errors": { "max_req": "Request limit reached!" } }
//
// `errors` is a list on some endpoints and a code → message object on others.
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ShellyResponse<T> {
    pub isok: bool,

    /// Present on success.
    pub data: Option<T>,

    /// Present on failure.
    #[serde(default)]
    pub errors: Option<Value>,
}

impl<T> ShellyResponse<T> {
    /// Unwrap the payload; an `isok:false` body or a missing `data` field is a
    /// protocol failure even though the transport succeeded.
    pub fn into_result(self) -> Result<T, DeviceError> {
        if !self.isok {
            return Err(DeviceError::Protocol(first_error(self.errors.as_ref())));
        }
        self.data
            .ok_or_else(|| DeviceError::protocol("isok=true but data field is missing"))
    }

    /// Check the envelope only, for calls whose payload carries nothing we use.
    pub fn into_ack(self) -> Result<(), DeviceError> {
        if self.isok {
            Ok(())
        } else {
            Err(DeviceError::Protocol(first_error(self.errors.as_ref())))
        }
    }
}

fn first_error(errors: Option<&Value>) -> String {
    let describe = |v: &Value| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let msg = match errors {
        Some(Value::Array(items)) => items.first().map(describe),
        Some(Value::Object(map)) => map
            .iter()
            .next()
            .map(|(code, v)| format!("{code}: {}", describe(v))),
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    };
    msg.unwrap_or_else(|| "Shelly API returned isok:false".to_owned())
}

// ---------------------------------------------------------------------------
// Device status - POST /device/status
// ---------------------------------------------------------------------------

/// Full response type: `ShellyResponse<DeviceStatusData>`.
pub type DeviceStatusResponse = ShellyResponse<DeviceStatusData>;

/// Full response type for `POST /device/relay/control`.
pub type ControlResponse = ShellyResponse<Value>;

/// Component key of the first relay channel on Gen2+ plugs.
pub const SWITCH_CHANNEL: &str = "switch:0";

#[derive(Debug, Deserialize)]
pub struct DeviceStatusData {
    #[serde(default)]
    pub online: Option<bool>,

    /// Component map keyed by component id (`"switch:0"`, `"sys"`, `"wifi"`…).
    pub device_status: Option<Map<String, Value>>,
}

/// The `switch:0` component of a status payload.
#[derive(Debug, Deserialize)]
pub struct SwitchStatus {
    pub output: Option<bool>,
    /// Active power in W.
    pub apower: Option<f64>,
    pub voltage: Option<f64>,
    /// Amperes.
    pub current: Option<f64>,
    pub aenergy: Option<EnergyCounter>,
    pub temperature: Option<SwitchTemperature>,
}

#[derive(Debug, Deserialize)]
pub struct EnergyCounter {
    /// Lifetime energy in Wh.
    pub total: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct SwitchTemperature {
    #[serde(rename = "tC")]
    pub t_c: Option<f64>,
}

/// Vendor-neutral view of one plug, extracted from a status payload.
#[derive(Debug, Clone, PartialEq)]
pub struct PlugReading {
    pub output_on: bool,
    pub power_watts: f64,
    pub voltage: f64,
    pub current_amps: f64,
    pub energy_kwh: f64,
    pub temperature_c: Option<f64>,
    pub online: bool,
}

impl TryFrom<DeviceStatusData> for PlugReading {
    type Error = DeviceError;

    /// Relay position is mandatory: a payload without it is parse drift and
    /// must never read as "off". Metering fields default to zero.
    fn try_from(data: DeviceStatusData) -> Result<Self, DeviceError> {
        let mut components = data
            .device_status
            .ok_or_else(|| DeviceError::protocol("device_status missing from response"))?;

        let raw = components
            .remove(SWITCH_CHANNEL)
            .ok_or_else(|| DeviceError::protocol(format!("no {SWITCH_CHANNEL} in device_status")))?;

        let switch: SwitchStatus = serde_json::from_value(raw)
            .map_err(|e| DeviceError::protocol(format!("malformed {SWITCH_CHANNEL}: {e}")))?;

        let output_on = switch
            .output
            .ok_or_else(|| DeviceError::protocol(format!("{SWITCH_CHANNEL}.output missing")))?;

        Ok(Self {
            output_on,
            power_watts: switch.apower.unwrap_or(0.0),
            voltage: switch.voltage.unwrap_or(0.0),
            current_amps: switch.current.unwrap_or(0.0),
            energy_kwh: switch
                .aenergy
                .and_then(|e| e.total)
                .map_or(0.0, |wh| wh / 1000.0),
            temperature_c: switch.temperature.and_then(|t| t.t_c),
            online: data.online.unwrap_or(false),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn parse(body: Value) -> Result<PlugReading, DeviceError> {
        let resp: DeviceStatusResponse = serde_json::from_value(body).unwrap();
        PlugReading::try_from(resp.into_result()?)
    }

    #[test]
    fn full_payload_normalizes() {
        let reading = parse(json!({
            "isok": true,
            "data": {
                "online": true,
                "device_status": {
                    "switch:0": {
                        "output": true,
                        "apower": 48.2,
                        "voltage": 231.4,
                        "current": 0.21,
                        "aenergy": { "total": 12500.0 },
                        "temperature": { "tC": 41.3, "tF": 106.3 }
                    },
                    "sys": { "uptime": 1000 }
                }
            }
        }))
        .unwrap();

        assert!(reading.output_on);
        assert!(reading.online);
        assert_eq!(reading.power_watts, 48.2);
        assert_eq!(reading.voltage, 231.4);
        assert_eq!(reading.current_amps, 0.21);
        assert_eq!(reading.energy_kwh, 12.5);
        assert_eq!(reading.temperature_c, Some(41.3));
    }

    #[test]
    fn metering_fields_default_to_zero() {
        let reading = parse(json!({
            "isok": true,
            "data": { "device_status": { "switch:0": { "output": false } } }
        }))
        .unwrap();

        assert!(!reading.output_on);
        assert!(!reading.online);
        assert_eq!(reading.power_watts, 0.0);
        assert_eq!(reading.energy_kwh, 0.0);
        assert_eq!(reading.temperature_c, None);
    }

    #[test]
    fn missing_device_status_is_protocol_error() {
        let err = parse(json!({ "isok": true, "data": { "online": true } })).unwrap_err();
        assert!(matches!(err, DeviceError::Protocol(msg) if msg.contains("device_status")));
    }

    #[test]
    fn missing_switch_channel_is_protocol_error() {
        let err = parse(json!({
            "isok": true,
            "data": { "online": true, "device_status": { "relays": [{ "ison": true }] } }
        }))
        .unwrap_err();
        assert!(matches!(err, DeviceError::Protocol(msg) if msg.contains("switch:0")));
    }

    #[test]
    fn missing_output_is_not_read_as_off() {
        let err = parse(json!({
            "isok": true,
            "data": { "device_status": { "switch:0": { "apower": 0.0 } } }
        }))
        .unwrap_err();
        assert!(matches!(err, DeviceError::Protocol(msg) if msg.contains("output")));
    }

    #[test]
    fn isok_false_surfaces_first_error_from_list() {
        let err = parse(json!({ "isok": false, "errors": ["Device not found"] })).unwrap_err();
        assert_eq!(err, DeviceError::Protocol("Device not found".to_owned()));
    }

    #[test]
    fn isok_false_surfaces_error_object() {
        let err = parse(json!({
            "isok": false,
            "errors": { "max_req": "Request limit reached!" }
        }))
        .unwrap_err();
        assert_eq!(
            err,
            DeviceError::Protocol("max_req: Request limit reached!".to_owned())
        );
    }

    #[test]
    fn isok_false_without_errors_has_fallback_message() {
        let err = parse(json!({ "isok": false })).unwrap_err();
        assert!(matches!(err, DeviceError::Protocol(msg) if msg.contains("isok:false")));
    }

    #[test]
    fn control_ack_checks_envelope_only() {
        let ok: ControlResponse = serde_json::from_value(json!({ "isok": true })).unwrap();
        assert!(ok.into_ack().is_ok());

        let failed: ControlResponse =
            serde_json::from_value(json!({ "isok": false, "errors": ["offline"] })).unwrap();
        assert_eq!(
            failed.into_ack().unwrap_err(),
            DeviceError::Protocol("offline".to_owned())
        );
    }
}
