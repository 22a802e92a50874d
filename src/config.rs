use std::{fmt::Display, str::FromStr, time::Duration};

use chrono_tz::Tz;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A credential or endpoint the service cannot run without is absent.
    #[error("missing required env var: {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ShellyConfig {
    pub server: String,
    pub auth_key: String,
    pub light_id: String,
    pub heater_id: String,
    pub status_timeout: Duration,
    pub control_timeout: Duration,
    /// Wait before the single retry after an HTTP 429.
    pub rate_limit_backoff: Duration,
    /// Gap between consecutive device polls in one cycle.
    pub pacing: Duration,
}

#[derive(Debug, Clone)]
pub struct GoveeConfig {
    pub base_url: String,
    pub api_key: String,
    pub device_mac: String,
    pub sku: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub shelly: ShellyConfig,
    /// `None` when `GOVEE_API_KEY` or `GOVEE_MAC_ADDRESS` is unset; reading
    /// collection then reports missing sensor data.
    pub govee: Option<GoveeConfig>,
    /// Shared secret expected on external cron triggers.
    pub cron_secret: String,
    /// Zone the schedule's `HH:MM` strings are interpreted in.
    pub timezone: Tz,
    pub hot_ttl: Duration,
    pub stale_ceiling: Duration,
    pub schedule_cooldown: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        let shelly = ShellyConfig {
            server: vars.required("SHELLY_SERVER")?,
            auth_key: vars.required("SHELLY_CLOUD_KEY")?,
            light_id: vars.required("SHELLY_LIGHT_ID")?,
            heater_id: vars.required("SHELLY_HEATER_ID")?,
            status_timeout: vars.secs("STATUS_TIMEOUT_SECS", 10)?,
            control_timeout: vars.secs("CONTROL_TIMEOUT_SECS", 8)?,
            rate_limit_backoff: vars.millis("RATE_LIMIT_BACKOFF_MS", 1500)?,
            pacing: vars.millis("DEVICE_PACING_MS", 1200)?,
        };

        let govee = match (vars.get("GOVEE_API_KEY"), vars.get("GOVEE_MAC_ADDRESS")) {
            (Some(api_key), Some(device_mac)) => Some(GoveeConfig {
                base_url: vars.optional("GOVEE_BASE_URL", "https://openapi.api.govee.com"),
                api_key,
                device_mac,
                sku: vars.optional("GOVEE_SKU", "H5179"),
            }),
            _ => None,
        };

        Ok(Self {
            database_url: vars.required("DATABASE_URL")?,
            server_host: vars.optional("SERVER_HOST", "0.0.0.0"),
            server_port: vars.parsed("SERVER_PORT", 8080)?,
            shelly,
            govee,
            cron_secret: vars.required("CRON_SECRET")?,
            timezone: vars.parsed("SCHEDULE_TIMEZONE", chrono_tz::Europe::Vienna)?,
            hot_ttl: vars.secs("STATUS_HOT_TTL_SECS", 10)?,
            stale_ceiling: vars.secs("STATUS_STALE_CEILING_SECS", 300)?,
            schedule_cooldown: vars.secs("SCHEDULE_COOLDOWN_SECS", 120)?,
        })
    }
}

/// Typed accessors over a key lookup function.
struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Present and non-blank.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key).ok_or(ConfigError::Missing(key))
    }

    fn optional(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_owned())
    }

    fn parsed<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                reason: e.to_string(),
            }),
        }
    }

    fn secs(&self, key: &'static str, default: u64) -> Result<Duration, ConfigError> {
        self.parsed(key, default).map(Duration::from_secs)
    }

    fn millis(&self, key: &'static str, default: u64) -> Result<Duration, ConfigError> {
        self.parsed(key, default).map(Duration::from_millis)
    }
}
