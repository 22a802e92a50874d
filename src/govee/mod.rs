pub mod models;

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use uuid::Uuid;

use crate::config::GoveeConfig;

pub use self::models::EnvironmentSample;
use self::models::{StateRequest, StateRequestPayload, StateResponse};

/// Outbound calls to the sensor cloud give up after this long.
const SENSOR_TIMEOUT: Duration = Duration::from_secs(9);

/// Source of terrarium temperature and humidity.
#[async_trait]
pub trait EnvironmentSensor: Send + Sync {
    async fn sample(&self) -> Result<EnvironmentSample>;
}

#[derive(Debug, Clone)]
pub struct GoveeClient {
    http: Client,
    base_url: String,
    api_key: String,
    device_mac: String,
    sku: String,
}

impl GoveeClient {
    pub fn new(config: &GoveeConfig) -> Self {
        Self {
            http: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            api_key: config.api_key.clone(),
            device_mac: config.device_mac.clone(),
            sku: config.sku.clone(),
        }
    }

    /// Query the current sensor capabilities.
    pub async fn fetch_state(&self) -> Result<EnvironmentSample> {
        let url = format!("{}/router/api/v1/device/state", self.base_url);
        let body = StateRequest {
            request_id: Uuid::new_v4().to_string(),
            payload: StateRequestPayload {
                sku: &self.sku,
                device: &self.device_mac,
            },
        };
        debug!(sku = %self.sku, "Fetching environment sensor state");

        let bytes = self
            .http
            .post(&url)
            .timeout(SENSOR_TIMEOUT)
            .header("Govee-API-Key", &self.api_key)
            .json(&body)
            .send()
            .await
            .context("Govee state request failed")?
            .error_for_status()
            .context("Govee state endpoint returned error status")?
            .bytes()
            .await
            .context("Failed to read Govee state response body")?;

        let resp = serde_json::from_slice::<StateResponse>(&bytes)
            .context("Failed to deserialize Govee state response")?;

        let payload = resp.payload.ok_or_else(|| {
            anyhow!(
                "Govee response without payload (code {:?}: {})",
                resp.code,
                resp.msg.as_deref().unwrap_or("no message")
            )
        })?;

        Ok(EnvironmentSample::from(&payload))
    }
}

#[async_trait]
impl EnvironmentSensor for GoveeClient {
    async fn sample(&self) -> Result<EnvironmentSample> {
        self.fetch_state().await
    }
}
