pub mod error;
pub mod models;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tokio::time;
use tracing::{debug, warn};

use crate::{
    config::ShellyConfig,
    db::models::{DeviceKind, SwitchAction},
    status::{DeviceState, TrackedDevice},
};

pub use self::error::DeviceError;
use self::models::{ControlResponse, DeviceStatusResponse, PlugReading};

/// Narrow seam over the plug vendor so the cache and scheduler can run
/// against a fake in tests.
#[async_trait]
pub trait DeviceApi: Send + Sync {
    /// Poll one plug. A returned state is always `verified` / `live`.
    async fn fetch_status(&self, device_id: &str) -> Result<DeviceState, DeviceError>;

    /// Flip one plug's relay.
    async fn switch_output(&self, device_id: &str, action: SwitchAction) -> Result<(), DeviceError>;
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// How often a rate-limited (HTTP 429) call is attempted, and the fixed
/// delay between attempts. Any other failure is never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    /// One retry after `delay`.
    pub const fn once_after(delay: Duration) -> Self {
        Self { max_attempts: 2, delay }
    }

    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::once_after(Duration::from_millis(1500))
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ShellyClient {
    http: Client,
    base_url: String,
    auth_key: String,
    status_timeout: Duration,
    control_timeout: Duration,
    retry: RetryPolicy,
}

impl ShellyClient {
    pub fn new(config: &ShellyConfig) -> Self {
        Self {
            http: Client::new(),
            base_url: config.server.trim_end_matches('/').to_owned(),
            auth_key: config.auth_key.clone(),
            status_timeout: config.status_timeout,
            control_timeout: config.control_timeout,
            retry: RetryPolicy::once_after(config.rate_limit_backoff),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Fetch and normalise the status of one plug.
    pub async fn fetch_one(&self, device_id: &str) -> Result<DeviceState, DeviceError> {
        debug!(device_id = %device_id, "Fetching plug status");

        let bytes = self
            .post_form(
                "/device/status",
                &[("id", device_id), ("auth_key", &self.auth_key)],
                self.status_timeout,
            )
            .await?;

        let data = serde_json::from_slice::<DeviceStatusResponse>(&bytes)
            .map_err(|e| DeviceError::protocol(format!("undecodable status body: {e}")))?
            .into_result()?;

        let reading = PlugReading::try_from(data)?;
        Ok(DeviceState::live(device_id, reading))
    }

    /// Switch relay channel 0 of one plug.
    pub async fn control(&self, device_id: &str, action: SwitchAction) -> Result<(), DeviceError> {
        debug!(device_id = %device_id, action = %action, "Sending relay command");

        let bytes = self
            .post_form(
                "/device/relay/control",
                &[
                    ("id", device_id),
                    ("auth_key", &self.auth_key),
                    ("channel", "0"),
                    ("turn", action.as_str()),
                ],
                self.control_timeout,
            )
            .await?;

        serde_json::from_slice::<ControlResponse>(&bytes)
            .map_err(|e| DeviceError::protocol(format!("undecodable control body: {e}")))?
            .into_ack()
    }

    /// Form-encoded POST honouring the retry policy for HTTP 429.
    async fn post_form(
        &self,
        path: &str,
        form: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<Vec<u8>, DeviceError> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 1;

        loop {
            let response = self
                .http
                .post(&url)
                .timeout(timeout)
                .form(form)
                .send()
                .await?;

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                if attempt < self.retry.max_attempts {
                    warn!(
                        path = %path,
                        attempt,
                        delay_ms = self.retry.delay.as_millis() as u64,
                        "Rate limited by Shelly cloud; backing off"
                    );
                    time::sleep(self.retry.delay).await;
                    attempt += 1;
                    continue;
                }
                return Err(DeviceError::RateLimited);
            }

            if !status.is_success() {
                return Err(DeviceError::Network(format!("unexpected HTTP status {status}")));
            }

            return Ok(response.bytes().await?.to_vec());
        }
    }
}

#[async_trait]
impl DeviceApi for ShellyClient {
    async fn fetch_status(&self, device_id: &str) -> Result<DeviceState, DeviceError> {
        self.fetch_one(device_id).await
    }

    async fn switch_output(&self, device_id: &str, action: SwitchAction) -> Result<(), DeviceError> {
        self.control(device_id, action).await
    }
}

/// Poll `devices` one after another with `pacing` between calls.
///
/// The vendor rate-limits per account, so polls are never fanned out. Each
/// device's outcome is independent of the others.
pub async fn fetch_all(
    api: &dyn DeviceApi,
    devices: &[TrackedDevice],
    pacing: Duration,
) -> Vec<(DeviceKind, Result<DeviceState, DeviceError>)> {
    let mut results = Vec::with_capacity(devices.len());

    for (i, device) in devices.iter().enumerate() {
        if i > 0 && !pacing.is_zero() {
            time::sleep(pacing).await;
        }

        let result = api.fetch_status(&device.id).await;
        if let Err(e) = &result {
            warn!(device = %device.kind, device_id = %device.id, error = %e, "Plug status poll failed");
        }
        results.push((device.kind, result));
    }

    results
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use axum::{http::StatusCode as AxumStatus, routing::post, Json, Router};
    use mockito::{Matcher, Server};
    use serde_json::json;

    use super::*;
    use crate::{status::Source, testing::FakeDeviceApi};

    fn config(server: &str) -> ShellyConfig {
        ShellyConfig {
            server: server.to_owned(),
            auth_key: "cloud-key".to_owned(),
            light_id: "light-plug".to_owned(),
            heater_id: "heater-plug".to_owned(),
            status_timeout: Duration::from_secs(5),
            control_timeout: Duration::from_secs(5),
            rate_limit_backoff: Duration::ZERO,
            pacing: Duration::ZERO,
        }
    }

    fn status_body(output: bool) -> String {
        json!({
            "isok": true,
            "data": {
                "online": true,
                "device_status": {
                    "switch:0": { "output": output, "apower": 35.0, "voltage": 230.0 }
                }
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn fetch_one_posts_form_and_normalizes() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/device/status")
            .match_header("content-type", "application/x-www-form-urlencoded")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("id".into(), "light-plug".into()),
                Matcher::UrlEncoded("auth_key".into(), "cloud-key".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(status_body(true))
            .create_async()
            .await;

        let client = ShellyClient::new(&config(&server.url()));
        let state = client.fetch_one("light-plug").await.unwrap();

        assert_eq!(state.device_id, "light-plug");
        assert_eq!(state.output_on, Some(true));
        assert_eq!(state.power_watts, 35.0);
        assert!(state.verified);
        assert_eq!(state.source, Source::Live);
        assert_eq!(state.age_seconds, Some(0));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn second_429_becomes_rate_limited() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/device/status")
            .with_status(429)
            .expect(2)
            .create_async()
            .await;

        let client = ShellyClient::new(&config(&server.url()));
        let err = client.fetch_one("light-plug").await.unwrap_err();

        assert_eq!(err, DeviceError::RateLimited);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn no_retry_policy_gives_up_after_first_429() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/device/status")
            .with_status(429)
            .expect(1)
            .create_async()
            .await;

        let client =
            ShellyClient::new(&config(&server.url())).with_retry_policy(RetryPolicy::no_retry());
        let err = client.fetch_one("light-plug").await.unwrap_err();

        assert_eq!(err, DeviceError::RateLimited);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn single_429_is_retried_once_then_succeeds() {
        // Answers 429 to the first call and a valid status afterwards.
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new().route(
            "/device/status",
            post({
                let hits = hits.clone();
                move || async move {
                    if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                        (AxumStatus::TOO_MANY_REQUESTS, Json(json!({})))
                    } else {
                        let body: serde_json::Value =
                            serde_json::from_str(&status_body(false)).unwrap();
                        (AxumStatus::OK, Json(body))
                    }
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let client = ShellyClient::new(&config(&format!("http://{addr}")));
        let state = client.fetch_one("heater-plug").await.unwrap();

        assert_eq!(state.output_on, Some(false));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn server_error_is_network_error_without_retry() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/device/status")
            .with_status(503)
            .expect(1)
            .create_async()
            .await;

        let client = ShellyClient::new(&config(&server.url()));
        let err = client.fetch_one("light-plug").await.unwrap_err();

        assert!(matches!(err, DeviceError::Network(msg) if msg.contains("503")));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn vendor_failure_flag_is_protocol_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/device/status")
            .with_status(200)
            .with_body(json!({ "isok": false, "errors": ["Device is offline"] }).to_string())
            .create_async()
            .await;

        let client = ShellyClient::new(&config(&server.url()));
        let err = client.fetch_one("light-plug").await.unwrap_err();

        assert_eq!(err, DeviceError::Protocol("Device is offline".to_owned()));
    }

    #[tokio::test]
    async fn garbage_body_is_protocol_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/device/status")
            .with_status(200)
            .with_body("<html>maintenance</html>")
            .create_async()
            .await;

        let client = ShellyClient::new(&config(&server.url()));
        let err = client.fetch_one("light-plug").await.unwrap_err();

        assert!(matches!(err, DeviceError::Protocol(_)));
    }

    #[tokio::test]
    async fn control_sends_channel_and_turn() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/device/relay/control")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("id".into(), "heater-plug".into()),
                Matcher::UrlEncoded("auth_key".into(), "cloud-key".into()),
                Matcher::UrlEncoded("channel".into(), "0".into()),
                Matcher::UrlEncoded("turn".into(), "off".into()),
            ]))
            .with_status(200)
            .with_body(json!({ "isok": true, "data": { "device_id": "heater-plug" } }).to_string())
            .create_async()
            .await;

        let client = ShellyClient::new(&config(&server.url()));
        client.control("heater-plug", SwitchAction::Off).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn control_isok_false_fails() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/device/relay/control")
            .with_status(200)
            .with_body(json!({ "isok": false, "errors": { "device": "offline" } }).to_string())
            .create_async()
            .await;

        let client = ShellyClient::new(&config(&server.url()));
        let err = client.control("light-plug", SwitchAction::On).await.unwrap_err();
        assert_eq!(err, DeviceError::Protocol("device: offline".to_owned()));
    }

    #[tokio::test]
    async fn fetch_all_polls_every_device_despite_failures() {
        let api = FakeDeviceApi::new();
        api.fail("light-plug", DeviceError::Timeout);

        let devices = crate::testing::tracked_devices();
        let results = fetch_all(&api, &devices, Duration::ZERO).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, DeviceKind::Light);
        assert_eq!(results[0].1, Err(DeviceError::Timeout));
        assert_eq!(results[1].0, DeviceKind::Heater);
        assert!(results[1].1.as_ref().unwrap().verified);
        assert_eq!(api.status_calls(), 2);
    }
}
