use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::{
    db::models::{DeviceKind, EventSource, SwitchAction},
    events::EventRecorder,
    shelly::{DeviceApi, DeviceError},
    status::{AggregateStatus, StatusCache},
};

/// Result of a manual or scheduled relay switch.
#[derive(Debug, Clone)]
pub struct SwitchOutcome {
    pub target: DeviceKind,
    pub state: SwitchAction,
    /// Status read back after the switch; `None` when that read failed.
    pub status: Option<AggregateStatus>,
}

/// The one path through which relays are flipped, shared by manual toggles
/// and the scheduler.
#[derive(Clone)]
pub struct ControlService {
    api: Arc<dyn DeviceApi>,
    cache: StatusCache,
    recorder: EventRecorder,
}

impl ControlService {
    pub fn new(api: Arc<dyn DeviceApi>, cache: StatusCache, recorder: EventRecorder) -> Self {
        Self {
            api,
            cache,
            recorder,
        }
    }

    /// Send the relay command only.
    pub async fn actuate(&self, target: DeviceKind, action: SwitchAction) -> Result<(), DeviceError> {
        let device_id = self
            .cache
            .devices()
            .iter()
            .find(|d| d.kind == target)
            .map(|d| d.id.clone())
            .ok_or_else(|| DeviceError::protocol(format!("{target} is not a tracked device")))?;

        self.api.switch_output(&device_id, action).await?;
        info!(device = %target, device_id = %device_id, action = %action, "Relay switched");
        Ok(())
    }

    /// After a switch: drop the cached snapshot, read back every plug and
    /// record whatever changed. Failures are logged.
    pub async fn settle(&self, source: EventSource, context: &Value) -> Option<AggregateStatus> {
        self.cache.invalidate().await;

        let status = self.cache.refresh().await?;
        if !status.all_verified {
            warn!("Post-switch read is partial; transitions recorded for verified plugs only");
        }
        self.recorder
            .record_against_store(&status, source, context)
            .await;
        Some(status)
    }

    pub async fn switch(
        &self,
        target: DeviceKind,
        action: SwitchAction,
        source: EventSource,
    ) -> Result<SwitchOutcome, DeviceError> {
        self.actuate(target, action).await?;

        let context = serde_json::json!({ "trigger": "manual", "target": target });
        let status = self.settle(source, &context).await;

        Ok(SwitchOutcome {
            target,
            state: action,
            status,
        })
    }
}
