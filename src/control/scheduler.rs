//! Time-of-day light schedule, evaluated once per external trigger tick.
//!
//! There is no resident timer: an outside cron hits the trigger endpoint
//! about once a minute and each tick decides on its own whether the light
//! has to flip.
//!
//! Times match by exact `HH:MM` equality in the configured zone. A tick that
//! never lands inside the configured minute (the trigger was late, or skipped
//! that minute) does not actuate; the next switch happens at the following
//! configured time.
//!
//! The cooldown guard reads `last_action` before the pre-tick status poll and
//! is only stamped after the switch, so two ticks overlapping in the same
//! minute can both actuate. The relay command is idempotent, so the second
//! call only repeats the same position.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use super::service::ControlService;
use crate::{
    clock::Clock,
    config::Config,
    db::{
        models::{DeviceKind, EventSource, ScheduleConfig, ScheduleUpdate, SwitchAction},
        Store,
    },
    events::EventRecorder,
    status::StatusCache,
};

// ---------------------------------------------------------------------------
// Errors & outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid or missing trigger credential")]
    Unauthorized,

    #[error("invalid time {0:?}, expected HH:MM")]
    InvalidTime(String),

    #[error("relay control failed: {0}")]
    Control(#[from] crate::shelly::DeviceError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    /// No schedule saved, or saved but disabled.
    Disabled,
    /// Current local time matches neither configured time.
    Idle { current_time: String },
    /// Same action already applied within the cooldown window.
    CooledDown { action: SwitchAction, since_secs: u64 },
    Actuated { action: SwitchAction, current_time: String },
}

// ---------------------------------------------------------------------------
// Trigger secret
// ---------------------------------------------------------------------------

/// Shared secret expected from the external trigger.
///
/// Only the SHA-256 digest is kept and candidates are compared digest to
/// digest, so the comparison time says nothing about a matching prefix.
#[derive(Clone)]
pub struct TriggerSecret {
    digest: Vec<u8>,
}

impl TriggerSecret {
    pub fn new(secret: &str) -> Self {
        Self {
            digest: Sha256::digest(secret.as_bytes()).to_vec(),
        }
    }

    pub fn verify(&self, candidate: Option<&str>) -> bool {
        match candidate {
            Some(c) => Sha256::digest(c.as_bytes()).as_slice() == self.digest.as_slice(),
            None => false,
        }
    }
}

impl std::fmt::Debug for TriggerSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TriggerSecret(..)")
    }
}

// ---------------------------------------------------------------------------
// Time helpers
// ---------------------------------------------------------------------------

/// Validate `H:MM` / `HH:MM` (hours 0-23, minutes 00-59) and zero-pad the hour.
pub fn normalize_hhmm(raw: &str) -> Option<String> {
    let (hours, minutes) = raw.trim().split_once(':')?;
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());

    if !(1..=2).contains(&hours.len()) || minutes.len() != 2 {
        return None;
    }
    if !all_digits(hours) || !all_digits(minutes) {
        return None;
    }

    let h: u8 = hours.parse().ok()?;
    let m: u8 = minutes.parse().ok()?;
    (h <= 23 && m <= 59).then(|| format!("{h:02}:{m:02}"))
}

/// Zero-padded `HH:MM` wall-clock time of `now` in `tz`.
pub fn local_hhmm(now: DateTime<Utc>, tz: Tz) -> String {
    now.with_timezone(&tz).format("%H:%M").to_string()
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub timezone: Tz,
    pub cooldown: Duration,
    /// Plug the schedule drives.
    pub target: DeviceKind,
}

impl From<&Config> for SchedulerSettings {
    fn from(config: &Config) -> Self {
        Self {
            timezone: config.timezone,
            cooldown: config.schedule_cooldown,
            target: DeviceKind::Light,
        }
    }
}

#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn Store>,
    cache: StatusCache,
    control: ControlService,
    recorder: EventRecorder,
    clock: Arc<dyn Clock>,
    secret: TriggerSecret,
    settings: SchedulerSettings,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        cache: StatusCache,
        control: ControlService,
        clock: Arc<dyn Clock>,
        secret: TriggerSecret,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            recorder: EventRecorder::new(store.clone()),
            store,
            cache,
            control,
            clock,
            secret,
            settings,
        }
    }

    /// Check a trigger credential without doing anything else.
    pub fn authorize(&self, credential: Option<&str>) -> Result<(), SchedulerError> {
        if self.secret.verify(credential) {
            Ok(())
        } else {
            warn!("Rejected trigger with bad credential");
            Err(SchedulerError::Unauthorized)
        }
    }

    /// Saved schedule, or the default one when nothing has been saved yet.
    pub async fn schedule(&self) -> Result<ScheduleConfig, SchedulerError> {
        Ok(self.store.load_schedule().await?.unwrap_or_default())
    }

    /// Validate and store new schedule settings. Both times are stored
    /// zero-padded so they compare equal to [`local_hhmm`] output.
    pub async fn update_schedule(
        &self,
        enabled: bool,
        time_on: &str,
        time_off: &str,
    ) -> Result<ScheduleConfig, SchedulerError> {
        let normalize =
            |raw: &str| normalize_hhmm(raw).ok_or_else(|| SchedulerError::InvalidTime(raw.to_owned()));

        let update = ScheduleUpdate {
            enabled,
            time_on: normalize(time_on)?,
            time_off: normalize(time_off)?,
            updated_at: self.clock.now(),
        };

        let saved = self.store.save_schedule(&update).await?;
        info!(
            enabled = saved.enabled,
            time_on = %saved.time_on,
            time_off = %saved.time_off,
            "Light schedule saved"
        );
        Ok(saved)
    }

    /// Run one schedule evaluation.
    ///
    /// A failing relay command is returned to the caller and leaves the
    /// stored `last_action` untouched, so the next tick in the same minute
    /// tries again.
    pub async fn tick(&self, credential: Option<&str>) -> Result<TickOutcome, SchedulerError> {
        self.authorize(credential)?;

        let schedule = match self.store.load_schedule().await? {
            Some(s) if s.enabled => s,
            _ => {
                debug!("Light schedule disabled or not configured");
                return Ok(TickOutcome::Disabled);
            }
        };

        match self.cache.refresh().await {
            Some(status) => {
                let context = json!({ "trigger": "schedule_check" });
                self.recorder
                    .record_against_store(&status, EventSource::Automation, &context)
                    .await;
            }
            None => warn!("Pre-tick status read failed; continuing with schedule evaluation"),
        }

        let now = self.clock.now();
        let current_time = local_hhmm(now, self.settings.timezone);

        let action = if current_time == schedule.time_on {
            SwitchAction::On
        } else if current_time == schedule.time_off {
            SwitchAction::Off
        } else {
            debug!(current_time = %current_time, "No scheduled switch this minute");
            return Ok(TickOutcome::Idle { current_time });
        };

        if let (Some(last), Some(at)) = (schedule.last_action, schedule.last_action_at) {
            let since = now.signed_duration_since(at).to_std().unwrap_or(Duration::ZERO);
            if last == action && since < self.settings.cooldown {
                info!(action = %action, since_secs = since.as_secs(), "Scheduled switch already applied");
                return Ok(TickOutcome::CooledDown {
                    action,
                    since_secs: since.as_secs(),
                });
            }
        }

        self.control.actuate(self.settings.target, action).await?;
        info!(
            device = %self.settings.target,
            action = %action,
            current_time = %current_time,
            "Scheduled switch applied"
        );

        // The relay has moved; settle even if the stamp below cannot be saved.
        let stamped = self.store.record_schedule_action(action, now).await;
        let context = json!({ "trigger": "schedule", "time": current_time });
        self.control.settle(EventSource::Automation, &context).await;
        stamped?;

        Ok(TickOutcome::Actuated {
            action,
            current_time,
        })
    }
}
