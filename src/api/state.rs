use std::sync::Arc;

use crate::{
    clock::Clock,
    config::Config,
    control::{ControlService, Scheduler, SchedulerSettings, TriggerSecret},
    db::{models::DeviceKind, Store},
    events::EventRecorder,
    govee::EnvironmentSensor,
    sensors::{HistoryService, SensorService},
    shelly::DeviceApi,
    status::{CacheSettings, StatusCache, TrackedDevice},
};

/// Everything the services need from configuration.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub devices: Vec<TrackedDevice>,
    pub cache: CacheSettings,
    pub scheduler: SchedulerSettings,
    pub trigger_secret: String,
}

impl From<&Config> for ServiceSettings {
    fn from(config: &Config) -> Self {
        Self {
            devices: vec![
                TrackedDevice {
                    kind: DeviceKind::Light,
                    id: config.shelly.light_id.clone(),
                },
                TrackedDevice {
                    kind: DeviceKind::Heater,
                    id: config.shelly.heater_id.clone(),
                },
            ],
            cache: CacheSettings::from(config),
            scheduler: SchedulerSettings::from(config),
            trigger_secret: config.cron_secret.clone(),
        }
    }
}

/// Shared handler state. Every field is a cheap clone over shared internals,
/// so all handlers see the same status cache.
#[derive(Clone)]
pub struct AppState {
    pub cache: StatusCache,
    pub control: ControlService,
    pub scheduler: Scheduler,
    pub sensors: SensorService,
    pub history: HistoryService,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        api: Arc<dyn DeviceApi>,
        sensor: Option<Arc<dyn EnvironmentSensor>>,
        clock: Arc<dyn Clock>,
        settings: ServiceSettings,
    ) -> Self {
        let cache = StatusCache::new(api.clone(), clock.clone(), settings.devices, settings.cache);
        let control = ControlService::new(api, cache.clone(), EventRecorder::new(store.clone()));
        let scheduler = Scheduler::new(
            store.clone(),
            cache.clone(),
            control.clone(),
            clock.clone(),
            TriggerSecret::new(&settings.trigger_secret),
            settings.scheduler,
        );
        let sensors = SensorService::new(sensor, cache.clone(), store.clone(), clock.clone());
        let history = HistoryService::new(store, clock);

        Self {
            cache,
            control,
            scheduler,
            sensors,
            history,
        }
    }
}
