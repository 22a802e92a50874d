use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use super::{AggregateStatus, DeviceState, TrackedDevice};
use crate::{
    clock::Clock,
    config::Config,
    shelly::{fetch_all, DeviceApi},
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StatusError {
    /// No device answered live and nothing cached was young enough to stand in.
    #[error("plug status unavailable: no live data and no usable cache")]
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    /// Age below which a cached snapshot is served without any network call.
    pub hot_ttl: Duration,
    /// Age beyond which a cached per-device value may no longer stand in for
    /// a failed poll.
    pub stale_ceiling: Duration,
    /// Gap between device polls within one cycle.
    pub pacing: Duration,
}

impl From<&Config> for CacheSettings {
    fn from(config: &Config) -> Self {
        Self {
            hot_ttl: config.hot_ttl,
            stale_ceiling: config.stale_ceiling,
            pacing: config.shelly.pacing,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CacheStats {
    pub hot_hits: u64,
    pub live_polls: u64,
    pub promotions: u64,
    pub unavailable: u64,
    /// `None` when empty or invalidated.
    pub entry_age_secs: Option<u64>,
    pub hot_ttl_secs: u64,
    pub stale_ceiling_secs: u64,
}

/// Last fully verified snapshot. `captured_at` is cleared by
/// [`StatusCache::invalidate`].
#[derive(Debug, Clone)]
struct CacheEntry {
    status: AggregateStatus,
    captured_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    fn age_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.captured_at
            .map(|at| now.signed_duration_since(at).to_std().unwrap_or(Duration::ZERO))
    }
}

#[derive(Debug, Default)]
struct Counters {
    hot_hits: AtomicU64,
    live_polls: AtomicU64,
    promotions: AtomicU64,
    unavailable: AtomicU64,
}

/// Process-local, advisory cache of aggregate plug status.
///
/// Cheap to clone; all clones share one entry. The lock is never held across
/// a network call, so concurrent reads that both miss poll independently and
/// the last promotion wins.
#[derive(Clone)]
pub struct StatusCache {
    inner: Arc<Inner>,
}

struct Inner {
    api: Arc<dyn DeviceApi>,
    clock: Arc<dyn Clock>,
    devices: Vec<TrackedDevice>,
    settings: CacheSettings,
    entry: RwLock<Option<CacheEntry>>,
    counters: Counters,
}

impl StatusCache {
    pub fn new(
        api: Arc<dyn DeviceApi>,
        clock: Arc<dyn Clock>,
        devices: Vec<TrackedDevice>,
        settings: CacheSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                clock,
                devices,
                settings,
                entry: RwLock::new(None),
                counters: Counters::default(),
            }),
        }
    }

    pub fn devices(&self) -> &[TrackedDevice] {
        &self.inner.devices
    }

    /// Resolve the aggregate status, from the hot cache when allowed.
    ///
    /// A live read polls every device; a failed device falls back to the
    /// last verified snapshot while it is younger than the stale ceiling.
    /// Only fully verified results replace the snapshot.
    pub async fn read(&self, force_refresh: bool) -> Result<AggregateStatus, StatusError> {
        let settings = self.inner.settings;
        let now = self.inner.clock.now();
        let previous = self.inner.entry.read().await.clone();
        let previous_age = previous.as_ref().and_then(|e| e.age_at(now));

        if !force_refresh {
            if let (Some(entry), Some(age)) = (&previous, previous_age) {
                if age < settings.hot_ttl {
                    self.inner.counters.hot_hits.fetch_add(1, Ordering::Relaxed);
                    debug!(age_secs = age.as_secs(), "Status cache hit");
                    let mut status = entry.status.clone();
                    status.cached = true;
                    status.cache_age = age.as_secs();
                    return Ok(status);
                }
            }
        }

        debug!(force_refresh, "Status cache miss; polling devices");
        self.inner.counters.live_polls.fetch_add(1, Ordering::Relaxed);

        let fallback = match (&previous, previous_age) {
            (Some(entry), Some(age)) if age < settings.stale_ceiling => Some((&entry.status, age)),
            _ => None,
        };

        let results = fetch_all(self.inner.api.as_ref(), &self.inner.devices, settings.pacing).await;

        let mut devices = BTreeMap::new();
        let mut fallback_used = false;
        for ((kind, result), tracked) in results.into_iter().zip(&self.inner.devices) {
            let state = match result {
                Ok(state) => state,
                Err(reason) => {
                    match fallback.and_then(|(status, age)| status.device(kind).map(|d| (d, age))) {
                        Some((cached, age)) => {
                            fallback_used = true;
                            DeviceState::from_cache(cached, age.as_secs(), &reason)
                        }
                        None => DeviceState::unknown(&tracked.id, &reason),
                    }
                }
            };
            devices.insert(kind, state);
        }

        let cache_age = match fallback {
            Some((_, age)) if fallback_used => age.as_secs(),
            _ => 0,
        };
        let finished = self.inner.clock.now();
        let status = AggregateStatus::new(devices, fallback_used, cache_age, finished);

        if !status.any_verified && !fallback_used {
            self.inner.counters.unavailable.fetch_add(1, Ordering::Relaxed);
            warn!("No plug answered and no cached status is usable");
            return Err(StatusError::Unavailable);
        }

        if status.all_verified {
            *self.inner.entry.write().await = Some(CacheEntry {
                status: status.clone(),
                captured_at: Some(finished),
            });
            self.inner.counters.promotions.fetch_add(1, Ordering::Relaxed);
            debug!("Fully verified status promoted into cache");
        } else {
            info!(
                any_verified = status.any_verified,
                fallback_used, "Partial status returned without caching"
            );
        }

        Ok(status)
    }

    /// Forced read whose failure is logged rather than returned.
    pub async fn refresh(&self) -> Option<AggregateStatus> {
        match self.read(true).await {
            Ok(status) => Some(status),
            Err(e) => {
                warn!(error = %e, "Status refresh failed");
                None
            }
        }
    }

    /// Reset the capture timestamp so the next read polls the devices.
    ///
    /// Without a timestamp the old snapshot is also no longer eligible as a
    /// stale fallback.
    pub async fn invalidate(&self) {
        if let Some(entry) = self.inner.entry.write().await.as_mut() {
            entry.captured_at = None;
        }
        debug!("Status cache invalidated");
    }

    pub async fn stats(&self) -> CacheStats {
        let now = self.inner.clock.now();
        let entry_age_secs = self
            .inner
            .entry
            .read()
            .await
            .as_ref()
            .and_then(|e| e.age_at(now))
            .map(|age| age.as_secs());
        let counters = &self.inner.counters;

        CacheStats {
            hot_hits: counters.hot_hits.load(Ordering::Relaxed),
            live_polls: counters.live_polls.load(Ordering::Relaxed),
            promotions: counters.promotions.load(Ordering::Relaxed),
            unavailable: counters.unavailable.load(Ordering::Relaxed),
            entry_age_secs,
            hot_ttl_secs: self.inner.settings.hot_ttl.as_secs(),
            stale_ceiling_secs: self.inner.settings.stale_ceiling.as_secs(),
        }
    }
}
