// ── Telemetry history ──
//
// Samples the live state cache into a per-device time series and keeps
// the series bounded by a retention window.

mod redis_store;
mod store;

pub use redis_store::RedisStore;
pub use store::{MemoryStore, SampleStore};

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use futures_util::future::join_all;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::model::{Device, TelemetrySample};
use crate::registry::DeviceRegistry;
use crate::sync::StateSynchronizer;

pub struct TelemetryHistory {
    store: Arc<dyn SampleStore>,
    sync: Arc<StateSynchronizer>,
    retention: TimeDelta,
}

impl TelemetryHistory {
    pub fn new(
        store: Arc<dyn SampleStore>,
        sync: Arc<StateSynchronizer>,
        retention: Duration,
    ) -> Result<Self, CoreError> {
        let retention = TimeDelta::from_std(retention).map_err(|e| CoreError::Config {
            message: format!("retention window out of range: {e}"),
        })?;
        Ok(Self {
            store,
            sync,
            retention,
        })
    }

    /// Append a sample of the device's cached state, then prune past the
    /// retention window. A no-op when nothing is cached.
    pub async fn record_sample(
        &self,
        thing_id: &str,
    ) -> Result<Option<TelemetrySample>, CoreError> {
        self.record_sample_at(thing_id, Utc::now()).await
    }

    /// [`record_sample`](Self::record_sample) with an explicit clock.
    pub async fn record_sample_at(
        &self,
        thing_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<TelemetrySample>, CoreError> {
        let Some(state) = self.sync.get_state(thing_id).await else {
            return Ok(None);
        };

        let sample = TelemetrySample::from_state(&state, at.trunc_subsecs(0));
        self.store.insert(thing_id, &sample).await?;
        self.prune_older_than(thing_id, sample.timestamp - self.retention)
            .await?;
        Ok(Some(sample))
    }

    /// Samples in `[from, to]`, oldest first.
    pub async fn query_range(
        &self,
        thing_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TelemetrySample>, CoreError> {
        self.store.range(thing_id, from, to).await
    }

    /// The last `duration` of samples up to now.
    pub async fn recent(
        &self,
        thing_id: &str,
        duration: Duration,
    ) -> Result<Vec<TelemetrySample>, CoreError> {
        let now = Utc::now();
        let span = TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX);
        let from = now.checked_sub_signed(span).unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.query_range(thing_id, from, now).await
    }

    /// Drop samples strictly older than `cutoff`. Idempotent.
    pub async fn prune_older_than(
        &self,
        thing_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, CoreError> {
        let removed = self.store.remove_older_than(thing_id, cutoff).await?;
        if removed > 0 {
            debug!(thing_id, removed, "pruned history");
        }
        Ok(removed)
    }

    /// Sample every device once, concurrently. Each device gets at most
    /// `per_device` before it is skipped; failures are logged and do not
    /// affect the others. Returns how many samples were written.
    pub async fn sample_all(&self, devices: &[Device], per_device: Duration) -> usize {
        let at = Utc::now();
        let attempts = devices.iter().map(|device| async move {
            let thing_id = device.thing_id.as_str();
            match tokio::time::timeout(per_device, self.record_sample_at(thing_id, at)).await {
                Ok(Ok(sample)) => sample.is_some(),
                Ok(Err(e)) => {
                    warn!(thing_id, error = %e, "history sample failed");
                    false
                }
                Err(_) => {
                    warn!(thing_id, "history sample timed out");
                    false
                }
            }
        });

        join_all(attempts).await.into_iter().filter(|ok| *ok).count()
    }
}

// ── Sampler task ─────────────────────────────────────────────────────

/// Sample all registered devices once per `interval` until cancelled.
pub(crate) async fn sampler_task(
    history: Arc<TelemetryHistory>,
    registry: Arc<DeviceRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let devices = registry.snapshot();
                let written = history.sample_all(&devices, interval).await;
                debug!(devices = devices.len(), written, "history tick");
            }
        }
    }

    debug!("sampler exiting");
}

// ── Tests ────────────────────────────────────────────────────────────
