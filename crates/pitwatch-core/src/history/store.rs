// ── Sample stores ──
//
// Per-device, time-ordered sample storage. Timestamps are whole seconds;
// range bounds are inclusive, pruning is strictly-older-than.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::CoreError;
use crate::model::TelemetrySample;

/// Time-series storage keyed by thing id.
#[async_trait]
pub trait SampleStore: Send + Sync {
    /// Append a sample. Samples sharing a timestamp are all kept.
    async fn insert(&self, thing_id: &str, sample: &TelemetrySample) -> Result<(), CoreError>;

    /// Samples with `from <= timestamp <= to`, oldest first.
    async fn range(
        &self,
        thing_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TelemetrySample>, CoreError>;

    /// Remove samples with `timestamp < cutoff`. Returns how many went.
    async fn remove_older_than(
        &self,
        thing_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, CoreError>;
}

// ── MemoryStore ──────────────────────────────────────────────────────

/// Process-local store. Lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    series: RwLock<HashMap<String, BTreeMap<i64, Vec<TelemetrySample>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SampleStore for MemoryStore {
    async fn insert(&self, thing_id: &str, sample: &TelemetrySample) -> Result<(), CoreError> {
        self.series
            .write()
            .await
            .entry(thing_id.to_owned())
            .or_default()
            .entry(sample.timestamp.timestamp())
            .or_default()
            .push(sample.clone());
        Ok(())
    }

    async fn range(
        &self,
        thing_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TelemetrySample>, CoreError> {
        let (from, to) = (from.timestamp(), to.timestamp());
        if from > to {
            return Ok(Vec::new());
        }

        let series = self.series.read().await;
        Ok(series
            .get(thing_id)
            .map(|points| {
                points
                    .range(from..=to)
                    .flat_map(|(_, samples)| samples.iter().cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn remove_older_than(
        &self,
        thing_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, CoreError> {
        let mut series = self.series.write().await;
        let Some(points) = series.get_mut(thing_id) else {
            return Ok(0);
        };

        let kept = points.split_off(&cutoff.timestamp());
        let removed = std::mem::replace(points, kept);
        let count: usize = removed.values().map(Vec::len).sum();
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }
}
