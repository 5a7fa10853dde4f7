// ── Redis sample store ──
//
// One sorted set per device at `<prefix><thingId>`: score is the unix
// timestamp, member is the JSON sample (which embeds the timestamp, so
// identical readings at different times stay distinct members).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use tracing::{debug, warn};

use super::store::SampleStore;
use crate::error::CoreError;
use crate::model::TelemetrySample;

pub struct RedisStore {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisStore {
    /// Connect and keep a self-healing connection for the store's lifetime.
    pub async fn connect(url: &str, key_prefix: impl Into<String>) -> Result<Self, CoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        debug!("connected to redis history store");
        Ok(Self {
            conn,
            key_prefix: key_prefix.into(),
        })
    }

    fn key(&self, thing_id: &str) -> String {
        format!("{}{thing_id}", self.key_prefix)
    }
}

#[async_trait]
impl SampleStore for RedisStore {
    async fn insert(&self, thing_id: &str, sample: &TelemetrySample) -> Result<(), CoreError> {
        let member = serde_json::to_string(sample).map_err(|e| CoreError::Store {
            message: format!("encode sample: {e}"),
        })?;

        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("ZADD")
            .arg(self.key(thing_id))
            .arg(sample.timestamp.timestamp())
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn range(
        &self,
        thing_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TelemetrySample>, CoreError> {
        let mut conn = self.conn.clone();
        let rows: Vec<(String, f64)> = redis::cmd("ZRANGEBYSCORE")
            .arg(self.key(thing_id))
            .arg(from.timestamp())
            .arg(to.timestamp())
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(member, score)| match decode_member(&member, score) {
                Ok(sample) => Some(sample),
                Err(e) => {
                    warn!(thing_id, error = %e, "skipping undecodable history entry");
                    None
                }
            })
            .collect())
    }

    async fn remove_older_than(
        &self,
        thing_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, CoreError> {
        let mut conn = self.conn.clone();
        // `(` makes the upper bound exclusive: strictly older than cutoff.
        let removed: u64 = redis::cmd("ZREMRANGEBYSCORE")
            .arg(self.key(thing_id))
            .arg("-inf")
            .arg(format!("({}", cutoff.timestamp()))
            .query_async(&mut conn)
            .await?;
        Ok(removed)
    }
}

/// Decode a stored member. Members written without a `timestamp` field
/// take it from the score.
#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
fn decode_member(member: &str, score: f64) -> Result<TelemetrySample, serde_json::Error> {
    let mut value: serde_json::Value = serde_json::from_str(member)?;
    if let Some(obj) = value.as_object_mut() {
        obj.entry("timestamp")
            .or_insert_with(|| serde_json::Value::from(score as i64));
    }
    serde_json::from_value(value)
}
