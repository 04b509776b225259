use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::JobType;
use crate::services::schedule::RepeatPlan;

const SCHEDULED_KEY: &str = "cronpost:scheduled";
const PENDING_KEY: &str = "cronpost:pending";
const REPEATING_KEY: &str = "cronpost:repeating";
const PROCESSING_KEY: &str = "cronpost:processing";
const DLQ_KEY: &str = "cronpost:dlq";

/// Handler invocations per dispatch before the queue gives up.
pub const MAX_DELIVERY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY_MS: i64 = 1_000;
const RETRY_FACTOR: i64 = 2;

/// How long a claimed dispatch may stay in flight before another consumer
/// may reclaim it. Must exceed the worst-case delivery (inner retries
/// included).
const LEASE_MS: i64 = 300_000;

/// Payload handed to the delivery worker for one dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchEntry {
    pub job_id: Uuid,
    pub target: String,
    pub job_type: JobType,
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub attempt: u32,
}

/// Durable registration for a repeating schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RepeatRegistration {
    plan: RepeatPlan,
    entry: DispatchEntry,
}

/// A claimed dispatch ready for delivery.
#[derive(Debug, Clone)]
pub struct ClaimedDispatch {
    pub key: String,
    pub entry: DispatchEntry,
}

/// What the queue decided after a failed dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Re-delivery scheduled after the given backoff.
    Retrying(Duration),
    /// Bounded retries are exhausted; no further re-delivery.
    Exhausted,
}

/// Redis-backed dispatch queue with delayed one-shots, repeating
/// registrations, lease-based at-least-once claims, and a dead-letter
/// hash that is never auto-consumed.
pub struct DispatchQueue {
    client: redis::Client,
}

impl DispatchQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self { client })
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    /// First occurrence of a repeat plan strictly after `from`.
    fn next_occurrence(plan: &RepeatPlan, from: DateTime<Utc>) -> Result<DateTime<Utc>, QueueError> {
        match plan {
            RepeatPlan::Cron(expression) => Schedule::from_str(expression)
                .map_err(|e| QueueError::InvalidPlan(e.to_string()))?
                .after(&from)
                .next()
                .ok_or_else(|| QueueError::InvalidPlan("cron schedule has no future occurrence".into())),
            RepeatPlan::Every(period) => {
                let period = chrono::Duration::from_std(*period)
                    .map_err(|e| QueueError::InvalidPlan(e.to_string()))?;
                from.checked_add_signed(period)
                    .ok_or_else(|| QueueError::InvalidPlan("period overflows the calendar".into()))
            }
        }
    }

    /// Deliver `entry` once, `delay` from now.
    pub async fn enqueue_delayed(
        &self,
        key: &str,
        entry: &DispatchEntry,
        delay: Duration,
    ) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        let payload = serde_json::to_string(entry).map_err(QueueError::Serialize)?;
        let due = Self::now_ms() + delay.as_millis() as i64;
        redis::pipe()
            .atomic()
            .hset(PENDING_KEY, key, &payload)
            .zadd(SCHEDULED_KEY, key, due)
            .query_async::<()>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Register `entry` to re-emit at every occurrence of `plan` until
    /// removed. The registration survives restarts.
    pub async fn enqueue_repeating(
        &self,
        key: &str,
        entry: &DispatchEntry,
        plan: RepeatPlan,
    ) -> Result<(), QueueError> {
        let first = Self::next_occurrence(&plan, Utc::now())?;
        let registration = RepeatRegistration {
            plan,
            entry: entry.clone(),
        };
        let payload = serde_json::to_string(&registration).map_err(QueueError::Serialize)?;
        let mut conn = self.conn().await?;
        redis::pipe()
            .atomic()
            .hset(REPEATING_KEY, key, &payload)
            .zadd(SCHEDULED_KEY, key, first.timestamp_millis())
            .query_async::<()>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Cancel any pending one-shot and any repeating registration for
    /// `key`. Idempotent.
    pub async fn remove(&self, key: &str) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        redis::pipe()
            .atomic()
            .zrem(SCHEDULED_KEY, key)
            .zrem(PROCESSING_KEY, key)
            .hdel(PENDING_KEY, key)
            .hdel(REPEATING_KEY, key)
            .query_async::<()>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Whether any scheduled entry or repeating registration exists for
    /// `key`.
    pub async fn contains(&self, key: &str) -> Result<bool, QueueError> {
        let mut conn = self.conn().await?;
        let scheduled: Option<f64> = conn
            .zscore(SCHEDULED_KEY, key)
            .await
            .map_err(QueueError::Redis)?;
        if scheduled.is_some() {
            return Ok(true);
        }
        conn.hexists(REPEATING_KEY, key)
            .await
            .map_err(QueueError::Redis)
    }

    /// Move dispatches whose lease expired back into the scheduled set.
    /// Returns how many were reclaimed.
    pub async fn reclaim_expired(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn().await?;
        let now = Self::now_ms();
        let expired: Vec<String> = conn
            .zrangebyscore(PROCESSING_KEY, "-inf", now)
            .await
            .map_err(QueueError::Redis)?;
        for key in &expired {
            redis::pipe()
                .atomic()
                .zrem(PROCESSING_KEY, key)
                .zadd(SCHEDULED_KEY, key, now)
                .query_async::<()>(&mut conn)
                .await
                .map_err(QueueError::Redis)?;
        }
        Ok(expired.len())
    }

    /// Claim up to `max` due dispatches. Ownership of each entry is
    /// decided by the ZREM on the scheduled set, so concurrent consumers
    /// never claim the same occurrence twice.
    pub async fn claim_due(&self, max: usize) -> Result<Vec<ClaimedDispatch>, QueueError> {
        if max == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        let now = Self::now_ms();
        let due: Vec<String> = conn
            .zrangebyscore_limit(SCHEDULED_KEY, "-inf", now, 0, max as isize)
            .await
            .map_err(QueueError::Redis)?;

        let mut claimed = Vec::new();
        for key in due {
            let removed: i64 = conn
                .zrem(SCHEDULED_KEY, &key)
                .await
                .map_err(QueueError::Redis)?;
            if removed == 0 {
                // Another consumer won the race.
                continue;
            }
            conn.zadd::<_, _, _, ()>(PROCESSING_KEY, &key, now + LEASE_MS)
                .await
                .map_err(QueueError::Redis)?;

            let entry = match self.load_entry(&mut conn, &key).await? {
                Some(entry) => entry,
                None => {
                    // Orphaned member with no payload; drop it.
                    conn.zrem::<_, _, i64>(PROCESSING_KEY, &key)
                        .await
                        .map_err(QueueError::Redis)?;
                    continue;
                }
            };
            claimed.push(ClaimedDispatch { key, entry });
        }
        Ok(claimed)
    }

    async fn load_entry(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        key: &str,
    ) -> Result<Option<DispatchEntry>, QueueError> {
        let pending: Option<String> = conn.hget(PENDING_KEY, key).await.map_err(QueueError::Redis)?;
        if let Some(json) = pending {
            return serde_json::from_str(&json)
                .map(Some)
                .map_err(QueueError::Serialize);
        }
        let repeating: Option<String> = conn
            .hget(REPEATING_KEY, key)
            .await
            .map_err(QueueError::Redis)?;
        match repeating {
            Some(json) => {
                let registration: RepeatRegistration =
                    serde_json::from_str(&json).map_err(QueueError::Serialize)?;
                let mut entry = registration.entry;
                entry.attempt = 0;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    /// Acknowledge a successful dispatch. A repeating registration is
    /// scored back in at its next occurrence.
    pub async fn ack_success(&self, key: &str) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        redis::pipe()
            .atomic()
            .zrem(PROCESSING_KEY, key)
            .hdel(PENDING_KEY, key)
            .query_async::<()>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        self.reschedule_repeating(&mut conn, key).await
    }

    /// Acknowledge a failed dispatch: schedule a backoff re-delivery while
    /// attempts remain, otherwise drop the entry (and let a repeating
    /// registration continue at its next occurrence). Terminal
    /// classification is the caller's concern, not the queue's.
    pub async fn ack_failure(
        &self,
        key: &str,
        entry: &DispatchEntry,
    ) -> Result<FailureDisposition, QueueError> {
        let mut conn = self.conn().await?;
        let next_attempt = entry.attempt + 1;
        if next_attempt < MAX_DELIVERY_ATTEMPTS {
            let retry = DispatchEntry {
                attempt: next_attempt,
                ..entry.clone()
            };
            let payload = serde_json::to_string(&retry).map_err(QueueError::Serialize)?;
            let delay_ms = RETRY_BASE_DELAY_MS * RETRY_FACTOR.pow(entry.attempt);
            redis::pipe()
                .atomic()
                .hset(PENDING_KEY, key, &payload)
                .zadd(SCHEDULED_KEY, key, Self::now_ms() + delay_ms)
                .zrem(PROCESSING_KEY, key)
                .query_async::<()>(&mut conn)
                .await
                .map_err(QueueError::Redis)?;
            return Ok(FailureDisposition::Retrying(Duration::from_millis(
                delay_ms as u64,
            )));
        }

        redis::pipe()
            .atomic()
            .zrem(PROCESSING_KEY, key)
            .hdel(PENDING_KEY, key)
            .query_async::<()>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        self.reschedule_repeating(&mut conn, key).await?;
        Ok(FailureDisposition::Exhausted)
    }

    async fn reschedule_repeating(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        key: &str,
    ) -> Result<(), QueueError> {
        let repeating: Option<String> = conn
            .hget(REPEATING_KEY, key)
            .await
            .map_err(QueueError::Redis)?;
        if let Some(json) = repeating {
            let registration: RepeatRegistration =
                serde_json::from_str(&json).map_err(QueueError::Serialize)?;
            let next = Self::next_occurrence(&registration.plan, Utc::now())?;
            conn.zadd::<_, _, _, ()>(SCHEDULED_KEY, key, next.timestamp_millis())
                .await
                .map_err(QueueError::Redis)?;
        }
        Ok(())
    }

    /// Place a dispatch into the dead-letter hash. Entries there are never
    /// auto-consumed; operators act on them through the coordinator.
    pub async fn enqueue_dlq(&self, key: &str, entry: &DispatchEntry) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        let payload = serde_json::to_string(entry).map_err(QueueError::Serialize)?;
        conn.hset::<_, _, _, ()>(DLQ_KEY, key, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Remove a dead-letter entry. Idempotent.
    pub async fn remove_dlq(&self, key: &str) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        conn.hdel::<_, _, ()>(DLQ_KEY, key)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Keys currently dead-lettered.
    pub async fn dlq_keys(&self) -> Result<Vec<String>, QueueError> {
        let mut conn = self.conn().await?;
        conn.hkeys(DLQ_KEY).await.map_err(QueueError::Redis)
    }

    /// Number of entries waiting in the scheduled set (for metrics).
    pub async fn scheduled_len(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn().await?;
        conn.zcard(SCHEDULED_KEY).await.map_err(QueueError::Redis)
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid repeat plan: {0}")]
    InvalidPlan(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(RETRY_BASE_DELAY_MS * RETRY_FACTOR.pow(0), 1_000);
        assert_eq!(RETRY_BASE_DELAY_MS * RETRY_FACTOR.pow(1), 2_000);
    }

    #[test]
    fn fixed_period_occurrence_advances_by_period() {
        let from = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let next = DispatchQueue::next_occurrence(
            &RepeatPlan::Every(Duration::from_secs(90)),
            from,
        )
        .unwrap();
        assert_eq!(next, from + chrono::Duration::seconds(90));
    }

    #[test]
    fn cron_occurrence_is_strictly_future() {
        let from = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let next =
            DispatchQueue::next_occurrence(&RepeatPlan::Cron("0 * * * * *".into()), from).unwrap();
        assert!(next > from);
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 6, 1, 0, 1, 0).unwrap());
    }

    #[test]
    fn entry_attempt_defaults_to_zero() {
        let entry: DispatchEntry = serde_json::from_str(
            r#"{"job_id":"7f0c0ed4-6ac3-4d3f-9a52-4f1f5a5f3b11","target":"http://x/y","job_type":"HTTP","payload":null}"#,
        )
        .unwrap();
        assert_eq!(entry.attempt, 0);
    }
}
