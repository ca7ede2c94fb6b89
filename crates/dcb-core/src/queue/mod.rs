//! Per-operator delayed job queue (C4): deduplicated by `job_id`, delivered to a bounded
//! pool of concurrent workers.

pub mod worker_pool;

pub use worker_pool::WorkerPool;

use chrono::Utc;

use crate::cache::RedisPool;
use crate::models::RenewalJob;
use crate::Result;

#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    pub delay_ms: i64,
    pub job_id: String,
    pub remove_on_complete: bool,
    pub remove_on_fail: bool,
}

impl EnqueueOptions {
    pub fn due_at(&self) -> i64 {
        Utc::now().timestamp_millis() + self.delay_ms
    }
}

/// A named, Redis-backed delayed queue. `pending` is a sorted set keyed by due time in
/// epoch milliseconds; `payload:<job_id>` holds the serialized job; `inflight` tracks
/// job ids currently claimed by a worker so a duplicate dispatch is rejected regardless of
/// whether the job is still waiting or already running.
#[derive(Clone)]
pub struct JobQueue {
    pool: RedisPool,
    name: String,
}

impl JobQueue {
    pub fn new(pool: RedisPool, name: impl Into<String>) -> Self {
        Self { pool, name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn pending_key(&self) -> String {
        format!("dcb:queue:{}:pending", self.name)
    }

    fn inflight_key(&self) -> String {
        format!("dcb:queue:{}:inflight", self.name)
    }

    fn payload_key(&self, job_id: &str) -> String {
        format!("dcb:queue:{}:payload:{}", self.name, job_id)
    }

    /// Enqueue a renewal job. A second enqueue for a `job_id` already pending or in
    /// flight is a no-op.
    pub async fn enqueue(&self, payload: &RenewalJob, opts: EnqueueOptions) -> Result<()> {
        let mut conn = self.pool.get().await?;

        if conn.sismember(&self.inflight_key(), &opts.job_id).await? {
            return Ok(());
        }

        let added = conn.zadd_nx(&self.pending_key(), &opts.job_id, opts.due_at() as f64).await?;
        if !added {
            return Ok(());
        }

        let data = serde_json::to_vec(payload)?;
        conn.set(&self.payload_key(&opts.job_id), &data).await?;
        Ok(())
    }

    /// Claim every job due at or before `now`, up to `limit`. Claimed jobs move from
    /// `pending` into `inflight` atomically from the caller's point of view (the member is
    /// removed from `pending` before its payload is handed back).
    pub async fn claim_due(&self, limit: isize) -> Result<Vec<(String, RenewalJob)>> {
        let mut conn = self.pool.get().await?;
        let now_ms = Utc::now().timestamp_millis() as f64;

        let job_ids = conn.zrangebyscore(&self.pending_key(), now_ms, limit).await?;
        let mut claimed = Vec::with_capacity(job_ids.len());

        for job_id in job_ids {
            let removed = conn.zrem(&self.pending_key(), &job_id).await?;
            if removed == 0 {
                continue;
            }

            match conn.get(&self.payload_key(&job_id)).await? {
                Some(data) => {
                    let payload: RenewalJob = serde_json::from_slice(&data)?;
                    conn.sadd(&self.inflight_key(), &job_id).await?;
                    claimed.push((job_id, payload));
                }
                None => {
                    tracing::warn!(job_id = %job_id, queue = %self.name, "claimed job had no stored payload");
                }
            }
        }

        Ok(claimed)
    }

    /// Release a job after the handler has run, per the dedup semantics requested at
    /// enqueue time.
    pub async fn complete(&self, job_id: &str, opts: &EnqueueOptions, succeeded: bool) -> Result<()> {
        let mut conn = self.pool.get().await?;
        conn.srem(&self.inflight_key(), job_id).await?;

        let remove = if succeeded { opts.remove_on_complete } else { opts.remove_on_fail };
        if remove {
            conn.del(&self.payload_key(job_id)).await?;
        }
        Ok(())
    }

    /// Clear the in-flight marker for a job without touching `pending` or its payload. A
    /// handler that re-enqueues the same job id before returning must call this first, or
    /// the re-enqueue's dedup check in `enqueue` observes the still-set in-flight member
    /// and silently drops it.
    pub async fn release_inflight(&self, job_id: &str) -> Result<()> {
        let mut conn = self.pool.get().await?;
        conn.srem(&self.inflight_key(), job_id).await?;
        Ok(())
    }

    /// Due timestamp (epoch milliseconds) of a job still sitting in `pending`, if any.
    pub async fn pending_due_at(&self, job_id: &str) -> Result<Option<i64>> {
        let mut conn = self.pool.get().await?;
        Ok(conn.zscore(&self.pending_key(), job_id).await?.map(|score| score as i64))
    }
}
