//! Dispatcher (C7): once a day, walks every renewable subscription in cursor order and
//! enqueues a renewal job for it on the appropriate operator queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, TimeZone, Utc};
use chrono_tz::Asia::Dhaka;
use tracing::{error, info, warn};

use crate::cache::RedisPool;
use crate::models::{PaymentChannelCode, RenewalJob};
use crate::queue::{EnqueueOptions, JobQueue};
use crate::store::SubscriptionStore;
use crate::Result;

const FIND_RENEWABLE_BATCH: i64 = 10_000;
const PAGE_YIELD: Duration = Duration::from_millis(50);

/// Key under which the highest dispatched subscription id is persisted between runs, so a
/// crash mid-walk resumes from the last completed page instead of restarting at page 1.
const CURSOR_KEY: &str = "dcb:dispatcher:cursor";

pub struct Dispatcher<S: SubscriptionStore> {
    store: Arc<S>,
    queues: HashMap<PaymentChannelCode, Arc<JobQueue>>,
    redis: RedisPool,
}

impl<S: SubscriptionStore> Dispatcher<S> {
    pub fn new(store: Arc<S>, queues: HashMap<PaymentChannelCode, Arc<JobQueue>>, redis: RedisPool) -> Self {
        Self { store, queues, redis }
    }

    /// Highest dispatched id from a prior, possibly crashed, run. `None` means start from
    /// page 1, either because this is the first run ever or because the last run completed
    /// and cleared its cursor.
    async fn load_cursor(&self) -> Result<Option<i64>> {
        let mut conn = self.redis.get().await?;
        match conn.get(CURSOR_KEY).await? {
            Some(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                match text.parse::<i64>() {
                    Ok(cursor) => Ok(Some(cursor)),
                    Err(_) => {
                        warn!(value = %text, "dispatcher cursor unparsable, restarting from page 1");
                        Ok(None)
                    }
                }
            }
            None => Ok(None),
        }
    }

    async fn save_cursor(&self, cursor: i64) -> Result<()> {
        let mut conn = self.redis.get().await?;
        conn.set(CURSOR_KEY, cursor.to_string().as_bytes()).await?;
        Ok(())
    }

    async fn clear_cursor(&self) -> Result<()> {
        let mut conn = self.redis.get().await?;
        conn.del(CURSOR_KEY).await?;
        Ok(())
    }

    /// Spawn the daily 01:00 Asia/Dhaka run loop. The scheduler itself enforces the
    /// cron-name singleton: this loop sleeps until the next firing and never overlaps its
    /// own previous invocation because `run_once` is awaited to completion first.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let sleep_for = duration_until_next_run();
                info!(sleep_secs = sleep_for.as_secs(), "dispatcher sleeping until next run");
                tokio::time::sleep(sleep_for).await;

                if let Err(err) = self.run_once().await {
                    error!(error = %err, "dispatcher run failed");
                }
            }
        })
    }

    /// One full pass over every renewable subscription. The walk resumes from the cursor
    /// left by the previous run (crash or otherwise); on error the last page's cursor stays
    /// persisted so the next invocation resumes there rather than restarting from page 1.
    /// The cursor is only cleared once every page has been dispatched successfully.
    pub async fn run_once(&self) -> Result<()> {
        let mut cursor = self.load_cursor().await?;
        let mut enqueued = 0u64;

        loop {
            let page = self.store.find_renewable(FIND_RENEWABLE_BATCH, cursor).await?;
            if page.is_empty() {
                break;
            }

            for subscription in &page {
                let Some(queue) = self.queues.get(&subscription.payment_channel.code) else {
                    warn!(
                        subscription_id = %subscription.subscription_id,
                        operator = %subscription.payment_channel.code,
                        "unknown operator, skipping"
                    );
                    continue;
                };

                let now = Utc::now();
                let delay_ms = (subscription.next_billing_at - now).num_milliseconds().max(0);
                if subscription.next_billing_at < now {
                    warn!(subscription_id = %subscription.subscription_id, "subscription overdue at dispatch time");
                }

                let job = RenewalJob {
                    subscription_id: subscription.subscription_id.clone(),
                    snapshot: subscription.clone(),
                };
                let opts = EnqueueOptions {
                    delay_ms,
                    job_id: subscription.subscription_id.clone(),
                    remove_on_complete: true,
                    remove_on_fail: false,
                };

                queue.enqueue(&job, opts).await?;
                enqueued += 1;
            }

            cursor = page.last().map(|row| row.id);
            if let Some(cursor) = cursor {
                self.save_cursor(cursor).await?;
            }
            tokio::time::sleep(PAGE_YIELD).await;
        }

        self.clear_cursor().await?;
        info!(enqueued, "dispatcher run complete");
        Ok(())
    }
}

/// Seconds until the next 01:00 Asia/Dhaka, recomputed fresh each time the loop wakes so
/// DST-less timezone shifts (Dhaka has none, but the pattern generalizes) are handled by
/// `chrono-tz` rather than a fixed offset.
fn duration_until_next_run() -> Duration {
    let now_dhaka = Utc::now().with_timezone(&Dhaka);
    let mut next = Dhaka
        .with_ymd_and_hms(now_dhaka.year(), now_dhaka.month(), now_dhaka.day(), 1, 0, 0)
        .single()
        .expect("01:00 is never ambiguous in Asia/Dhaka");

    if next <= now_dhaka {
        next += chrono::Duration::days(1);
    }

    (next - now_dhaka).to_std().unwrap_or(Duration::from_secs(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_until_next_run_is_positive_and_bounded() {
        let sleep_for = duration_until_next_run();
        assert!(sleep_for.as_secs() > 0);
        assert!(sleep_for.as_secs() <= 24 * 3600);
    }
}
