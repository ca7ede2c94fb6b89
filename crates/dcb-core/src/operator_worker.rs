//! Operator worker (C8): consumes one delivered renewal job, places the charge, applies
//! the same-day re-queue policy on failure, and appends the outcome to the ledger.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{Datelike, TimeZone, Utc};
use chrono_tz::Asia::Dhaka;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::gateway::{ChargeRequest, GatewayClient};
use crate::ledger::ResultLedger;
use crate::models::{ChargeError as OutcomeError, ChargeOutcome, ChargingConfig, PaymentChannelCode, RenewalJob};
use crate::queue::worker_pool::JobHandler;
use crate::queue::{EnqueueOptions, JobQueue};

const SAME_DAY_RETRY_DELAY: Duration = Duration::from_secs(8 * 3600);

/// Operators that get the same-day, 8h re-queue on a failed charge. ROBI does not.
fn supports_same_day_requeue(operator: PaymentChannelCode) -> bool {
    matches!(operator, PaymentChannelCode::Gp)
}

pub struct OperatorWorker<G: GatewayClient> {
    gateway: Arc<G>,
    ledger: Arc<ResultLedger>,
    queue: Arc<JobQueue>,
}

impl<G: GatewayClient> OperatorWorker<G> {
    pub fn new(gateway: Arc<G>, ledger: Arc<ResultLedger>, queue: Arc<JobQueue>) -> Self {
        Self { gateway, ledger, queue }
    }

    /// Returns `true` once the job is fully finished and the queue's in-flight/payload
    /// bookkeeping for it may be cleaned up, `false` if a same-day re-queue replaced it with
    /// a fresh pending entry under the same job id that must be left untouched.
    async fn process(&self, job: RenewalJob) -> bool {
        let subscription = &job.snapshot;
        let payment_reference_id = Uuid::new_v4();

        if self.gateway.operator() == PaymentChannelCode::Robi
            && !matches!(subscription.charging_configurations.config, Some(ChargingConfig::Robi(_)))
        {
            warn!(
                subscription_id = %subscription.subscription_id,
                "ROBI charging configuration missing, deferring to next day's dispatch"
            );
            return true;
        }

        let amount = subscription.plan_pricing.base_amount;
        let currency = subscription.plan_pricing.currency;

        let request = ChargeRequest {
            payment_reference_id,
            subscription: subscription.clone(),
            amount,
            currency,
        };

        let started = Instant::now();
        let result = self.gateway.charge(&request).await;
        let response_duration_ms = started.elapsed().as_millis() as u64;

        let requeued = !result.success
            && supports_same_day_requeue(self.gateway.operator())
            && self.maybe_requeue_same_day(&job).await;

        let outcome = ChargeOutcome {
            subscription_id: subscription.subscription_id.clone(),
            snapshot: subscription.clone(),
            timestamp: Utc::now(),
            success: result.success,
            payment_reference_id,
            http_status: result.http_status,
            request_payload: result.request_payload,
            response_payload: result.response_payload,
            response_duration_ms,
            error: result.error.map(|e| OutcomeError { code: e.code, message: e.message }),
            message: result.data.map(|d| d.to_string()),
        };

        if let Err(err) = self.ledger.push_tail(&outcome).await {
            error!(
                subscription_id = %subscription.subscription_id,
                error = %err,
                "failed to append charge outcome to ledger"
            );
        }

        !requeued
    }

    /// §4.8 step 5: if the retry time still falls before next local midnight, re-queue for
    /// 8h out; otherwise leave it for tomorrow's dispatcher run. Returns `true` if a fresh
    /// pending entry was actually written.
    ///
    /// The job's id is still marked in-flight in the worker pool's queue at this point, so
    /// the in-flight marker is released first: `enqueue`'s dedup check would otherwise see
    /// the same id still claimed and silently drop the re-queue.
    async fn maybe_requeue_same_day(&self, job: &RenewalJob) -> bool {
        let now = Utc::now();
        let now_dhaka = now.with_timezone(&Dhaka);
        let retry_time = now + chrono::Duration::from_std(SAME_DAY_RETRY_DELAY).expect("fixed duration");

        let next_midnight = Dhaka
            .with_ymd_and_hms(now_dhaka.year(), now_dhaka.month(), now_dhaka.day(), 0, 0, 0)
            .single()
            .expect("midnight is never ambiguous in Asia/Dhaka")
            + chrono::Duration::days(1);

        if retry_time.with_timezone(&Dhaka) >= next_midnight {
            info!(
                subscription_id = %job.subscription_id,
                "retry window crosses local midnight, leaving for next day's dispatch"
            );
            return false;
        }

        if let Err(err) = self.queue.release_inflight(&job.subscription_id).await {
            error!(subscription_id = %job.subscription_id, error = %err, "failed to release in-flight marker before re-queue");
            return false;
        }

        let opts = EnqueueOptions {
            delay_ms: SAME_DAY_RETRY_DELAY.as_millis() as i64,
            job_id: job.subscription_id.clone(),
            remove_on_complete: true,
            remove_on_fail: true,
        };

        if let Err(err) = self.queue.enqueue(job, opts).await {
            error!(subscription_id = %job.subscription_id, error = %err, "same-day re-queue failed");
            return false;
        }

        true
    }
}

#[async_trait]
impl<G: GatewayClient> JobHandler for OperatorWorker<G> {
    async fn handle(&self, _job_id: &str, job: RenewalJob) -> bool {
        self.process(job).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_day_requeue_only_for_gp() {
        assert!(supports_same_day_requeue(PaymentChannelCode::Gp));
        assert!(!supports_same_day_requeue(PaymentChannelCode::Robi));
        assert!(!supports_same_day_requeue(PaymentChannelCode::RobiMife));
    }
}
