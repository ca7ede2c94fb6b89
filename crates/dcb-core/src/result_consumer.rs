//! Result consumer (C9): drains the ledger every 10 seconds and turns each charge outcome
//! into a subscription update, a billing event, and an outbound notification.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::broker::NotificationBroker;
use crate::ledger::{NotificationFallbackStore, ResultLedger};
use crate::models::{
    BillingEvent, BillingEventStatus, ChargeOutcome, FallbackMessage, NotificationEventType,
    NotificationPayload, SubscriptionBulkUpdate,
};
use crate::store::{BillingEventStore, SubscriptionStore};
use crate::Result;

const MAX_BATCH_SIZE: usize = 250;
const DRAIN_INTERVAL: Duration = Duration::from_secs(10);
const NOTIFY_FANOUT: usize = 10;

pub struct ResultConsumer<S: SubscriptionStore, B: BillingEventStore> {
    ledger: Arc<ResultLedger>,
    subscription_store: Arc<S>,
    billing_event_store: Arc<B>,
    broker: Arc<NotificationBroker>,
    fallback: Arc<NotificationFallbackStore>,
}

impl<S: SubscriptionStore, B: BillingEventStore> ResultConsumer<S, B> {
    pub fn new(
        ledger: Arc<ResultLedger>,
        subscription_store: Arc<S>,
        billing_event_store: Arc<B>,
        broker: Arc<NotificationBroker>,
        fallback: Arc<NotificationFallbackStore>,
    ) -> Self {
        Self {
            ledger,
            subscription_store,
            billing_event_store,
            broker,
            fallback,
        }
    }

    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(DRAIN_INTERVAL);
            loop {
                ticker.tick().await;
                if let Err(err) = self.drain_once().await {
                    error!(error = %err, "result consumer drain failed");
                }
            }
        })
    }

    async fn drain_once(&self) -> Result<()> {
        let outcomes = self.pop_batch().await?;
        if outcomes.is_empty() {
            return Ok(());
        }

        let mut updates = Vec::with_capacity(outcomes.len());
        let mut events = Vec::with_capacity(outcomes.len());
        let mut notifications = Vec::with_capacity(outcomes.len());

        for outcome in &outcomes {
            let next_billing_at =
                Utc::now() + chrono::Duration::seconds(outcome.snapshot.product_plan.billing_cycle_days as i64 * 86_400);

            updates.push(SubscriptionBulkUpdate {
                subscription_id: outcome.subscription_id.clone(),
                success: outcome.success,
                next_billing_at,
            });

            events.push(BillingEvent {
                subscription_id: outcome.subscription_id.clone(),
                merchant_id: outcome.snapshot.merchant.id,
                product_id: outcome.snapshot.product.id,
                plan_id: None,
                payment_channel_id: outcome.snapshot.payment_channel.code,
                msisdn: outcome.snapshot.msisdn.clone(),
                payment_reference_id: outcome.payment_reference_id,
                event_type: BillingEvent::event_type_renewal().to_string(),
                status: if outcome.success { BillingEventStatus::Success } else { BillingEventStatus::Failed },
                amount: outcome.snapshot.plan_pricing.base_amount,
                currency: outcome.snapshot.plan_pricing.currency,
                request_payload: outcome.request_payload.clone(),
                response_payload: outcome.response_payload.clone(),
                response_message: outcome.message.clone(),
                duration_ms: outcome.response_duration_ms,
                response_code: Some(outcome.http_status),
            });

            notifications.push(NotificationPayload {
                id: Uuid::new_v4(),
                source: NotificationPayload::SOURCE.to_string(),
                subscription_id: outcome.subscription_id.clone(),
                merchant_transaction_id: outcome.snapshot.merchant_transaction_id.clone(),
                keyword: outcome.snapshot.product.name.clone(),
                msisdn: outcome.snapshot.msisdn.clone(),
                payment_provider: outcome.snapshot.payment_channel.code,
                event_type: if outcome.success { NotificationEventType::RenewSuccess } else { NotificationEventType::RenewFail },
                amount: outcome.snapshot.plan_pricing.base_amount,
                currency: outcome.snapshot.plan_pricing.currency,
                billing_cycle_days: outcome.snapshot.product_plan.billing_cycle_days,
                metadata: None,
                timestamp: outcome.timestamp,
            });
        }

        if let Err(err) = self.subscription_store.bulk_update(&updates).await {
            self.requeue_on_failure(&outcomes, &err).await;
            return Err(err);
        }
        if let Err(err) = self.billing_event_store.create_many(&events).await {
            self.requeue_on_failure(&outcomes, &err).await;
            return Err(err);
        }
        self.send_batch(&notifications).await;

        info!(count = outcomes.len(), "result consumer drained batch");
        Ok(())
    }

    /// Downstream failure after outcomes already left the ledger: push them back to the
    /// tail rather than drop them. Tolerates duplicate processing on the next drain since
    /// the consumer's effects are idempotent on `payment_reference_id`.
    async fn requeue_on_failure(&self, outcomes: &[ChargeOutcome], err: &crate::Error) {
        warn!(count = outcomes.len(), error = %err, "drain failed downstream, pushing outcomes back to ledger");
        for outcome in outcomes {
            if let Err(push_err) = self.ledger.push_tail(outcome).await {
                error!(
                    subscription_id = %outcome.subscription_id,
                    error = %push_err,
                    "failed to push outcome back to ledger after drain failure, outcome lost"
                );
            }
        }
    }

    async fn pop_batch(&self) -> Result<Vec<ChargeOutcome>> {
        let mut outcomes = Vec::new();

        for _ in 0..MAX_BATCH_SIZE {
            let Some(data) = self.ledger.pop_head().await? else {
                break;
            };

            match serde_json::from_slice::<ChargeOutcome>(&data) {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => warn!(error = %err, "malformed ledger entry, skipping"),
            }
        }

        Ok(outcomes)
    }

    /// Fan out notifications with bounded concurrency. A publish that fails is parked in
    /// the fallback store for the retrier to pick up.
    async fn send_batch(&self, notifications: &[NotificationPayload]) {
        stream::iter(notifications.iter())
            .for_each_concurrent(NOTIFY_FANOUT, |payload| async move {
                if let Err(err) = self.broker.publish(payload).await {
                    warn!(notification_id = %payload.id, error = %err, "notification publish failed, parking in fallback");
                    let fallback = FallbackMessage {
                        payload: payload.clone(),
                        failed_at: Utc::now(),
                        retry_count: 0,
                    };
                    if let Err(err) = self.fallback.set(&fallback).await {
                        error!(notification_id = %payload.id, error = %err, "failed to park notification in fallback store");
                    }
                }
            })
            .await;
    }
}
