//! End-to-end scenario tests for the renewal pipeline.
//!
//! The gateway tests run against a local wiremock server and need no external service.
//! Everything touching Redis follows the same pattern as `cache::connection`'s own unit
//! tests: attempt a real connection, and treat "Redis isn't running here" as a skip rather
//! than a failure.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use dcb_core::broker::{BrokerRetryPolicy, NotificationBroker};
use dcb_core::cache::{RedisConfig, RedisPool};
use dcb_core::gateway::{ChargeRequest, GatewayClient, GpGateway, IdempotentGateway, RobiGateway};
use dcb_core::ledger::{NotificationFallbackStore, ResultLedger};
use dcb_core::models::{
    BillingEvent, ChargingConfig, ChargingConfigurations, Currency, GpChargingConfig,
    MerchantRef, PaymentChannel, PaymentChannelCode, PlanPricing, ProductPlan, ProductRef,
    RenewalJob, RobiChargingConfig, Subscription, SubscriptionBulkUpdate, SubscriptionStatus,
};
use dcb_core::queue::worker_pool::JobHandler;
use dcb_core::store::{BillingEventStore, SubscriptionStore};
use dcb_core::{Dispatcher, EnqueueOptions, Error, JobQueue, Result};

fn gp_subscription(base_url_hint: &str) -> Subscription {
    Subscription {
        subscription_id: format!("sub-{base_url_hint}"),
        id: 1,
        msisdn: "8801700000000".to_string(),
        status: SubscriptionStatus::Active,
        auto_renew: true,
        next_billing_at: Utc::now(),
        last_payment_succeed_at: None,
        last_payment_failed_at: None,
        payment_channel: PaymentChannel { code: PaymentChannelCode::Gp },
        payment_channel_reference: None,
        charging_configurations: ChargingConfigurations {
            config: Some(ChargingConfig::Gp(GpChargingConfig { end_user_id: "end-user-1".to_string() })),
        },
        product_plan: ProductPlan { billing_cycle_days: 30 },
        plan_pricing: PlanPricing { base_amount: dec!(49.00), currency: Currency::BDT },
        product: ProductRef { id: Uuid::new_v4(), name: "DailyNews".to_string() },
        merchant: MerchantRef { id: Uuid::new_v4() },
        consent_id: None,
        merchant_transaction_id: Some("mti-1".to_string()),
    }
}

fn robi_subscription() -> Subscription {
    let mut sub = gp_subscription("robi");
    sub.payment_channel = PaymentChannel { code: PaymentChannelCode::Robi };
    sub.charging_configurations = ChargingConfigurations {
        config: Some(ChargingConfig::Robi(RobiChargingConfig {
            api_key: "key".to_string(),
            username: "user".to_string(),
            on_behalf_of: "merchant-1".to_string(),
            sub_unsub_url: "https://example.test/unsub".to_string(),
            contact_info: "support@example.test".to_string(),
        })),
    };
    sub
}

// ============================================================================
// GP gateway against a mocked charging endpoint
// ============================================================================

#[tokio::test]
async fn test_gp_gateway_successful_charge() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/partner/payment/v1/end-user-1/transactions/amount"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"message": "ok"})))
        .mount(&server)
        .await;

    let gateway = GpGateway::new(server.uri(), "user".to_string(), "pass".to_string(), Duration::from_secs(5));
    let subscription = gp_subscription("success");
    let request = ChargeRequest {
        payment_reference_id: Uuid::new_v4(),
        amount: subscription.plan_pricing.base_amount,
        currency: subscription.plan_pricing.currency,
        subscription,
    };

    let result = gateway.charge(&request).await;

    assert!(result.success);
    assert_eq!(result.http_status, 200);
    assert!(result.error.is_none());
}

#[tokio::test]
async fn test_gp_gateway_rejected_charge_carries_error_detail() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/partner/payment/v1/end-user-1/transactions/amount"))
        .respond_with(ResponseTemplate::new(402).set_body_json(serde_json::json!({
            "code": "INSUFFICIENT_BALANCE",
            "message": "subscriber balance too low"
        })))
        .mount(&server)
        .await;

    let gateway = GpGateway::new(server.uri(), "user".to_string(), "pass".to_string(), Duration::from_secs(5));
    let subscription = gp_subscription("rejected");
    let request = ChargeRequest {
        payment_reference_id: Uuid::new_v4(),
        amount: subscription.plan_pricing.base_amount,
        currency: subscription.plan_pricing.currency,
        subscription,
    };

    let result = gateway.charge(&request).await;

    assert!(!result.success);
    assert_eq!(result.http_status, 402);
    let error = result.error.expect("rejected charge carries error detail");
    assert_eq!(error.code, "INSUFFICIENT_BALANCE");
}

#[tokio::test]
async fn test_gp_gateway_unreachable_host_is_transport_failure() {
    let gateway = GpGateway::new(
        "http://127.0.0.1:1".to_string(),
        "user".to_string(),
        "pass".to_string(),
        Duration::from_millis(200),
    );
    let subscription = gp_subscription("unreachable");
    let request = ChargeRequest {
        payment_reference_id: Uuid::new_v4(),
        amount: subscription.plan_pricing.base_amount,
        currency: subscription.plan_pricing.currency,
        subscription,
    };

    let result = gateway.charge(&request).await;

    assert!(!result.success);
    assert_eq!(result.error.unwrap().code, "TRANSPORT_ERROR");
}

// ============================================================================
// ROBI gateway: success is read from the response body, not the HTTP status
// ============================================================================

#[tokio::test]
async fn test_robi_gateway_charged_status_is_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/renewSubscription"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "transactionOperationStatus": "Charged"
        })))
        .mount(&server)
        .await;

    let gateway = RobiGateway::new(server.uri(), Duration::from_secs(5));
    let subscription = robi_subscription();
    let request = ChargeRequest {
        payment_reference_id: Uuid::new_v4(),
        amount: subscription.plan_pricing.base_amount,
        currency: subscription.plan_pricing.currency,
        subscription,
    };

    let result = gateway.charge(&request).await;

    assert!(result.success);
}

#[tokio::test]
async fn test_robi_gateway_non_charged_status_is_failure_even_with_http_200() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/renewSubscription"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "transactionOperationStatus": "Failed",
            "message": "declined"
        })))
        .mount(&server)
        .await;

    let gateway = RobiGateway::new(server.uri(), Duration::from_secs(5));
    let subscription = robi_subscription();
    let request = ChargeRequest {
        payment_reference_id: Uuid::new_v4(),
        amount: subscription.plan_pricing.base_amount,
        currency: subscription.plan_pricing.currency,
        subscription,
    };

    let result = gateway.charge(&request).await;

    assert!(!result.success);
    assert_eq!(result.http_status, 200);
}

#[tokio::test]
async fn test_robi_gateway_without_charging_config_fails_fast() {
    let gateway = RobiGateway::new("http://127.0.0.1:1".to_string(), Duration::from_secs(5));
    let mut subscription = robi_subscription();
    subscription.charging_configurations = ChargingConfigurations { config: None };
    let request = ChargeRequest {
        payment_reference_id: Uuid::new_v4(),
        amount: subscription.plan_pricing.base_amount,
        currency: subscription.plan_pricing.currency,
        subscription,
    };

    let result = gateway.charge(&request).await;

    assert!(!result.success);
    assert_eq!(result.error.unwrap().code, "MISSING_CHARGING_CONFIG");
}

// ============================================================================
// Redis-backed scenarios. Skipped, not failed, when Redis isn't reachable.
// ============================================================================

async fn try_redis_pool() -> Option<RedisPool> {
    let mut config = RedisConfig::default();
    config.key_prefix = format!("dcb-test-{}", Uuid::new_v4());
    RedisPool::new(config).await.ok()
}

#[tokio::test]
async fn test_idempotent_gateway_rejects_replayed_reference() {
    struct AlwaysSucceeds;

    #[async_trait]
    impl GatewayClient for AlwaysSucceeds {
        fn operator(&self) -> PaymentChannelCode {
            PaymentChannelCode::Gp
        }

        async fn charge(&self, _req: &ChargeRequest) -> dcb_core::gateway::ChargeResult {
            dcb_core::gateway::ChargeResult {
                success: true,
                http_status: 200,
                data: None,
                error: None,
                request_payload: serde_json::json!({}),
                response_payload: serde_json::json!({}),
                duration_ms: 1,
            }
        }
    }

    let Some(pool) = try_redis_pool().await else {
        eprintln!("skipping: no Redis available");
        return;
    };

    let gateway = IdempotentGateway::new(AlwaysSucceeds, pool, "dcb-test", 60_000);
    let subscription = gp_subscription("idempotent");
    let request = ChargeRequest {
        payment_reference_id: Uuid::new_v4(),
        amount: subscription.plan_pricing.base_amount,
        currency: subscription.plan_pricing.currency,
        subscription,
    };

    let first = gateway.charge(&request).await;
    let second = gateway.charge(&request).await;

    assert!(first.success);
    assert!(!second.success);
    assert_eq!(second.error.unwrap().code, "DUPLICATE_ATTEMPT");
}

struct FakeSubscriptionStore {
    updates: tokio::sync::Mutex<Vec<SubscriptionBulkUpdate>>,
}

#[async_trait]
impl SubscriptionStore for FakeSubscriptionStore {
    async fn find_renewable(&self, _limit: i64, _cursor: Option<i64>) -> Result<Vec<Subscription>> {
        Ok(Vec::new())
    }

    async fn bulk_update(&self, updates: &[SubscriptionBulkUpdate]) -> Result<()> {
        self.updates.lock().await.extend_from_slice(updates);
        Ok(())
    }
}

struct FakeBillingEventStore {
    events: tokio::sync::Mutex<Vec<BillingEvent>>,
}

#[async_trait]
impl BillingEventStore for FakeBillingEventStore {
    async fn create_many(&self, rows: &[BillingEvent]) -> Result<()> {
        self.events.lock().await.extend_from_slice(rows);
        Ok(())
    }
}

#[tokio::test]
async fn test_result_consumer_drains_ledger_into_store_writes_and_fallback() {
    let Some(pool) = try_redis_pool().await else {
        eprintln!("skipping: no Redis available");
        return;
    };

    let ledger = Arc::new(ResultLedger::new(pool.clone()));
    let fallback = Arc::new(NotificationFallbackStore::new(pool.clone()));
    let subscription_store = Arc::new(FakeSubscriptionStore { updates: tokio::sync::Mutex::new(Vec::new()) });
    let billing_event_store = Arc::new(FakeBillingEventStore { events: tokio::sync::Mutex::new(Vec::new()) });

    // Never connected: publish always fails, so every notification lands in fallback.
    let broker = Arc::new(NotificationBroker::new(
        "amqp://127.0.0.1:1/%2f".to_string(),
        BrokerRetryPolicy { base_delay: Duration::from_millis(1), max_attempts: 1, retry_attempts: 0, retry_delay: Duration::ZERO },
    ));

    let outcome = dcb_core::models::ChargeOutcome {
        subscription_id: "sub-drain".to_string(),
        snapshot: gp_subscription("drain"),
        timestamp: Utc::now(),
        success: true,
        payment_reference_id: Uuid::new_v4(),
        http_status: 200,
        request_payload: serde_json::json!({}),
        response_payload: serde_json::json!({}),
        response_duration_ms: 10,
        error: None,
        message: None,
    };
    ledger.push_tail(&outcome).await.expect("push outcome onto ledger");

    let consumer = dcb_core::ResultConsumer::new(
        ledger.clone(),
        subscription_store.clone(),
        billing_event_store.clone(),
        broker,
        fallback.clone(),
    );

    consumer.drain_once().await.expect("drain should not fail even though the broker is unreachable");

    assert_eq!(subscription_store.updates.lock().await.len(), 1);
    assert_eq!(billing_event_store.events.lock().await.len(), 1);

    let parked = fallback.all().await.expect("read fallback store");
    assert_eq!(parked.len(), 1);
    assert_eq!(parked[0].payload.subscription_id, "sub-drain");

    // cleanup: delete the parked message so repeated local runs start from empty state
    fallback.delete(&parked[0].payload.id).await.ok();
}

#[tokio::test]
async fn test_job_queue_dedups_inflight_jobs() {
    let Some(pool) = try_redis_pool().await else {
        eprintln!("skipping: no Redis available");
        return;
    };

    let queue = dcb_core::JobQueue::new(pool, format!("test-{}", Uuid::new_v4()));
    let job = dcb_core::models::RenewalJob {
        subscription_id: "sub-dedup".to_string(),
        snapshot: gp_subscription("dedup"),
    };
    let opts = dcb_core::EnqueueOptions {
        delay_ms: -1_000,
        job_id: "sub-dedup".to_string(),
        remove_on_complete: true,
        remove_on_fail: true,
    };

    queue.enqueue(&job, opts.clone()).await.expect("first enqueue succeeds");
    queue.enqueue(&job, opts.clone()).await.expect("second enqueue is a no-op, not an error");

    let claimed = queue.claim_due(10).await.expect("claim due jobs");
    assert_eq!(claimed.len(), 1);

    // A job claimed once moves into inflight, so a retried enqueue is rejected too.
    queue.enqueue(&job, opts.clone()).await.expect("enqueue while inflight is a no-op");

    queue.complete(&claimed[0].0, &opts, true).await.expect("release the claimed job");
}

// ============================================================================
// Dispatcher cursor persistence across a simulated restart
// ============================================================================

fn subscription_with_id(id: i64, label: &str) -> Subscription {
    let mut sub = gp_subscription(label);
    sub.id = id;
    sub.subscription_id = format!("sub-cursor-{id}");
    sub
}

/// Serves subscriptions in pages of two ordered by id, erring once the walk reaches
/// `fail_after_cursor` to simulate the process dying mid-walk.
struct PagedSubscriptionStore {
    rows: Vec<Subscription>,
    fail_after_cursor: Option<i64>,
}

#[async_trait]
impl SubscriptionStore for PagedSubscriptionStore {
    async fn find_renewable(&self, _limit: i64, cursor: Option<i64>) -> Result<Vec<Subscription>> {
        if self.fail_after_cursor == cursor {
            return Err(Error::Other("simulated crash mid-walk".to_string()));
        }

        let start = cursor.unwrap_or(0);
        Ok(self.rows.iter().filter(|s| s.id > start).take(2).cloned().collect())
    }

    async fn bulk_update(&self, _updates: &[SubscriptionBulkUpdate]) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_dispatcher_resumes_from_persisted_cursor_after_simulated_restart() {
    let Some(pool) = try_redis_pool().await else {
        eprintln!("skipping: no Redis available");
        return;
    };

    let rows = vec![
        subscription_with_id(1, "c1"),
        subscription_with_id(2, "c2"),
        subscription_with_id(3, "c3"),
        subscription_with_id(4, "c4"),
    ];

    let queue = Arc::new(JobQueue::new(pool.clone(), format!("dispatcher-test-{}", Uuid::new_v4())));
    let mut queues = HashMap::new();
    queues.insert(PaymentChannelCode::Gp, queue.clone());

    // First run: page 1 (ids 1, 2) dispatches fine, then the store errors as if the page-2
    // fetch crashed the process. The cursor left over from page 1 must survive in Redis.
    let store_before_crash = Arc::new(PagedSubscriptionStore { rows: rows.clone(), fail_after_cursor: Some(2) });
    let dispatcher_before_crash = Dispatcher::new(store_before_crash, queues.clone(), pool.clone());

    let first_run = dispatcher_before_crash.run_once().await;
    assert!(first_run.is_err(), "the simulated crash should surface as an error");

    assert!(queue.pending_due_at("sub-cursor-1").await.unwrap().is_some());
    assert!(queue.pending_due_at("sub-cursor-2").await.unwrap().is_some());
    assert!(queue.pending_due_at("sub-cursor-3").await.unwrap().is_none());

    // "Restart": a fresh Dispatcher over the same Redis-backed cursor key, this time the
    // store never fails, so the walk completes.
    let store_after_restart = Arc::new(PagedSubscriptionStore { rows, fail_after_cursor: None });
    let dispatcher_after_restart = Dispatcher::new(store_after_restart, queues, pool);

    dispatcher_after_restart.run_once().await.expect("resumed run completes");

    assert!(queue.pending_due_at("sub-cursor-3").await.unwrap().is_some());
    assert!(queue.pending_due_at("sub-cursor-4").await.unwrap().is_some());
}

// ============================================================================
// GP same-day re-queue: the worker pool must not undo the in-flight release and
// payload write that a requeue performs from inside `handle`.
// ============================================================================

struct AlwaysFails;

#[async_trait]
impl GatewayClient for AlwaysFails {
    fn operator(&self) -> PaymentChannelCode {
        PaymentChannelCode::Gp
    }

    async fn charge(&self, _req: &ChargeRequest) -> dcb_core::gateway::ChargeResult {
        dcb_core::gateway::ChargeResult {
            success: false,
            http_status: 402,
            data: None,
            error: Some(dcb_core::gateway::ChargeError {
                code: "INSUFFICIENT_BALANCE".to_string(),
                message: "subscriber balance too low".to_string(),
            }),
            request_payload: serde_json::json!({}),
            response_payload: serde_json::json!({}),
            duration_ms: 1,
        }
    }
}

#[tokio::test]
async fn test_gp_same_day_requeue_survives_worker_pool_cleanup() {
    let Some(pool) = try_redis_pool().await else {
        eprintln!("skipping: no Redis available");
        return;
    };

    let queue = Arc::new(JobQueue::new(pool.clone(), format!("requeue-test-{}", Uuid::new_v4())));
    let ledger = Arc::new(ResultLedger::new(pool.clone()));
    let worker = dcb_core::OperatorWorker::new(Arc::new(AlwaysFails), ledger, queue.clone());

    let job = RenewalJob { subscription_id: "sub-requeue".to_string(), snapshot: gp_subscription("requeue") };
    let opts = EnqueueOptions {
        delay_ms: 0,
        job_id: job.subscription_id.clone(),
        remove_on_complete: true,
        remove_on_fail: true,
    };

    queue.enqueue(&job, opts.clone()).await.expect("initial enqueue");
    let claimed = queue.claim_due(10).await.expect("claim the job, marking it in-flight");
    assert_eq!(claimed.len(), 1);

    // Mirrors what the worker pool does: hand the claimed job to the handler, then only
    // run its own cleanup if the handler reports the job as finished.
    let finished = worker.handle(&claimed[0].0, claimed[0].1.clone()).await;
    assert!(!finished, "a same-day re-queue must report the job as not finished");
    if finished {
        queue.complete(&claimed[0].0, &opts, true).await.expect("cleanup");
    }

    let due_at = queue
        .pending_due_at("sub-requeue")
        .await
        .expect("read pending score")
        .expect("same-day re-queue must leave a fresh pending entry");
    assert!(due_at > Utc::now().timestamp_millis(), "re-queued entry should be due in the future");
}
