//! Idempotency-reserving decorator around a [`GatewayClient`].
//!
//! Reserves `idempotency:<payment_reference_id>` before delegating to the inner client.
//! Since `payment_reference_id` is minted fresh per attempt by the operator worker, the
//! reservation mainly guards against a handler being invoked twice for the same delivery
//! (queue redelivery, process restart mid-job) rather than against genuine duplicate
//! charges across attempts.

use async_trait::async_trait;
use serde_json::json;

use super::{ChargeError, ChargeRequest, ChargeResult, GatewayClient};
use crate::cache::RedisPool;
use crate::models::PaymentChannelCode;

pub struct IdempotentGateway<G: GatewayClient> {
    inner: G,
    redis: RedisPool,
    key_prefix: String,
    ttl_ms: u64,
}

impl<G: GatewayClient> IdempotentGateway<G> {
    pub fn new(inner: G, redis: RedisPool, key_prefix: impl Into<String>, ttl_ms: u64) -> Self {
        Self {
            inner,
            redis,
            key_prefix: key_prefix.into(),
            ttl_ms,
        }
    }

    fn idempotency_key(&self, req: &ChargeRequest) -> String {
        format!("{}:idempotency:{}", self.key_prefix, req.payment_reference_id)
    }
}

#[async_trait]
impl<G: GatewayClient> GatewayClient for IdempotentGateway<G> {
    fn operator(&self) -> PaymentChannelCode {
        self.inner.operator()
    }

    async fn charge(&self, req: &ChargeRequest) -> ChargeResult {
        let key = self.idempotency_key(req);

        let mut conn = match self.redis.get().await {
            Ok(conn) => conn,
            Err(err) => {
                return ChargeResult::transport_failure(json!({}), format!("idempotency store unavailable: {err}"), 0);
            }
        };

        match conn.set_nx_px(&key, b"1", self.ttl_ms).await {
            Ok(true) => self.inner.charge(req).await,
            Ok(false) => ChargeResult {
                success: false,
                http_status: 409,
                data: None,
                error: Some(ChargeError {
                    code: "DUPLICATE_ATTEMPT".to_string(),
                    message: format!("payment_reference_id {} already attempted", req.payment_reference_id),
                }),
                request_payload: json!({}),
                response_payload: json!({}),
                duration_ms: 0,
            },
            Err(err) => ChargeResult::transport_failure(json!({}), format!("idempotency reservation failed: {err}"), 0),
        }
    }
}
