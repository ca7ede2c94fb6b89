//! GP (Grameenphone) gateway adapter. Success is a bare HTTP 200; everything else,
//! including a well-formed but non-200 response, is a failed charge.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{billing_cycle_days_to_iso_period, ChargeError, ChargeRequest, ChargeResult, GatewayClient};
use crate::models::{ChargingConfig, PaymentChannelCode};

const GAME_PRODUCTS: &[&str] = &["XPGames", "GameApex"];

pub struct GpGateway {
    base_url: String,
    basic_auth_user: String,
    basic_auth_pass: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl GpGateway {
    pub fn new(base_url: String, basic_auth_user: String, basic_auth_pass: String, timeout: Duration) -> Self {
        Self {
            base_url,
            basic_auth_user,
            basic_auth_pass,
            timeout,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Serialize)]
struct AmountTransaction {
    amount: Decimal,
    currency: String,
}

#[derive(Debug, Serialize)]
struct GpChargeBody {
    #[serde(rename = "amountTransaction")]
    amount_transaction: AmountTransaction,
    subscription_period: &'static str,
    channel: &'static str,
    description: String,
    reference_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "purchaseCategoryCode")]
    purchase_category_code: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
struct GpChargeResponse {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

#[async_trait]
impl GatewayClient for GpGateway {
    fn operator(&self) -> PaymentChannelCode {
        PaymentChannelCode::Gp
    }

    async fn charge(&self, req: &ChargeRequest) -> ChargeResult {
        let end_user_id = match &req.subscription.charging_configurations.config {
            Some(ChargingConfig::Gp(config)) => config.end_user_id.clone(),
            _ => req.subscription.msisdn.clone(),
        };

        let purchase_category_code = if GAME_PRODUCTS.contains(&req.subscription.product.name.as_str()) {
            Some("Game")
        } else {
            None
        };

        let body = GpChargeBody {
            amount_transaction: AmountTransaction {
                amount: req.amount,
                currency: req.currency.to_string(),
            },
            subscription_period: billing_cycle_days_to_iso_period(req.subscription.product_plan.billing_cycle_days),
            channel: "SelfWeb",
            description: format!("renewal for {}", req.subscription.subscription_id),
            reference_code: req.payment_reference_id.to_string(),
            purchase_category_code,
        };

        let request_payload = serde_json::to_value(&body).unwrap_or(json!({}));
        let url = format!("{}/partner/payment/v1/{}/transactions/amount", self.base_url, end_user_id);

        let started = Instant::now();
        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .basic_auth(&self.basic_auth_user, Some(&self.basic_auth_pass))
            .json(&body)
            .send()
            .await;

        let duration_ms = started.elapsed().as_millis() as u64;

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                return ChargeResult::transport_failure(request_payload, err.to_string(), duration_ms);
            }
        };

        let http_status = response.status().as_u16();
        let success = response.status().as_u16() == 200;
        let response_bytes = response.bytes().await.unwrap_or_default();
        let response_payload = serde_json::from_slice::<serde_json::Value>(&response_bytes)
            .unwrap_or(serde_json::Value::Null);

        let error = if success {
            None
        } else {
            let parsed: Option<GpChargeResponse> = serde_json::from_slice(&response_bytes).ok();
            Some(ChargeError {
                code: parsed.as_ref().and_then(|r| r.code.clone()).unwrap_or_else(|| http_status.to_string()),
                message: parsed
                    .and_then(|r| r.message)
                    .unwrap_or_else(|| "GP charge rejected".to_string()),
            })
        };

        ChargeResult {
            success,
            http_status,
            data: Some(response_payload.clone()),
            error,
            request_payload,
            response_payload,
            duration_ms,
        }
    }
}
