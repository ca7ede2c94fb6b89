//! ROBI gateway adapter. Success is judged by the response body, not the HTTP status: the
//! charge only counts if `transactionOperationStatus` reads `charged`, case-insensitively.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{ChargeError, ChargeRequest, ChargeResult, GatewayClient};
use crate::models::{ChargingConfig, PaymentChannelCode};

pub struct RobiGateway {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl RobiGateway {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        Self {
            base_url,
            timeout,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Serialize)]
struct RobiChargeBody {
    #[serde(rename = "apiKey")]
    api_key: String,
    username: String,
    #[serde(rename = "spTransID")]
    sp_trans_id: String,
    description: String,
    currency: &'static str,
    amount: Decimal,
    #[serde(rename = "onBehalfOf")]
    on_behalf_of: String,
    #[serde(rename = "purchaseCategoryCode")]
    purchase_category_code: &'static str,
    #[serde(rename = "referenceCode")]
    reference_code: String,
    channel: &'static str,
    #[serde(rename = "taxAmount")]
    tax_amount: Decimal,
    msisdn: String,
    operator: &'static str,
    #[serde(rename = "subscriptionID")]
    subscription_id: String,
    #[serde(rename = "unSubURL")]
    unsub_url: String,
    #[serde(rename = "contactInfo")]
    contact_info: String,
}

#[derive(Debug, Deserialize)]
struct RobiChargeResponse {
    #[serde(rename = "transactionOperationStatus", default)]
    transaction_operation_status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

#[async_trait]
impl GatewayClient for RobiGateway {
    fn operator(&self) -> PaymentChannelCode {
        PaymentChannelCode::Robi
    }

    async fn charge(&self, req: &ChargeRequest) -> ChargeResult {
        let config = match &req.subscription.charging_configurations.config {
            Some(ChargingConfig::Robi(config)) => config.clone(),
            _ => {
                return ChargeResult {
                    success: false,
                    http_status: 422,
                    data: None,
                    error: Some(ChargeError {
                        code: "MISSING_CHARGING_CONFIG".to_string(),
                        message: "ROBI charging configuration is required but absent".to_string(),
                    }),
                    request_payload: json!({}),
                    response_payload: json!({}),
                    duration_ms: 0,
                };
            }
        };

        let body = RobiChargeBody {
            api_key: config.api_key,
            username: config.username,
            sp_trans_id: req.payment_reference_id.to_string(),
            description: format!("renewal for {}", req.subscription.subscription_id),
            currency: "BDT",
            amount: req.amount,
            on_behalf_of: config.on_behalf_of,
            purchase_category_code: "Subscription",
            reference_code: req.payment_reference_id.to_string(),
            channel: "SelfWeb",
            tax_amount: Decimal::ZERO,
            msisdn: req.subscription.msisdn.clone(),
            operator: "ROBI",
            subscription_id: req.subscription.subscription_id.clone(),
            unsub_url: config.sub_unsub_url,
            contact_info: config.contact_info,
        };

        let request_payload = serde_json::to_value(&body).unwrap_or(json!({}));
        let url = format!("{}/api/renewSubscription", self.base_url);

        let started = Instant::now();
        let response = self.client.post(&url).timeout(self.timeout).json(&body).send().await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                return ChargeResult::transport_failure(request_payload, err.to_string(), duration_ms);
            }
        };

        let http_status = response.status().as_u16();
        let response_bytes = response.bytes().await.unwrap_or_default();
        let response_payload = serde_json::from_slice::<serde_json::Value>(&response_bytes)
            .unwrap_or(serde_json::Value::Null);
        let parsed: Option<RobiChargeResponse> = serde_json::from_slice(&response_bytes).ok();

        let success = parsed
            .as_ref()
            .and_then(|r| r.transaction_operation_status.as_deref())
            .map(|status| status.eq_ignore_ascii_case("charged"))
            .unwrap_or(false);

        let error = if success {
            None
        } else {
            Some(ChargeError {
                code: parsed.as_ref().and_then(|r| r.code.clone()).unwrap_or_else(|| http_status.to_string()),
                message: parsed
                    .and_then(|r| r.message)
                    .unwrap_or_else(|| "ROBI charge not confirmed".to_string()),
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
