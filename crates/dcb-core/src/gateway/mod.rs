//! Gateway client (C3): the abstraction a renewal charge is placed through, plus the
//! idempotency-reserving decorator described in the ambient supplement.

pub mod gp;
pub mod idempotent;
pub mod robi;

pub use gp::GpGateway;
pub use idempotent::IdempotentGateway;
pub use robi::RobiGateway;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use uuid::Uuid;

use crate::models::{PaymentChannelCode, Subscription};
use crate::Currency;

/// Request handed to a gateway to attempt a single charge.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub payment_reference_id: Uuid,
    pub subscription: Subscription,
    pub amount: Decimal,
    pub currency: Currency,
}

#[derive(Debug, Clone)]
pub struct ChargeError {
    pub code: String,
    pub message: String,
}

/// Outcome of a charge attempt. Transport and application failures are both carried here
/// rather than surfaced as an `Err` — a gateway call never throws on a failed charge.
#[derive(Debug, Clone)]
pub struct ChargeResult {
    pub success: bool,
    pub http_status: u16,
    pub data: Option<Value>,
    pub error: Option<ChargeError>,
    pub request_payload: Value,
    pub response_payload: Value,
    pub duration_ms: u64,
}

impl ChargeResult {
    /// A transport-level failure: no response was ever received.
    pub fn transport_failure(request_payload: Value, message: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            http_status: 504,
            data: None,
            error: Some(ChargeError {
                code: "TRANSPORT_ERROR".to_string(),
                message: message.into(),
            }),
            request_payload,
            response_payload: Value::Null,
            duration_ms,
        }
    }
}

#[async_trait]
pub trait GatewayClient: Send + Sync {
    fn operator(&self) -> PaymentChannelCode;

    async fn charge(&self, req: &ChargeRequest) -> ChargeResult;
}

/// ISO-8601 duration mapping used by GP's `subscription_period` field, shared with any
/// other operator that needs the same `billing_cycle_days` translation.
pub fn billing_cycle_days_to_iso_period(billing_cycle_days: i32) -> &'static str {
    match billing_cycle_days {
        1 => "P1D",
        7 => "P1W",
        30 => "P1M",
        180 => "P6M",
        365 => "P1Y",
        _ => "P1D",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_billing_cycle_mapping() {
        assert_eq!(billing_cycle_days_to_iso_period(1), "P1D");
        assert_eq!(billing_cycle_days_to_iso_period(7), "P1W");
        assert_eq!(billing_cycle_days_to_iso_period(30), "P1M");
        assert_eq!(billing_cycle_days_to_iso_period(180), "P6M");
        assert_eq!(billing_cycle_days_to_iso_period(365), "P1Y");
        assert_eq!(billing_cycle_days_to_iso_period(14), "P1D");
    }
}
