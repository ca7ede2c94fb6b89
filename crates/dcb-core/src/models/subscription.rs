//! Subscription domain model for the renewal pipeline.
//!
//! The subscription row itself is owned and mutated outside this crate; the store adapter
//! only ever reads it and writes back the narrow bulk update produced at the end of a
//! renewal attempt.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::Currency;

/// Subscription lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "subscription_status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Active,
    SuspendedPaymentFailed,
    Cancelled,
    Expired,
}

impl SubscriptionStatus {
    /// Statuses eligible for automatic renewal consideration.
    pub fn is_renewable(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::SuspendedPaymentFailed)
    }
}

/// Operator identifier carried on `payment_channel.code`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "payment_channel_code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentChannelCode {
    Gp,
    Robi,
    RobiMife,
}

impl PaymentChannelCode {
    /// Name of the queue this operator's renewal jobs are dispatched to.
    pub fn queue_name(&self) -> &'static str {
        match self {
            PaymentChannelCode::Gp => "renewal.gp",
            PaymentChannelCode::Robi | PaymentChannelCode::RobiMife => "renewal.robi",
        }
    }
}

impl std::fmt::Display for PaymentChannelCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentChannelCode::Gp => write!(f, "GP"),
            PaymentChannelCode::Robi => write!(f, "ROBI"),
            PaymentChannelCode::RobiMife => write!(f, "ROBI_MIFE"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentChannel {
    pub code: PaymentChannelCode,
}

/// Operator-specific charging configuration. Stored as an opaque record upstream; we only
/// need enough of it to decide whether a charge attempt has what it requires.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "operator", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargingConfig {
    Gp(GpChargingConfig),
    Robi(RobiChargingConfig),
    /// Present but not one of the known shapes; not an error by itself.
    Unknown(Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpChargingConfig {
    pub end_user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobiChargingConfig {
    pub api_key: String,
    pub username: String,
    pub on_behalf_of: String,
    pub sub_unsub_url: String,
    pub contact_info: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargingConfigurations {
    pub config: Option<ChargingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductPlan {
    pub billing_cycle_days: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanPricing {
    pub base_amount: Decimal,
    pub currency: Currency,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRef {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerchantRef {
    pub id: Uuid,
}

/// A subscription row as read from the store, joined with everything a renewal attempt
/// needs: plan pricing, charging configuration, operator, product and merchant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub subscription_id: String,
    /// Monotone cursor used for keyset pagination; never exposed outside the store.
    pub id: i64,
    pub msisdn: String,
    pub status: SubscriptionStatus,
    pub auto_renew: bool,
    pub next_billing_at: DateTime<Utc>,
    pub last_payment_succeed_at: Option<DateTime<Utc>>,
    pub last_payment_failed_at: Option<DateTime<Utc>>,
    pub payment_channel: PaymentChannel,
    pub payment_channel_reference: Option<String>,
    pub charging_configurations: ChargingConfigurations,
    pub product_plan: ProductPlan,
    pub plan_pricing: PlanPricing,
    pub product: ProductRef,
    pub merchant: MerchantRef,
    pub consent_id: Option<String>,
    pub merchant_transaction_id: Option<String>,
}

/// Renewal job payload dispatched onto a per-operator queue. `subscription_id` doubles as
/// the dedup key so at most one job per subscription is ever in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenewalJob {
    pub subscription_id: String,
    pub snapshot: Subscription,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeError {
    pub code: String,
    pub message: String,
}

/// Appended to the ledger by the operator worker after every charge attempt, successful
/// or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeOutcome {
    pub subscription_id: String,
    pub snapshot: Subscription,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub payment_reference_id: Uuid,
    pub http_status: u16,
    pub request_payload: Value,
    pub response_payload: Value,
    pub response_duration_ms: u64,
    pub error: Option<ChargeError>,
    pub message: Option<String>,
}

/// Narrow update applied by the consumer's bulk write. Nothing else about a subscription
/// row is ever mutated by this pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionBulkUpdate {
    pub subscription_id: String,
    pub success: bool,
    pub next_billing_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "billing_event_status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingEventStatus {
    Success,
    Failed,
}

/// Append-only billing audit row, one per charge outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingEvent {
    pub subscription_id: String,
    pub merchant_id: Uuid,
    pub product_id: Uuid,
    pub plan_id: Option<Uuid>,
    pub payment_channel_id: PaymentChannelCode,
    pub msisdn: String,
    pub payment_reference_id: Uuid,
    pub event_type: String,
    pub status: BillingEventStatus,
    pub amount: Decimal,
    pub currency: Currency,
    pub request_payload: Value,
    pub response_payload: Value,
    pub response_message: Option<String>,
    pub duration_ms: u64,
    pub response_code: Option<u16>,
}

impl BillingEvent {
    pub fn event_type_renewal() -> &'static str {
        "RENEWAL"
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEventType {
    #[serde(rename = "renew.success")]
    RenewSuccess,
    #[serde(rename = "renew.fail")]
    RenewFail,
}

/// Outbound notification, published to the broker or parked in the fallback KV when the
/// broker can't take it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub id: Uuid,
    pub source: String,
    pub subscription_id: String,
    pub merchant_transaction_id: Option<String>,
    pub keyword: String,
    pub msisdn: String,
    pub payment_provider: PaymentChannelCode,
    pub event_type: NotificationEventType,
    pub amount: Decimal,
    pub currency: Currency,
    pub billing_cycle_days: i32,
    pub metadata: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl NotificationPayload {
    pub const SOURCE: &'static str = "dcb-renewal-service";
}

/// A notification that could not be handed to the broker, parked under
/// `notification:fallback:<id>` until a retry succeeds or the retry cap is reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackMessage {
    #[serde(flatten)]
    pub payload: NotificationPayload,
    pub failed_at: DateTime<Utc>,
    pub retry_count: u32,
}

impl FallbackMessage {
    pub fn fallback_key(id: &Uuid) -> String {
        format!("notification:fallback:{id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renewable_statuses() {
        assert!(SubscriptionStatus::Active.is_renewable());
        assert!(SubscriptionStatus::SuspendedPaymentFailed.is_renewable());
        assert!(!SubscriptionStatus::Cancelled.is_renewable());
        assert!(!SubscriptionStatus::Expired.is_renewable());
    }

    #[test]
    fn test_queue_name_by_operator() {
        assert_eq!(PaymentChannelCode::Gp.queue_name(), "renewal.gp");
        assert_eq!(PaymentChannelCode::Robi.queue_name(), "renewal.robi");
        assert_eq!(PaymentChannelCode::RobiMife.queue_name(), "renewal.robi");
    }

    #[test]
    fn test_charging_config_tagged_roundtrip() {
        let config = ChargingConfig::Robi(RobiChargingConfig {
            api_key: "k".to_string(),
            username: "u".to_string(),
            on_behalf_of: "merchant".to_string(),
            sub_unsub_url: "https://example.test/unsub".to_string(),
            contact_info: "support@example.test".to_string(),
        });
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["operator"], "ROBI");
    }

    #[test]
    fn test_fallback_key_format() {
        let id = Uuid::nil();
        assert_eq!(
            FallbackMessage::fallback_key(&id),
            "notification:fallback:00000000-0000-0000-0000-000000000000"
        );
    }
}
