//! Subscription store (C1): read renewable subscriptions in cursor order, write back the
//! narrow post-renewal bulk update.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::models::{
    ChargingConfig, ChargingConfigurations, MerchantRef, PaymentChannel, PaymentChannelCode,
    PlanPricing, ProductPlan, ProductRef, Subscription, SubscriptionBulkUpdate,
    SubscriptionStatus,
};
use crate::{Currency, Error, Result};

#[async_trait]
pub trait SubscriptionStore: Send + Sync + 'static {
    /// Subscriptions due for renewal today, ordered strictly ascending by cursor, joined
    /// with everything a charge attempt needs. `cursor` excludes rows at or before it.
    async fn find_renewable(&self, limit: i64, cursor: Option<i64>) -> Result<Vec<Subscription>>;

    /// Apply every update in one atomic statement. All-or-nothing: a partial failure must
    /// not leave some subscriptions updated and others not.
    async fn bulk_update(&self, updates: &[SubscriptionBulkUpdate]) -> Result<()>;
}

#[derive(Clone)]
pub struct PostgresSubscriptionStore {
    pool: PgPool,
}

impl PostgresSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Flat row shape returned by the join query; `TryFrom` assembles the nested
/// [`Subscription`] the rest of the pipeline works with.
#[derive(Debug, FromRow)]
struct SubscriptionRow {
    id: i64,
    subscription_id: String,
    msisdn: String,
    status: SubscriptionStatus,
    auto_renew: bool,
    next_billing_at: DateTime<Utc>,
    last_payment_succeed_at: Option<DateTime<Utc>>,
    last_payment_failed_at: Option<DateTime<Utc>>,
    payment_channel_code: PaymentChannelCode,
    payment_channel_reference: Option<String>,
    charging_config: Option<Value>,
    billing_cycle_days: i32,
    base_amount: Decimal,
    currency: Currency,
    product_id: Uuid,
    product_name: String,
    merchant_id: Uuid,
    consent_id: Option<String>,
    merchant_transaction_id: Option<String>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = Error;

    fn try_from(row: SubscriptionRow) -> Result<Self> {
        let config = row
            .charging_config
            .map(serde_json::from_value::<ChargingConfig>)
            .transpose()
            .map_err(|e| Error::validation(format!("invalid charging_configurations.config: {e}")))?;

        Ok(Subscription {
            subscription_id: row.subscription_id,
            id: row.id,
            msisdn: row.msisdn,
            status: row.status,
            auto_renew: row.auto_renew,
            next_billing_at: row.next_billing_at,
            last_payment_succeed_at: row.last_payment_succeed_at,
            last_payment_failed_at: row.last_payment_failed_at,
            payment_channel: PaymentChannel {
                code: row.payment_channel_code,
            },
            payment_channel_reference: row.payment_channel_reference,
            charging_configurations: ChargingConfigurations { config },
            product_plan: ProductPlan {
                billing_cycle_days: row.billing_cycle_days,
            },
            plan_pricing: PlanPricing {
                base_amount: row.base_amount,
                currency: row.currency,
            },
            product: ProductRef {
                id: row.product_id,
                name: row.product_name,
            },
            merchant: MerchantRef { id: row.merchant_id },
            consent_id: row.consent_id,
            merchant_transaction_id: row.merchant_transaction_id,
        })
    }
}

#[async_trait]
impl SubscriptionStore for PostgresSubscriptionStore {
    async fn find_renewable(&self, limit: i64, cursor: Option<i64>) -> Result<Vec<Subscription>> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT
                s.id,
                s.subscription_id,
                s.msisdn,
                s.status,
                s.auto_renew,
                s.next_billing_at,
                s.last_payment_succeed_at,
                s.last_payment_failed_at,
                s.payment_channel_code,
                s.payment_channel_reference,
                s.charging_config,
                pp.billing_cycle_days,
                pr.base_amount,
                pr.currency,
                p.id AS product_id,
                p.name AS product_name,
                m.id AS merchant_id,
                s.consent_id,
                s.merchant_transaction_id
            FROM subscriptions s
            JOIN product_plans pp ON pp.id = s.product_plan_id
            JOIN plan_pricing pr ON pr.plan_id = pp.id
            JOIN products p ON p.id = s.product_id
            JOIN merchants m ON m.id = s.merchant_id
            WHERE s.auto_renew = true
              AND s.status IN ('ACTIVE', 'SUSPENDED_PAYMENT_FAILED')
              AND s.next_billing_at >= date_trunc('day', now() AT TIME ZONE 'UTC')
              AND s.next_billing_at < date_trunc('day', now() AT TIME ZONE 'UTC') + interval '1 day'
              AND ($2::bigint IS NULL OR s.id > $2)
            ORDER BY s.id ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .bind(cursor)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Subscription::try_from).collect()
    }

    async fn bulk_update(&self, updates: &[SubscriptionBulkUpdate]) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }

        let subscription_ids: Vec<&str> = updates.iter().map(|u| u.subscription_id.as_str()).collect();
        let successes: Vec<bool> = updates.iter().map(|u| u.success).collect();
        let next_billing_ats: Vec<DateTime<Utc>> = updates.iter().map(|u| u.next_billing_at).collect();

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        sqlx::query(
            r#"
            UPDATE subscriptions AS s SET
                status = CASE WHEN u.success THEN 'ACTIVE' ELSE 'SUSPENDED_PAYMENT_FAILED' END,
                last_payment_succeed_at = CASE WHEN u.success THEN now() ELSE NULL END,
                last_payment_failed_at = CASE WHEN u.success THEN NULL ELSE now() END,
                next_billing_at = u.next_billing_at
            FROM UNNEST($1::text[], $2::bool[], $3::timestamptz[])
                AS u(subscription_id, success, next_billing_at)
            WHERE s.subscription_id = u.subscription_id
            "#,
        )
        .bind(&subscription_ids)
        .bind(&successes)
        .bind(&next_billing_ats)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_charging_config_parses_from_json() {
        let value = serde_json::json!({
            "operator": "GP",
            "end_user_id": "8801XXXXXXXX",
        });
        let config: ChargingConfig = serde_json::from_value(value).unwrap();
        assert!(matches!(config, ChargingConfig::Gp(_)));
    }
}
