//! Billing event store (C2): append-only audit trail, one row per charge attempt.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::models::BillingEvent;
use crate::{Error, Result};

#[async_trait]
pub trait BillingEventStore: Send + Sync + 'static {
    /// Insert every row in a single bulk statement. Duplicates aren't expected since
    /// `payment_reference_id` is a fresh uuid per attempt; a uniqueness violation fails the
    /// whole batch rather than silently dropping rows.
    async fn create_many(&self, rows: &[BillingEvent]) -> Result<()>;
}

#[derive(Clone)]
pub struct PostgresBillingEventStore {
    pool: PgPool,
}

impl PostgresBillingEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BillingEventStore for PostgresBillingEventStore {
    async fn create_many(&self, rows: &[BillingEvent]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO billing_events (
                    subscription_id, merchant_id, product_id, plan_id, payment_channel_id,
                    msisdn, payment_reference_id, event_type, status, amount, currency,
                    request_payload, response_payload, response_message, duration_ms, response_code
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
                "#,
            )
            .bind(&row.subscription_id)
            .bind(row.merchant_id)
            .bind(row.product_id)
            .bind(row.plan_id)
            .bind(row.payment_channel_id.to_string())
            .bind(&row.msisdn)
            .bind(row.payment_reference_id)
            .bind(&row.event_type)
            .bind(row.status)
            .bind(row.amount)
            .bind(row.currency)
            .bind(&row.request_payload)
            .bind(&row.response_payload)
            .bind(&row.response_message)
            .bind(row.duration_ms as i64)
            .bind(row.response_code.map(|c| c as i32))
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }
}
