//! Result ledger and notification fallback store (C5): the durable handoff between the
//! operator workers and the result consumer, plus the parked-notification KV the
//! notification retrier sweeps.

use crate::cache::RedisPool;
use crate::models::{ChargeOutcome, FallbackMessage};
use crate::Result;

const LEDGER_KEY: &str = "renewal_status_report";

/// FIFO list of serialized [`ChargeOutcome`] rows. No TTL: entries live until popped.
pub struct ResultLedger {
    pool: RedisPool,
}

impl ResultLedger {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }

    pub async fn push_tail(&self, outcome: &ChargeOutcome) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let data = serde_json::to_vec(outcome)?;
        conn.push_tail(LEDGER_KEY, &data).await?;
        Ok(())
    }

    /// Pop a raw entry. Malformed JSON is the caller's problem to skip and log, not this
    /// layer's to swallow.
    pub async fn pop_head(&self) -> Result<Option<Vec<u8>>> {
        let mut conn = self.pool.get().await?;
        Ok(conn.pop_head(LEDGER_KEY).await?)
    }

    pub async fn len(&self) -> Result<i64> {
        let mut conn = self.pool.get().await?;
        Ok(conn.list_len(LEDGER_KEY).await?)
    }
}

/// Key-value store for notifications that couldn't be handed to the broker.
pub struct NotificationFallbackStore {
    pool: RedisPool,
}

impl NotificationFallbackStore {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }

    pub async fn set(&self, message: &FallbackMessage) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let key = FallbackMessage::fallback_key(&message.payload.id);
        let data = serde_json::to_vec(message)?;
        conn.set(&key, &data).await?;
        Ok(())
    }

    pub async fn delete(&self, id: &uuid::Uuid) -> Result<()> {
        let mut conn = self.pool.get().await?;
        conn.del(&FallbackMessage::fallback_key(id)).await?;
        Ok(())
    }

    /// All currently parked fallback messages, skipping entries that fail to parse rather
    /// than aborting the sweep.
    pub async fn all(&self) -> Result<Vec<FallbackMessage>> {
        let mut conn = self.pool.get().await?;
        let keys = conn.keys("notification:fallback:*").await?;

        let mut messages = Vec::with_capacity(keys.len());
        for key in keys {
            match conn.get(&key).await? {
                Some(data) => match serde_json::from_slice::<FallbackMessage>(&data) {
                    Ok(message) => messages.push(message),
                    Err(err) => tracing::warn!(key = %key, error = %err, "malformed fallback message, skipping"),
                },
                None => continue,
            }
        }
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_key_is_stable() {
        assert_eq!(LEDGER_KEY, "renewal_status_report");
    }
}
