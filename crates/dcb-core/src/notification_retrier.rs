//! Notification retrier (C10): every 5 minutes, sweeps the fallback KV and re-attempts
//! every parked notification, capped at a fixed number of retries.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::broker::NotificationBroker;
use crate::ledger::NotificationFallbackStore;
use crate::Result;

const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
const MAX_FALLBACK_RETRIES: u32 = 5;

pub struct NotificationRetrier {
    broker: Arc<NotificationBroker>,
    fallback: Arc<NotificationFallbackStore>,
}

impl NotificationRetrier {
    pub fn new(broker: Arc<NotificationBroker>, fallback: Arc<NotificationFallbackStore>) -> Self {
        Self { broker, fallback }
    }

    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                if let Err(err) = self.sweep_once().await {
                    error!(error = %err, "notification retrier sweep failed");
                }
            }
        })
    }

    async fn sweep_once(&self) -> Result<()> {
        if let Err(err) = self.broker.ensure_connected().await {
            info!(error = %err, "broker reconnect failed, skipping this sweep");
            return Ok(());
        }

        let messages = self.fallback.all().await?;
        if messages.is_empty() {
            return Ok(());
        }

        let mut retried = 0u32;
        let mut abandoned = 0u32;

        for mut message in messages {
            if message.retry_count >= MAX_FALLBACK_RETRIES {
                warn!(notification_id = %message.payload.id, "fallback message exceeded retry cap, dropping");
                self.fallback.delete(&message.payload.id).await?;
                abandoned += 1;
                continue;
            }

            match self.broker.publish(&message.payload).await {
                Ok(()) => {
                    self.fallback.delete(&message.payload.id).await?;
                    retried += 1;
                }
                Err(err) => {
                    warn!(notification_id = %message.payload.id, error = %err, "fallback retry failed, incrementing count");
                    message.retry_count += 1;
                    self.fallback.set(&message).await?;
                }
            }
        }

        info!(retried, abandoned, "notification retrier sweep complete");
        Ok(())
    }
}
