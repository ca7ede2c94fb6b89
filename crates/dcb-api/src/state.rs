use std::sync::Arc;
use std::time::Instant;

use dcb_core::broker::NotificationBroker;
use dcb_core::cache::RedisPool;
use sqlx::PgPool;

/// State shared by the health endpoint. The renewal pipeline itself owns no part of this;
/// it only needs read access to check whether each dependency is reachable.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub redis: RedisPool,
    pub broker: Arc<NotificationBroker>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(db: PgPool, redis: RedisPool, broker: Arc<NotificationBroker>) -> Self {
        Self {
            db,
            redis,
            broker,
            started_at: Instant::now(),
        }
    }
}
