//! Durable stores backing the renewal pipeline: the subscription table (C1) and the
//! append-only billing event audit trail (C2).

pub mod billing_event_store;
pub mod subscription_store;

pub use billing_event_store::{BillingEventStore, PostgresBillingEventStore};
pub use subscription_store::{PostgresSubscriptionStore, SubscriptionStore};

/// Create a PostgreSQL connection pool from a `postgres://` URL and the pool tuning knobs
/// validated at startup.
pub async fn create_pool(config: &crate::config::DatabaseConfig) -> crate::Result<sqlx::PgPool> {
    use sqlx::postgres::PgPoolOptions;

    PgPoolOptions::new()
        .max_connections(config.connection_limit)
        .acquire_timeout(config.pool_timeout)
        .connect(&config.url)
        .await
        .map_err(crate::Error::Database)
}
