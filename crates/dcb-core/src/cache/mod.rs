//! Redis connection layer backing the result ledger (C5), the notification fallback KV,
//! and the per-operator delayed job queues (C4).
//!
//! ## Characteristics
//!
//! - Connection pooling via `redis::aio::ConnectionManager`
//! - Automatic reconnection with bounded retries on transient failure
//! - Key prefixing to keep this service's keys isolated on a shared Redis instance

pub mod config;
pub mod connection;

pub use config::RedisConfig;
pub use connection::{RedisConnection, RedisPool};

/// Cache result type alias
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific error types
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Redis connection error: {0}")]
    ConnectionError(String),

    #[error("Operation failed: {0}")]
    OperationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Key not found: {0}")]
    NotFound(String),
}

impl From<CacheError> for crate::Error {
    fn from(err: CacheError) -> Self {
        crate::Error::Cache(err.to_string())
    }
}
