//! Redis connection configuration for the result ledger, notification fallback KV,
//! and per-operator delayed job queues.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Redis connection configuration, assembled from `REDIS_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub database: u8,

    /// Prefixes every ledger/queue/fallback key (`REDIS_KEY_PREFIX`).
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Default TTL applied to idempotency keys, in milliseconds (`CACHE_TTL_MS`).
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,

    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    #[serde(default = "default_timeout")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            database: 0,
            key_prefix: default_key_prefix(),
            cache_ttl_ms: default_cache_ttl_ms(),
            pool_size: default_pool_size(),
            connect_timeout_ms: default_timeout(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

impl RedisConfig {
    /// Build the `redis://` connection URL from the discrete host/port/password/db fields.
    pub fn connection_url(&self) -> String {
        match &self.password {
            Some(pass) => format!(
                "redis://:{}@{}:{}/{}",
                pass, self.host, self.port, self.database
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.database),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    /// Namespace a bare key with the configured prefix.
    pub fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.key_prefix, suffix)
    }
}

fn default_key_prefix() -> String {
    "dcb".to_string()
}
fn default_cache_ttl_ms() -> u64 {
    60_000
}
fn default_pool_size() -> usize {
    20
}
fn default_timeout() -> u64 {
    5000
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_config_default() {
        let config = RedisConfig::default();
        assert_eq!(config.port, 6379);
        assert_eq!(config.pool_size, 20);
        assert_eq!(config.connect_timeout(), Duration::from_millis(5000));
    }

    #[test]
    fn test_connection_url_without_password() {
        let config = RedisConfig::default();
        assert_eq!(config.connection_url(), "redis://127.0.0.1:6379/0");
    }

    #[test]
    fn test_connection_url_with_password() {
        let config = RedisConfig {
            password: Some("secret".to_string()),
            ..RedisConfig::default()
        };
        assert_eq!(config.connection_url(), "redis://:secret@127.0.0.1:6379/0");
    }

    #[test]
    fn test_key_prefixing() {
        let config = RedisConfig::default();
        assert_eq!(config.key("renewal_status_report"), "dcb:renewal_status_report");
    }
}
