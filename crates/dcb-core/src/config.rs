//! Environment-driven configuration, validated eagerly at startup.
//!
//! Every variable in this module corresponds to one row of the environment variable
//! table the renewal engine is specified against. There is no TOML file layer: this is
//! a single long-running worker process, not a multi-tenant app server, so configuration
//! comes entirely from the environment it was launched in, layered through `config::Config`
//! the same way the rest of the fleet assembles its settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cache::RedisConfig;
use crate::error::{Error, Result, ValidationErrors};

/// Top level configuration, assembled once at process start.
#[derive(Debug, Clone)]
pub struct Config {
    pub node_env: NodeEnv,
    pub port: u16,
    pub service_name: String,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub broker: BrokerConfig,
    pub gp: GpConfig,
    pub robi: RobiConfig,
    pub log_level: LogLevel,
}

impl Config {
    /// Load configuration from the process environment and validate it.
    ///
    /// Returns an error describing every invalid/missing field rather than failing on the
    /// first one, so a misconfigured deployment can be fixed in a single pass.
    pub fn from_env() -> Result<Self> {
        let raw = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .map_err(|err| Error::config(format!("failed to assemble environment source: {err}")))?;

        let mut errors = ValidationErrors::new();

        let node_env = env_parsed_or(&raw, "NODE_ENV", NodeEnv::Dev, &mut errors);
        let port = env_parsed_or(&raw, "PORT", 8080u16, &mut errors);
        let service_name = raw
            .get_string("SERVICE_NAME")
            .unwrap_or_else(|_| "dcb-renewal-engine".to_string());
        let log_level = env_parsed_or(&raw, "LOG_LEVEL", LogLevel::Info, &mut errors);

        let database = DatabaseConfig::from_env(&raw, &mut errors);
        let redis = redis_from_env(&raw, &mut errors);
        let broker = BrokerConfig::from_env(&raw, &mut errors);
        let gp = GpConfig::from_env(&raw, &mut errors);
        let robi = RobiConfig::from_env(&raw, &mut errors);

        if !errors.is_empty() {
            return Err(errors.into_error());
        }

        Ok(Self {
            node_env,
            port,
            service_name,
            database,
            redis,
            broker,
            gp,
            robi,
            log_level,
        })
    }
}

/// Runtime environment, validated against an explicit enum rather than a bare string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeEnv {
    Dev,
    Prod,
    Test,
    Staging,
}

impl std::str::FromStr for NodeEnv {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dev" | "development" => Ok(NodeEnv::Dev),
            "prod" | "production" => Ok(NodeEnv::Prod),
            "test" => Ok(NodeEnv::Test),
            "staging" => Ok(NodeEnv::Staging),
            other => Err(format!("unknown NODE_ENV `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown LOG_LEVEL `{other}`")),
        }
    }
}

impl LogLevel {
    /// `tracing_subscriber::EnvFilter` directive equivalent to this level.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// `DATABASE_URL` plus pool tuning knobs.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub connection_limit: u32,
    pub pool_timeout: Duration,
    pub connect_timeout: Duration,
}

impl DatabaseConfig {
    fn from_env(raw: &config::Config, errors: &mut ValidationErrors) -> Self {
        let url = match raw.get_string("DATABASE_URL") {
            Ok(v) if v.starts_with("postgres://") || v.starts_with("postgresql://") => v,
            Ok(v) => {
                errors.add("DATABASE_URL", format!("must start with postgres://, got `{v}`"));
                v
            }
            Err(_) => {
                errors.add("DATABASE_URL", "is required");
                String::new()
            }
        };

        let connection_limit = env_parsed_or(raw, "DB_CONNECTION_LIMIT", 10u32, errors);
        let pool_timeout_secs = env_parsed_or(raw, "DB_POOL_TIMEOUT", 30u64, errors);
        let connect_timeout_secs = env_parsed_or(raw, "DB_CONNECT_TIMEOUT", 10u64, errors);

        Self {
            url,
            connection_limit,
            pool_timeout: Duration::from_secs(pool_timeout_secs),
            connect_timeout: Duration::from_secs(connect_timeout_secs),
        }
    }
}

fn redis_from_env(raw: &config::Config, errors: &mut ValidationErrors) -> RedisConfig {
    let host = raw.get_string("REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = env_parsed_or(raw, "REDIS_PORT", 6379u16, errors);
    let password = raw.get_string("REDIS_PASSWORD").ok();
    let database = env_parsed_or(raw, "REDIS_DB", 0u8, errors);
    let key_prefix = raw.get_string("REDIS_KEY_PREFIX").unwrap_or_else(|_| "dcb".to_string());
    let cache_ttl_ms = env_parsed_or(raw, "CACHE_TTL_MS", 60_000u64, errors);

    RedisConfig {
        host,
        port,
        password,
        database,
        key_prefix,
        cache_ttl_ms,
        ..RedisConfig::default()
    }
}

/// AMQP broker connection details (`RMQ_*`).
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
}

impl BrokerConfig {
    fn from_env(raw: &config::Config, errors: &mut ValidationErrors) -> Self {
        Self {
            host: required_string(raw, "RMQ_HOST", errors),
            port: env_parsed_or(raw, "RMQ_PORT", 5672u16, errors),
            user: required_string(raw, "RMQ_USER", errors),
            pass: required_string(raw, "RMQ_PASS", errors),
        }
    }

    pub fn amqp_uri(&self) -> String {
        format!("amqp://{}:{}@{}:{}/%2f", self.user, self.pass, self.host, self.port)
    }
}

/// GP gateway connection details (`GP_*`). GP authenticates with HTTP basic auth.
#[derive(Debug, Clone)]
pub struct GpConfig {
    pub base_url: String,
    pub basic_auth_user: String,
    pub basic_auth_pass: String,
    pub timeout: Duration,
}

impl GpConfig {
    fn from_env(raw: &config::Config, errors: &mut ValidationErrors) -> Self {
        Self {
            base_url: required_string(raw, "GP_BASE_URL", errors),
            basic_auth_user: required_string(raw, "GP_BASIC_AUTH_USER", errors),
            basic_auth_pass: required_string(raw, "GP_BASIC_AUTH_PASS", errors),
            timeout: Duration::from_secs(env_parsed_or(raw, "GP_TIMEOUT", 5u64, errors)),
        }
    }
}

/// ROBI gateway connection details (`ROBI_*`). No basic auth; credentials travel in the body.
#[derive(Debug, Clone)]
pub struct RobiConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl RobiConfig {
    fn from_env(raw: &config::Config, errors: &mut ValidationErrors) -> Self {
        Self {
            base_url: required_string(raw, "ROBI_BASE_URL", errors),
            timeout: Duration::from_secs(env_parsed_or(raw, "ROBI_TIMEOUT", 5u64, errors)),
        }
    }
}

fn required_string(raw: &config::Config, key: &str, errors: &mut ValidationErrors) -> String {
    match raw.get_string(key) {
        Ok(v) if !v.is_empty() => v,
        _ => {
            errors.add(key, "is required");
            String::new()
        }
    }
}

fn env_parsed_or<T>(raw: &config::Config, key: &str, default: T, errors: &mut ValidationErrors) -> T
where
    T: std::str::FromStr,
{
    match raw.get_string(key) {
        Ok(v) => v.parse::<T>().unwrap_or_else(|_| {
            errors.add(key, format!("invalid value `{v}`"));
            default
        }),
        Err(_) => default,
    }
}

/// Convert a missing/invalid configuration directly into a fatal startup error, matching
/// the "Startup validation: bad env, unreachable stores -> process exits non-zero" policy.
pub fn load_or_exit() -> Config {
    match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("fatal: configuration invalid: {err}");
            std::process::exit(1);
        }
    }
}

impl From<ValidationErrors> for Error {
    fn from(errors: ValidationErrors) -> Self {
        errors.into_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clear_env() {
        for key in [
            "NODE_ENV", "PORT", "SERVICE_NAME", "DATABASE_URL", "DB_CONNECTION_LIMIT",
            "DB_POOL_TIMEOUT", "DB_CONNECT_TIMEOUT", "REDIS_HOST", "REDIS_PORT",
            "RMQ_HOST", "RMQ_PORT", "RMQ_USER", "RMQ_PASS", "GP_BASE_URL",
            "GP_BASIC_AUTH_USER", "GP_BASIC_AUTH_PASS", "GP_TIMEOUT", "ROBI_BASE_URL",
            "ROBI_TIMEOUT", "LOG_LEVEL",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_missing_required_vars_reports_all() {
        clear_env();
        let result = Config::from_env();
        assert!(result.is_err());
    }

    #[test]
    fn test_node_env_parsing() {
        assert_eq!("prod".parse::<NodeEnv>().unwrap(), NodeEnv::Prod);
        assert_eq!("PRODUCTION".parse::<NodeEnv>().unwrap(), NodeEnv::Prod);
        assert!("bogus".parse::<NodeEnv>().is_err());
    }

    #[test]
    fn test_broker_amqp_uri() {
        let broker = BrokerConfig {
            host: "mq.internal".to_string(),
            port: 5672,
            user: "svc".to_string(),
            pass: "pw".to_string(),
        };
        assert_eq!(broker.amqp_uri(), "amqp://svc:pw@mq.internal:5672/%2f");
    }
}
