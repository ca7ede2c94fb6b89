//! The error hierarchy shared by every adapter and component in the renewal pipeline.

use serde::{Deserialize, Serialize};

/// Main error type for the renewal engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("cache/ledger error: {0}")]
    Cache(String),

    #[error("notification broker error: {0}")]
    Broker(String),

    #[error("gateway error: {0}")]
    Gateway(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Result type alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, Error>;

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        Error::Network(error.to_string())
    }
}

impl From<uuid::Error> for Error {
    fn from(error: uuid::Error) -> Self {
        Error::Validation(format!("invalid uuid: {error}"))
    }
}

impl From<lapin::Error> for Error {
    fn from(error: lapin::Error) -> Self {
        Error::Broker(error.to_string())
    }
}

impl From<crate::cache::CacheError> for Error {
    fn from(error: crate::cache::CacheError) -> Self {
        Error::Cache(error.to_string())
    }
}

// Common error constructors, kept small and named after the call sites that use them.
impl Error {
    pub fn config<T: Into<String>>(msg: T) -> Self {
        Error::Config(msg.into())
    }

    pub fn validation<T: Into<String>>(msg: T) -> Self {
        Error::Validation(msg.into())
    }

    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn gateway<T: Into<String>>(msg: T) -> Self {
        Error::Gateway(msg.into())
    }

    pub fn broker<T: Into<String>>(msg: T) -> Self {
        Error::Broker(msg.into())
    }

    pub fn cache<T: Into<String>>(msg: T) -> Self {
        Error::Cache(msg.into())
    }

    pub fn timeout<T: Into<String>>(msg: T) -> Self {
        Error::Timeout(msg.into())
    }

    /// Category tag for structured logging, independent of the Display message.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Database(_) => "database",
            Error::Cache(_) => "cache",
            Error::Broker(_) => "broker",
            Error::Gateway(_) => "gateway",
            Error::Network(_) => "network",
            Error::Validation(_) => "validation",
            Error::NotFound(_) => "not_found",
            Error::Timeout(_) => "timeout",
            Error::Serialization(_) => "serialization",
            Error::Io(_) => "io",
            Error::Other(_) => "other",
        }
    }
}

/// Detailed field-level validation errors, used by the startup config validator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_error(self) -> Error {
        Error::Config(
            self.errors
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_and_category() {
        let err = Error::validation("amount must be positive");
        assert_eq!(err.category(), "validation");
        assert_eq!(err.to_string(), "validation error: amount must be positive");
    }

    #[test]
    fn test_validation_errors_into_error() {
        let mut errors = ValidationErrors::new();
        errors.add("DATABASE_URL", "must start with postgres://");
        assert!(!errors.is_empty());
        let err = errors.into_error();
        assert!(matches!(err, Error::Config(_)));
    }
}
