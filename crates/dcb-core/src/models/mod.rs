use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod subscription;

pub use subscription::*;

/// Cursor-paged query parameters shared by the store adapters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct PageRequest {
    pub limit: i64,
    pub cursor: Option<i64>,
}

impl PageRequest {
    pub fn new(limit: i64, cursor: Option<i64>) -> Self {
        Self { limit, cursor }
    }
}

/// Currency code carried alongside every amount in the pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "currency", rename_all = "UPPERCASE")]
pub enum Currency {
    BDT,
    USD,
}

impl Default for Currency {
    fn default() -> Self {
        Currency::BDT
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Currency::BDT => write!(f, "BDT"),
            Currency::USD => write!(f, "USD"),
        }
    }
}

impl std::str::FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BDT" => Ok(Currency::BDT),
            "USD" => Ok(Currency::USD),
            other => Err(format!("unknown currency: {other}")),
        }
    }
}

/// A timestamped marker, used by components that only need to say "this happened at".
pub fn now() -> DateTime<Utc> {
    Utc::now()
}
