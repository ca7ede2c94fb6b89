pub mod broker;
pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod models;
pub mod notification_retrier;
pub mod operator_worker;
pub mod queue;
pub mod result_consumer;
pub mod store;

pub use broker::{BrokerRetryPolicy, NotificationBroker};
pub use config::Config;
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use gateway::{ChargeRequest, ChargeResult, GatewayClient, GpGateway, IdempotentGateway, RobiGateway};
pub use ledger::{NotificationFallbackStore, ResultLedger};
pub use models::{Currency, PageRequest};
pub use notification_retrier::NotificationRetrier;
pub use operator_worker::OperatorWorker;
pub use queue::{worker_pool::JobHandler, EnqueueOptions, JobQueue, WorkerPool};
pub use result_consumer::ResultConsumer;
pub use store::{BillingEventStore, PostgresBillingEventStore, PostgresSubscriptionStore, SubscriptionStore};

/// Current version of the renewal engine core crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_available() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_error_creation() {
        let err = Error::validation("amount must be positive");
        assert_eq!(err.category(), "validation");
    }
}
