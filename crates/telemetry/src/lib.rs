//! Observability for the Ethereum block ingestion service.

pub mod metrics;
pub mod logging;
pub mod audit;

pub use metrics::Metrics;
pub use logging::init_logging;
