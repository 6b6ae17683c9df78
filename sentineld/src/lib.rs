pub mod alert;
pub mod anomaly;
pub mod api;
pub mod baseline;
pub mod binary_cache;
pub mod config;
pub mod correlation;
pub mod enforcement;
pub mod event_source;
pub mod grimoire;
pub mod hwtier;
pub mod metrics;
pub mod procmem;
pub mod sinks;

pub use alert::{Alert, AlertKind, AlertQueue};
pub use anomaly::AnomalyDetector;
pub use baseline::{BaselineKey, BaselineStore};
pub use config::Config;
pub use correlation::CorrelationEngine;
pub use grimoire::GrimoireEngine;
pub use metrics::Metrics;
