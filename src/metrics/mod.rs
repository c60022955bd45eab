//! Metrics module for Prometheus-based monitoring.
//!
//! Exposes connection pool gauges and HTTP request counts for the admin
//! server's `/metrics` endpoint.
//!
//! # Example
//!
//! ```ignore
//! use work_webui::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//!
//! let collector = MetricsCollector::new();
//! collector.observe_pool(&pool.stats());
//!
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use self::collectors::MetricsCollector;
pub use self::prometheus::{export_metrics, init_metrics, metrics_handler, REGISTRY};
