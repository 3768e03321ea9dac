//! Monitoring and observability
//!
//! Prometheus metrics for the stream pipeline and the HTTP exporter that
//! serves them.

pub mod metrics;
pub mod server;

pub use metrics::StreamMetrics;
pub use server::{encode_metrics, MetricsServer, MetricsServerConfig};
