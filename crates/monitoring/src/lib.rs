//! Logging and metrics plumbing shared by the control plane and the build
//! worker.
//!
//! - `init_logging` wires tracing-subscriber with an env filter and an
//!   optional JSON formatter (selected with `LOG_FORMAT=json`).
//! - `metrics` registers the Prometheus counters the services update and
//!   serves them over a small axum exporter.

mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::{init_metrics, start_metrics_server};
