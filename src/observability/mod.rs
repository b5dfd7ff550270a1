//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Subscriptions, watcher, executors produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (text or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Rule name is the correlation key in logs and metric labels
//! - Recording metrics without an installed exporter is a no-op

pub mod logging;
pub mod metrics;
