//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Registry and terminator produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Metrics go through the `metrics` facade and are no-ops until an exporter is installed

pub mod logging;
pub mod metrics;
