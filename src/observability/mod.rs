//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Instrumentation layer produces:
//!     → logging.rs (structured log events, including recorded records)
//!     → metrics.rs (counters for published events and failures)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - Listener and filter failures surface here and nowhere else
//! - Counters only: aggregation belongs to whoever scrapes them

pub mod logging;
pub mod metrics;
