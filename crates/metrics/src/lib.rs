//! Metrics and monitoring for the auto-gift service
//!
//! Tracks execution lifecycle, coordinator calls, retries and the periodic
//! drivers. Metrics live in the global prometheus registry; `gather()`
//! renders them in the text exposition format for whatever scrapes them.
//!
//! # Example
//!
//! ```no_run
//! use autogift_metrics::{init_tracing, MetricsCollector};
//!
//! init_tracing("info", false).unwrap();
//!
//! let collector = MetricsCollector::new();
//! collector.record_execution_created();
//! println!("{}", collector.gather().unwrap());
//! ```

pub mod collector;
pub mod metrics;
pub mod tracing;

pub use collector::{MetricsCollector, MetricsError, RecoveryReason};
pub use crate::tracing::{execution_span, init_tracing, TracingError, DEFAULT_FILTER};
