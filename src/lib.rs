//! Auto-gift execution and fulfillment orchestrator
//!
//! Facade over the workspace crates:
//!
//! - [`types`]: rules, events, series templates, executions, line items
//! - [`retry`]: backoff and retry policy
//! - [`store`]: execution and rule persistence (in-memory and SQLite)
//! - [`config`]: `AppConfig` and its loaders
//! - [`metrics`]: prometheus metrics and tracing setup
//! - [`orchestrator`]: scheduler, approval gate, pipeline and recovery

pub use autogift_config as config;
pub use autogift_metrics as metrics;
pub use autogift_orchestrator as orchestrator;
pub use autogift_retry as retry;
pub use autogift_store as store;
pub use autogift_types as types;

pub use autogift_config::AppConfig;
pub use autogift_orchestrator::{
    ApprovalGate, ExecutionOrchestrator, GateOutcome, Ports, ProcessOutcome, RecoveryScanner,
    Runtime, RuntimeHandle, Scheduler,
};
pub use autogift_store::{ExecutionStore, InMemoryStore, RuleStore, SqliteStore};
pub use autogift_types::{Execution, ExecutionStatus};
