//! Auto-gift execution pipeline
//!
//! - `Scheduler` turns due events into `pending` executions
//! - `ApprovalGate` auto-approves them or parks them for the owner
//! - `ExecutionOrchestrator` runs order, payment and fulfillment and owns
//!   every transition out of `processing`
//! - `RecoveryScanner` re-drives stalled executions and due retries
//! - `Runtime` wires them from `AppConfig` and runs the periodic loops
//!
//! All coordination goes through conditional status writes in the store.

pub mod approval;
pub mod executor;
pub mod fakes;
pub mod orchestrator;
pub mod ports;
pub mod recovery;
pub mod recurrence;
pub mod runtime;
pub mod scheduler;

#[cfg(test)]
mod test_support;

pub use approval::{ApprovalError, ApprovalGate, GateOutcome, AUTO_APPROVER};
pub use executor::{PipelineExecutor, PipelineProgress, StepError};
pub use orchestrator::{
    BuilderError, ExecutionOrchestrator, ExecutionOrchestratorBuilder, OrchestratorError,
    ProcessOutcome,
};
pub use ports::{
    FulfillmentCoordinator, NotificationService, OrderGateway, PaymentCoordinator,
    ProductSelector, Selection,
};
pub use recovery::{RecoveryError, RecoveryReport, RecoveryScanner};
pub use recurrence::{advance_series, Occurrence, RecurrenceCalculator};
pub use runtime::{
    open_store, retry_policy, Ports, Runtime, RuntimeError, RuntimeHandle, SchedulerTick,
};
pub use scheduler::{RuleDecision, Scheduler, SchedulerError, SchedulerReport};
