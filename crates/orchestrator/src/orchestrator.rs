//! Drives one execution through `processing` and owns every transition out
//! of it: completion, scheduled retry and terminal failure.

use autogift_config::OrchestratorConfig;
use autogift_metrics::{execution_span, MetricsCollector};
use autogift_retry::{FailureClass, GiveUpReason, RetryDecision, RetryPolicy};
use autogift_store::{ExecutionStore, RuleStore, StoreError};
use autogift_types::{
    Clock, Execution, ExecutionStatus, ExecutionUpdate, GiftFailure, NotificationKind,
    StateTransition, TransitionOutcome,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::executor::{PipelineExecutor, PipelineProgress, StepError};
use crate::ports::{notify_quietly, NotificationService};
use crate::recurrence::advance_series;

/// How long a claim survives without a write from its holder
pub const DEFAULT_CLAIM_TTL: Duration = Duration::from_secs(6 * 60 * 60);

/// Result of driving an execution
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// Order placed, paid and handed to fulfillment
    Completed(Execution),

    /// Still `processing`; payment is pending at the processor
    AwaitingPayment(Execution),

    /// `failed` with a retry scheduled at `retry_at`
    RetryScheduled {
        execution: Execution,
        retry_at: DateTime<Utc>,
    },

    /// Terminally `failed`; the owner has been notified
    Failed(Execution),

    /// Nothing was done: the execution was not in a drivable state or
    /// another driver holds its claim
    Skipped { status: Option<ExecutionStatus> },
}

impl ProcessOutcome {
    pub fn execution(&self) -> Option<&Execution> {
        match self {
            ProcessOutcome::Completed(e)
            | ProcessOutcome::AwaitingPayment(e)
            | ProcessOutcome::Failed(e)
            | ProcessOutcome::RetryScheduled { execution: e, .. } => Some(e),
            ProcessOutcome::Skipped { .. } => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, ProcessOutcome::Skipped { .. })
    }
}

/// Builder error
#[derive(Debug, Error)]
pub enum BuilderError {
    #[error("missing required field: {field}")]
    MissingField { field: String },
}

/// Builder for ExecutionOrchestrator
#[derive(Default)]
pub struct ExecutionOrchestratorBuilder {
    store: Option<Arc<dyn ExecutionStore>>,
    rules: Option<Arc<dyn RuleStore>>,
    executor: Option<PipelineExecutor>,
    notifier: Option<Arc<dyn NotificationService>>,
    clock: Option<Arc<dyn Clock>>,
    retry_policy: RetryPolicy,
    config: OrchestratorConfig,
    metrics: MetricsCollector,
    claim_ttl: Option<Duration>,
}

impl ExecutionOrchestratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(mut self, store: Arc<dyn ExecutionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_rules(mut self, rules: Arc<dyn RuleStore>) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn with_executor(mut self, executor: PipelineExecutor) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationService>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    /// A claim held longer than this without a write may be taken over
    pub fn with_claim_ttl(mut self, claim_ttl: Duration) -> Self {
        self.claim_ttl = Some(claim_ttl);
        self
    }

    pub fn build(self) -> Result<ExecutionOrchestrator, BuilderError> {
        let store = self.store.ok_or_else(|| BuilderError::MissingField {
            field: "store".to_string(),
        })?;
        let rules = self.rules.ok_or_else(|| BuilderError::MissingField {
            field: "rules".to_string(),
        })?;
        let executor = self.executor.ok_or_else(|| BuilderError::MissingField {
            field: "executor".to_string(),
        })?;
        let notifier = self.notifier.ok_or_else(|| BuilderError::MissingField {
            field: "notifier".to_string(),
        })?;
        let clock = self.clock.ok_or_else(|| BuilderError::MissingField {
            field: "clock".to_string(),
        })?;

        Ok(ExecutionOrchestrator {
            store,
            rules,
            executor,
            notifier,
            clock,
            retry_policy: self.retry_policy,
            config: self.config,
            metrics: self.metrics,
            claim_ttl: self.claim_ttl.unwrap_or(DEFAULT_CLAIM_TTL),
        })
    }
}

/// Orchestrator errors
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("execution not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct ExecutionOrchestrator {
    store: Arc<dyn ExecutionStore>,
    rules: Arc<dyn RuleStore>,
    executor: PipelineExecutor,
    notifier: Arc<dyn NotificationService>,
    clock: Arc<dyn Clock>,
    retry_policy: RetryPolicy,
    config: OrchestratorConfig,
    metrics: MetricsCollector,
    claim_ttl: Duration,
}

impl ExecutionOrchestrator {
    pub fn builder() -> ExecutionOrchestratorBuilder {
        ExecutionOrchestratorBuilder::new()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Drive a `processing` execution as far as it will go. Anything else,
    /// or an execution another driver has claimed, is skipped.
    pub async fn process(&self, id: &str) -> Result<ProcessOutcome, OrchestratorError> {
        let execution = self.load(id).await?;
        if execution.status != ExecutionStatus::Processing {
            debug!(execution_id = %id, status = %execution.status, "Not processing; skipped");
            return Ok(ProcessOutcome::Skipped {
                status: Some(execution.status),
            });
        }

        self.claim_and_drive(id).await
    }

    /// Re-drive a `failed` execution whose scheduled retry is due
    pub async fn retry(&self, id: &str) -> Result<ProcessOutcome, OrchestratorError> {
        let execution = self.load(id).await?;
        let now = self.clock.now();

        let due = execution.status == ExecutionStatus::Failed
            && execution.next_retry_at.is_some_and(|at| at <= now);
        if !due {
            return Ok(ProcessOutcome::Skipped {
                status: Some(execution.status),
            });
        }

        self.resume_failed(execution).await
    }

    /// Operator re-drive: processes a `processing` execution, or resumes a
    /// `failed` one with a retry scheduled without waiting for the schedule.
    /// Terminal failures are left for the operator queue.
    pub async fn process_now(&self, id: &str) -> Result<ProcessOutcome, OrchestratorError> {
        let execution = self.load(id).await?;

        match execution.status {
            ExecutionStatus::Processing => self.claim_and_drive(id).await,
            ExecutionStatus::Failed if execution.next_retry_at.is_some() => {
                self.resume_failed(execution).await
            }
            status => Ok(ProcessOutcome::Skipped {
                status: Some(status),
            }),
        }
    }

    /// Most recently updated executions, for dashboards
    pub async fn recent_executions(&self, limit: usize) -> Result<Vec<Execution>, OrchestratorError> {
        Ok(self.store.list_recent(limit).await?)
    }

    /// Terminally failed executions awaiting operator attention
    pub async fn operator_queue(&self, limit: usize) -> Result<Vec<Execution>, OrchestratorError> {
        let failed = self
            .store
            .list_by_status(ExecutionStatus::Failed, None, usize::MAX)
            .await?;

        Ok(failed
            .into_iter()
            .filter(|e| e.next_retry_at.is_none())
            .take(limit)
            .collect())
    }

    pub async fn history(&self, id: &str) -> Result<Vec<StateTransition>, OrchestratorError> {
        Ok(self.store.get_history(id).await?)
    }

    async fn load(&self, id: &str) -> Result<Execution, OrchestratorError> {
        self.store
            .get_execution(id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))
    }

    async fn resume_failed(&self, execution: Execution) -> Result<ProcessOutcome, OrchestratorError> {
        let update = ExecutionUpdate::new()
            .clear_next_retry()
            .with_details(format!("retry {}", execution.retry_count));

        let outcome = self
            .store
            .conditional_update_status(
                &execution.id,
                ExecutionStatus::Failed,
                ExecutionStatus::Processing,
                update,
                self.clock.now(),
            )
            .await?;

        match outcome {
            TransitionOutcome::Applied(execution) => {
                self.metrics
                    .record_transition(ExecutionStatus::Processing, false);
                info!(
                    execution_id = %execution.id,
                    retry_count = execution.retry_count,
                    "Retrying execution"
                );
                self.claim_and_drive(&execution.id).await
            }
            TransitionOutcome::Conflict { current } => Ok(self.conflict(&execution.id, current)),
        }
    }

    /// Take the pipeline claim, then drive. Only the claim holder ever calls
    /// a coordinator for this execution.
    async fn claim_and_drive(&self, id: &str) -> Result<ProcessOutcome, OrchestratorError> {
        let now = self.clock.now();
        let stale_before = chrono::Duration::from_std(self.claim_ttl)
            .ok()
            .and_then(|ttl| now.checked_sub_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let token = Uuid::new_v4().to_string();

        let Some(execution) = self
            .store
            .acquire_claim(id, &token, stale_before, now)
            .await?
        else {
            let current = self.store.get_execution(id).await?.map(|e| e.status);
            return Ok(self.conflict(id, current));
        };

        let span = execution_span(&execution.id, &execution.rule_id, &execution.event_id);
        self.drive(execution, &token).instrument(span).await
    }

    async fn drive(&self, execution: Execution, token: &str) -> Result<ProcessOutcome, OrchestratorError> {
        let id = execution.id.clone();
        let retry_count = execution.retry_count;

        let progress = match self.rules.get_rule(&execution.rule_id).await {
            Ok(rule) => {
                let gift_message = rule
                    .as_ref()
                    .map_or(self.config.default_gift_message.as_str(), |rule| {
                        rule.message_or(&self.config.default_gift_message)
                    })
                    .to_string();
                self.executor.run(execution, token, &gift_message).await
            }
            Err(e) => Err(StepError::Store(e)),
        };

        match progress {
            Ok(PipelineProgress::Fulfilled(execution)) => self.complete(execution, token).await,
            Ok(PipelineProgress::AwaitingPayment(mut execution)) => {
                if self.release(&id, token).await {
                    execution.claimed_by = None;
                }
                Ok(ProcessOutcome::AwaitingPayment(execution))
            }
            Err(StepError::Failed { failure, class }) => {
                self.handle_failure(&id, token, retry_count, failure, class).await
            }
            Err(StepError::Conflict { current }) => Ok(self.conflict(&id, current)),
            Err(StepError::Store(e)) => {
                self.release(&id, token).await;
                Err(e.into())
            }
        }
    }

    /// Hand the claim back. A failed release only delays the next driver
    /// until the claim goes stale.
    async fn release(&self, id: &str, token: &str) -> bool {
        match self.store.release_claim(id, token).await {
            Ok(released) => released,
            Err(e) => {
                warn!(execution_id = %id, error = %e, "Failed to release claim");
                false
            }
        }
    }

    async fn complete(&self, execution: Execution, token: &str) -> Result<ProcessOutcome, OrchestratorError> {
        let now = self.clock.now();
        let update = ExecutionUpdate::new()
            .clear_error()
            .with_details("gift handed to fulfillment");

        let execution = match self
            .store
            .update_claimed(
                &execution.id,
                token,
                ExecutionStatus::Completed,
                update,
                now,
            )
            .await?
        {
            TransitionOutcome::Applied(execution) => execution,
            TransitionOutcome::Conflict { current } => {
                return Ok(self.conflict(&execution.id, current))
            }
        };

        self.metrics
            .record_transition(ExecutionStatus::Completed, true);
        info!(
            execution_id = %execution.id,
            total_amount = %execution.total_amount,
            "Execution completed"
        );

        self.close_event(&execution.event_id, now).await;

        notify_quietly(
            self.notifier.as_ref(),
            &execution.owner_id,
            NotificationKind::GiftSent,
            json!({
                "execution_id": execution.id,
                "event_id": execution.event_id,
                "order_id": execution.order_id,
                "fulfillment_ref": execution.fulfillment.as_ref().map(|f| f.reference.clone()),
                "total_amount": execution.total_amount.to_string(),
            }),
        )
        .await;

        Ok(ProcessOutcome::Completed(execution))
    }

    /// Mark the event handled and, for a series, create the next occurrence.
    /// The execution is already completed; errors here are only logged.
    async fn close_event(&self, event_id: &str, now: DateTime<Utc>) {
        let event = match self.rules.get_event(event_id).await {
            Ok(Some(event)) => event,
            Ok(None) => {
                warn!(event_id = %event_id, "Completed execution references a missing event");
                return;
            }
            Err(e) => {
                warn!(event_id = %event_id, error = %e, "Failed to load event");
                return;
            }
        };

        if let Err(e) = self.rules.mark_event_completed(event_id, now).await {
            warn!(event_id = %event_id, error = %e, "Failed to mark event completed");
        }

        if event.is_recurring() {
            if let Err(e) = advance_series(self.rules.as_ref(), &event, now).await {
                warn!(event_id = %event_id, error = %e, "Failed to advance series");
            }
        }
    }

    async fn handle_failure(
        &self,
        id: &str,
        token: &str,
        retry_count: u32,
        failure: GiftFailure,
        class: FailureClass,
    ) -> Result<ProcessOutcome, OrchestratorError> {
        let now = self.clock.now();
        let decision = if matches!(failure, GiftFailure::Validation { .. }) {
            RetryDecision::GiveUp {
                reason: GiveUpReason::Permanent,
            }
        } else {
            self.retry_policy.decide(retry_count, class, now)
        };
        let details = format!("{} failed: {}", failure.step().as_str(), failure.detail());

        match decision {
            RetryDecision::Retry {
                retry_count,
                delay,
                retry_at,
            } => {
                let update = ExecutionUpdate::new()
                    .with_error(failure.user_message())
                    .with_retry(retry_count, Some(retry_at))
                    .with_details(details);

                match self
                    .store
                    .update_claimed(
                        id,
                        token,
                        ExecutionStatus::Failed,
                        update,
                        now,
                    )
                    .await?
                {
                    TransitionOutcome::Applied(execution) => {
                        self.metrics.record_transition(ExecutionStatus::Failed, false);
                        self.metrics.record_retry_scheduled();
                        warn!(
                            execution_id = %id,
                            step = failure.step().as_str(),
                            error = %failure,
                            retry_count,
                            delay_secs = delay.as_secs(),
                            "Transient failure; retry scheduled"
                        );
                        Ok(ProcessOutcome::RetryScheduled {
                            execution,
                            retry_at,
                        })
                    }
                    TransitionOutcome::Conflict { current } => Ok(self.conflict(id, current)),
                }
            }
            RetryDecision::GiveUp { reason } => {
                let update = ExecutionUpdate::new()
                    .with_error(failure.user_message())
                    .clear_next_retry()
                    .with_details(details);

                let execution = match self
                    .store
                    .update_claimed(
                        id,
                        token,
                        ExecutionStatus::Failed,
                        update,
                        now,
                    )
                    .await?
                {
                    TransitionOutcome::Applied(execution) => execution,
                    TransitionOutcome::Conflict { current } => {
                        return Ok(self.conflict(id, current))
                    }
                };

                self.metrics.record_transition(ExecutionStatus::Failed, true);
                error!(
                    execution_id = %id,
                    step = failure.step().as_str(),
                    error = %failure,
                    reason = ?reason,
                    retry_count = execution.retry_count,
                    "Execution failed"
                );

                notify_quietly(
                    self.notifier.as_ref(),
                    &execution.owner_id,
                    NotificationKind::ExecutionFailed,
                    json!({
                        "execution_id": execution.id,
                        "event_id": execution.event_id,
                        "error": execution.error_message,
                        "reason": reason,
                    }),
                )
                .await;

                Ok(ProcessOutcome::Failed(execution))
            }
        }
    }

    fn conflict(&self, id: &str, current: Option<ExecutionStatus>) -> ProcessOutcome {
        self.metrics.record_conflict();
        debug!(execution_id = %id, current = ?current, "Lost ownership of execution");
        ProcessOutcome::Skipped { status: current }
    }
}
