//! Periodic scan that re-drives executions which stalled in `processing` or
//! whose scheduled retry is due. Never touches `pending_approval`; terminal
//! failures are left for the operator queue.

use autogift_config::RecoveryConfig;
use autogift_metrics::{MetricsCollector, RecoveryReason};
use autogift_store::{ExecutionStore, StoreError};
use autogift_types::{Clock, Execution, ExecutionStatus};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::orchestrator::{ExecutionOrchestrator, OrchestratorError, ProcessOutcome};

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Counts from one recovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub examined: usize,
    pub redriven: usize,
    pub completed: usize,
    pub awaiting_payment: usize,
    pub retry_scheduled: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl RecoveryReport {
    fn tally(&mut self, outcome: &ProcessOutcome) {
        match outcome {
            ProcessOutcome::Completed(_) => self.completed += 1,
            ProcessOutcome::AwaitingPayment(_) => self.awaiting_payment += 1,
            ProcessOutcome::RetryScheduled { .. } => self.retry_scheduled += 1,
            ProcessOutcome::Failed(_) => self.failed += 1,
            ProcessOutcome::Skipped { .. } => self.skipped += 1,
        }
    }

    fn tally_result(&mut self, id: &str, result: Result<ProcessOutcome, OrchestratorError>) {
        match result {
            Ok(outcome) => self.tally(&outcome),
            Err(e) => {
                self.errors += 1;
                error!(execution_id = %id, error = %e, "Recovery re-drive failed");
            }
        }
    }
}

pub struct RecoveryScanner {
    store: Arc<dyn ExecutionStore>,
    orchestrator: Arc<ExecutionOrchestrator>,
    clock: Arc<dyn Clock>,
    metrics: MetricsCollector,
    config: RecoveryConfig,
}

impl RecoveryScanner {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        orchestrator: Arc<ExecutionOrchestrator>,
        clock: Arc<dyn Clock>,
        metrics: MetricsCollector,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            store,
            orchestrator,
            clock,
            metrics,
            config,
        }
    }

    /// One pass: pending payments past the verification threshold, then
    /// anything stuck in `processing` past the general threshold, then
    /// failed executions whose retry is due.
    pub async fn scan(&self) -> Result<RecoveryReport, RecoveryError> {
        let now = self.clock.now();
        let mut report = RecoveryReport::default();
        let mut seen = HashSet::new();

        let payment_cutoff = cutoff(now, self.config.payment_verification());
        let pending_payments: Vec<Execution> = self
            .store
            .list_by_status(ExecutionStatus::Processing, Some(payment_cutoff), usize::MAX)
            .await?
            .into_iter()
            .filter(Execution::payment_pending)
            .take(self.config.batch_limit)
            .collect();

        for execution in pending_payments {
            seen.insert(execution.id.clone());
            self.redrive_stale(&execution, RecoveryReason::PaymentPending, &mut report)
                .await;
        }

        let stale_cutoff = cutoff(now, self.config.stale_processing());
        let stale = self
            .store
            .list_by_status(
                ExecutionStatus::Processing,
                Some(stale_cutoff),
                self.config.batch_limit,
            )
            .await?;

        for execution in stale.into_iter().filter(|e| !seen.contains(&e.id)) {
            self.redrive_stale(&execution, RecoveryReason::StaleProcessing, &mut report)
                .await;
        }

        let retries_due: Vec<Execution> = self
            .store
            .list_by_status(ExecutionStatus::Failed, None, usize::MAX)
            .await?
            .into_iter()
            .filter(|e| e.next_retry_at.is_some_and(|at| at <= now))
            .take(self.config.batch_limit)
            .collect();

        for execution in retries_due {
            report.examined += 1;
            report.redriven += 1;
            self.metrics.record_recovery_redrive(RecoveryReason::RetryDue);
            debug!(execution_id = %execution.id, retry_count = execution.retry_count, "Retry due");

            let result = self.orchestrator.retry(&execution.id).await;
            report.tally_result(&execution.id, result);
            self.pause().await;
        }

        if report.examined > 0 {
            info!(
                examined = report.examined,
                redriven = report.redriven,
                completed = report.completed,
                retry_scheduled = report.retry_scheduled,
                failed = report.failed,
                errors = report.errors,
                "Recovery pass finished"
            );
        }

        Ok(report)
    }

    /// Operator action: re-drive every execution in `processing` older than
    /// the payment verification threshold, regardless of batch limits
    pub async fn process_all_stuck(&self) -> Result<RecoveryReport, RecoveryError> {
        let now = self.clock.now();
        let threshold = cutoff(now, self.config.payment_verification());
        let mut report = RecoveryReport::default();

        let stuck = self
            .store
            .list_by_status(ExecutionStatus::Processing, Some(threshold), usize::MAX)
            .await?;

        for execution in stuck {
            self.redrive_stale(&execution, RecoveryReason::Manual, &mut report)
                .await;
        }

        info!(
            examined = report.examined,
            completed = report.completed,
            errors = report.errors,
            "Processed stuck executions"
        );

        Ok(report)
    }

    /// Hand a stalled `processing` execution back to the orchestrator. The
    /// orchestrator only drives it if it wins the claim, so a scanner racing
    /// a live driver or another scanner comes back `Skipped`.
    async fn redrive_stale(
        &self,
        execution: &Execution,
        reason: RecoveryReason,
        report: &mut RecoveryReport,
    ) {
        report.examined += 1;
        info!(
            execution_id = %execution.id,
            reason = ?reason,
            last_update = %execution.updated_at,
            "Re-driving stalled execution"
        );

        let result = self.orchestrator.process(&execution.id).await;
        if matches!(&result, Ok(outcome) if !outcome.is_skipped()) {
            report.redriven += 1;
            self.metrics.record_recovery_redrive(reason);
        }
        report.tally_result(&execution.id, result);
        self.pause().await;
    }

    async fn pause(&self) {
        let delay = self.config.inter_item_delay();
        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }
    }
}

fn cutoff(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
