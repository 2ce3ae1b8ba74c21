//! Human-in-the-loop step between candidate selection and payment.

use autogift_metrics::MetricsCollector;
use autogift_store::{ExecutionStore, RuleStore, StoreError};
use autogift_types::{
    Clock, Execution, ExecutionStatus, ExecutionUpdate, LineItem, NotificationKind,
    TransitionOutcome,
};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::orchestrator::{ExecutionOrchestrator, OrchestratorError, ProcessOutcome};
use crate::ports::{notify_quietly, NotificationService};

/// Approver recorded on executions released without a human
pub const AUTO_APPROVER: &str = "auto";

#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    /// Released without a human and driven through the pipeline
    AutoApproved(ProcessOutcome),

    /// Parked in `pending_approval`; the owner has been asked
    AwaitingApproval(Execution),

    /// Approved by the owner and driven through the pipeline
    Approved(ProcessOutcome),

    Rejected(Execution),

    /// Not in the expected state, or another driver got there first
    Skipped { status: Option<ExecutionStatus> },
}

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("execution not found: {0}")]
    NotFound(String),

    #[error("execution is {current}, not pending approval")]
    InvalidState { current: ExecutionStatus },

    #[error("at least one product must be selected")]
    EmptySelection,

    #[error("product {0} is not one of the candidates")]
    UnknownProduct(String),

    #[error("no payment method on the rule and none supplied with the approval")]
    MissingPaymentMethod,

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct ApprovalGate {
    store: Arc<dyn ExecutionStore>,
    rules: Arc<dyn RuleStore>,
    orchestrator: Arc<ExecutionOrchestrator>,
    notifier: Arc<dyn NotificationService>,
    clock: Arc<dyn Clock>,
    metrics: MetricsCollector,
    auto_approve_confidence: f64,
}

impl ApprovalGate {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        rules: Arc<dyn RuleStore>,
        orchestrator: Arc<ExecutionOrchestrator>,
        notifier: Arc<dyn NotificationService>,
        clock: Arc<dyn Clock>,
        metrics: MetricsCollector,
        auto_approve_confidence: f64,
    ) -> Self {
        Self {
            store,
            rules,
            orchestrator,
            notifier,
            clock,
            metrics,
            auto_approve_confidence,
        }
    }

    /// Route a `pending` execution: straight to `processing` when it can be
    /// auto-approved, otherwise to `pending_approval`.
    pub async fn evaluate(&self, id: &str) -> Result<GateOutcome, ApprovalError> {
        let execution = self.load(id).await?;
        if execution.status != ExecutionStatus::Pending {
            return Ok(GateOutcome::Skipped {
                status: Some(execution.status),
            });
        }

        let reasons = self.approval_reasons(&execution).await?;
        if reasons.is_empty() {
            return self.auto_approve(execution).await;
        }

        let update = ExecutionUpdate::new().with_details(reasons.join("; "));
        let execution = match self
            .transition(id, ExecutionStatus::Pending, ExecutionStatus::PendingApproval, update)
            .await?
        {
            Ok(execution) => execution,
            Err(status) => return Ok(GateOutcome::Skipped { status }),
        };

        info!(
            execution_id = %execution.id,
            rule_id = %execution.rule_id,
            reasons = ?reasons,
            "Approval requested"
        );

        notify_quietly(
            self.notifier.as_ref(),
            &execution.owner_id,
            NotificationKind::ApprovalRequested,
            json!({
                "execution_id": execution.id,
                "event_id": execution.event_id,
                "candidates": execution.candidate_products,
                "total_amount": execution.total_amount.to_string(),
                "budget_limit": execution.budget_limit.to_string(),
                "reasons": reasons,
            }),
        )
        .await;

        Ok(GateOutcome::AwaitingApproval(execution))
    }

    /// Approve a subset of the candidates. The subset keeps candidate order
    /// and becomes the selection; `totalAmount` is recomputed from it.
    pub async fn approve(
        &self,
        id: &str,
        product_ids: &[String],
        actor: &str,
        payment_method_ref: Option<String>,
    ) -> Result<GateOutcome, ApprovalError> {
        if product_ids.is_empty() {
            return Err(ApprovalError::EmptySelection);
        }

        let execution = self.load(id).await?;
        if execution.status != ExecutionStatus::PendingApproval {
            return Err(ApprovalError::InvalidState {
                current: execution.status,
            });
        }

        let selection = select_subset(&execution.candidate_products, product_ids)?;
        let payment_method_ref = payment_method_ref
            .or_else(|| execution.payment_method_ref.clone())
            .ok_or(ApprovalError::MissingPaymentMethod)?;

        let update = ExecutionUpdate::new()
            .with_selection(selection)
            .with_payment_method(payment_method_ref)
            .with_approver(actor)
            .with_details(format!("approved by {actor}"));

        let execution = match self
            .transition(id, ExecutionStatus::PendingApproval, ExecutionStatus::Processing, update)
            .await?
        {
            Ok(execution) => execution,
            Err(status) => return Ok(GateOutcome::Skipped { status }),
        };

        info!(
            execution_id = %execution.id,
            actor = %actor,
            items = execution.selected_products.len(),
            total_amount = %execution.total_amount,
            "Execution approved"
        );

        let outcome = self.orchestrator.process(&execution.id).await?;
        Ok(GateOutcome::Approved(outcome))
    }

    pub async fn reject(
        &self,
        id: &str,
        reason: Option<String>,
        actor: &str,
    ) -> Result<GateOutcome, ApprovalError> {
        let execution = self.load(id).await?;
        if execution.status != ExecutionStatus::PendingApproval {
            return Err(ApprovalError::InvalidState {
                current: execution.status,
            });
        }

        let update = ExecutionUpdate::new()
            .with_rejection_reason(reason.clone())
            .with_details(format!("rejected by {actor}"));

        let execution = match self
            .transition(id, ExecutionStatus::PendingApproval, ExecutionStatus::Rejected, update)
            .await?
        {
            Ok(execution) => execution,
            Err(status) => return Ok(GateOutcome::Skipped { status }),
        };

        info!(
            execution_id = %execution.id,
            actor = %actor,
            reason = reason.as_deref().unwrap_or(""),
            "Execution rejected"
        );

        notify_quietly(
            self.notifier.as_ref(),
            &execution.owner_id,
            NotificationKind::GiftRejected,
            json!({
                "execution_id": execution.id,
                "event_id": execution.event_id,
                "reason": reason,
            }),
        )
        .await;

        Ok(GateOutcome::Rejected(execution))
    }

    /// Why a human has to look at this execution; empty means auto-approve
    async fn approval_reasons(&self, execution: &Execution) -> Result<Vec<String>, ApprovalError> {
        let mut reasons = Vec::new();

        match self.rules.get_rule(&execution.rule_id).await? {
            Some(rule) if rule.selection_criteria.always_require_approval => {
                reasons.push("owner requires approval".to_string());
            }
            Some(_) => {}
            None => reasons.push("rule not found".to_string()),
        }

        if execution.selection_confidence < self.auto_approve_confidence {
            reasons.push(format!(
                "confidence {:.2} below {:.2}",
                execution.selection_confidence, self.auto_approve_confidence
            ));
        }
        if execution.payment_method_ref.is_none() {
            reasons.push("no default payment method".to_string());
        }
        if execution.selected_products.is_empty() {
            reasons.push("no products selected".to_string());
        }
        if execution.over_budget() {
            reasons.push(format!(
                "total {} over budget {}",
                execution.total_amount, execution.budget_limit
            ));
        }

        Ok(reasons)
    }

    async fn auto_approve(&self, execution: Execution) -> Result<GateOutcome, ApprovalError> {
        let update = ExecutionUpdate::new()
            .with_approver(AUTO_APPROVER)
            .with_details(format!(
                "auto-approved at confidence {:.2}",
                execution.selection_confidence
            ));

        let execution = match self
            .transition(
                &execution.id,
                ExecutionStatus::Pending,
                ExecutionStatus::Processing,
                update,
            )
            .await?
        {
            Ok(execution) => execution,
            Err(status) => return Ok(GateOutcome::Skipped { status }),
        };

        info!(execution_id = %execution.id, "Execution auto-approved");

        let outcome = self.orchestrator.process(&execution.id).await?;
        Ok(GateOutcome::AutoApproved(outcome))
    }

    /// Conditional transition; `Err(current)` when another driver won
    async fn transition(
        &self,
        id: &str,
        expected: ExecutionStatus,
        next: ExecutionStatus,
        update: ExecutionUpdate,
    ) -> Result<Result<Execution, Option<ExecutionStatus>>, ApprovalError> {
        let outcome = self
            .store
            .conditional_update_status(id, expected, next, update, self.clock.now())
            .await?;

        match outcome {
            TransitionOutcome::Applied(execution) => {
                self.metrics
                    .record_transition(next, next == ExecutionStatus::Rejected);
                Ok(Ok(execution))
            }
            TransitionOutcome::Conflict { current } => {
                self.metrics.record_conflict();
                debug!(
                    execution_id = %id,
                    from = %expected,
                    to = %next,
                    current = ?current,
                    "Transition lost to another driver"
                );
                Ok(Err(current))
            }
        }
    }

    async fn load(&self, id: &str) -> Result<Execution, ApprovalError> {
        self.store
            .get_execution(id)
            .await?
            .ok_or_else(|| ApprovalError::NotFound(id.to_string()))
    }
}

fn select_subset(candidates: &[LineItem], product_ids: &[String]) -> Result<Vec<LineItem>, ApprovalError> {
    if let Some(unknown) = product_ids
        .iter()
        .find(|id| !candidates.iter().any(|c| &c.product_id == *id))
    {
        return Err(ApprovalError::UnknownProduct(unknown.clone()));
    }

    Ok(candidates
        .iter()
        .filter(|c| product_ids.contains(&c.product_id))
        .cloned()
        .collect())
}
