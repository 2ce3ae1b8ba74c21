use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{total_amount, AutoGiftRule, LineItem, ScheduledEvent, ShippingAddress};

/// Execution lifecycle.
///
/// ```text
/// pending ──► pending_approval ──► processing ──► completed
///    │               │                 ▲  │
///    │               ▼                 │  ▼
///    │           rejected              └─ failed (retry while budget remains)
///    └──────────(auto-approved)───────►processing
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    PendingApproval,
    Processing,
    Completed,
    Failed,
    Rejected,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::PendingApproval => "pending_approval",
            ExecutionStatus::Processing => "processing",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Rejected => "rejected",
        }
    }

    /// Whether `self -> next` is an edge of the state machine. A status may
    /// also "transition" to itself to persist field updates while it is held.
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        match (self, next) {
            (Pending, PendingApproval) | (Pending, Processing) => true,
            (PendingApproval, Processing) | (PendingApproval, Rejected) => true,
            (Processing, Completed) | (Processing, Failed) => true,
            (Failed, Processing) => true,
            (Pending, Pending) | (PendingApproval, PendingApproval) | (Processing, Processing) => {
                true
            }
            _ => false,
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "pending_approval" => Ok(ExecutionStatus::PendingApproval),
            "processing" => Ok(ExecutionStatus::Processing),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "rejected" => Ok(ExecutionStatus::Rejected),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Succeeded,
    Pending,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Pending => "pending",
            PaymentStatus::Failed => "failed",
        }
    }
}

/// Payment state as last reported by the payment capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub reference: String,
    pub status: PaymentStatus,
    pub amount: Decimal,
    pub payment_method_ref: String,
    pub recorded_at: DateTime<Utc>,
}

/// Hand-off receipt from the fulfillment capability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentRecord {
    pub reference: String,
    pub submitted_at: DateTime<Utc>,
}

/// One attempt to fulfil a rule for one event occurrence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub rule_id: String,
    pub event_id: String,
    pub owner_id: String,
    pub status: ExecutionStatus,

    pub budget_limit: Decimal,

    /// Everything product selection proposed
    pub candidate_products: Vec<LineItem>,
    pub selection_confidence: f64,

    /// Subset that will actually be ordered
    pub selected_products: Vec<LineItem>,
    pub total_amount: Decimal,

    pub payment_method_ref: Option<String>,
    pub address_metadata: Option<ShippingAddress>,

    pub order_id: Option<String>,
    pub payment: Option<PaymentRecord>,
    pub fulfillment: Option<FulfillmentRecord>,

    pub error_message: Option<String>,
    pub retry_count: u32,
    pub next_retry_at: Option<DateTime<Utc>>,

    pub approved_by: Option<String>,
    pub rejection_reason: Option<String>,

    /// Token of the driver currently running the pipeline. Only meaningful
    /// while `processing`; cleared on every transition out of it.
    pub claimed_by: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Execution {
    /// New `pending` candidate for `rule` on `event`; every candidate starts
    /// out selected.
    pub fn candidate(
        id: impl Into<String>,
        rule: &AutoGiftRule,
        event: &ScheduledEvent,
        candidates: Vec<LineItem>,
        selection_confidence: f64,
        created_at: DateTime<Utc>,
    ) -> Self {
        let total = total_amount(&candidates);
        Self {
            id: id.into(),
            rule_id: rule.id.clone(),
            event_id: event.id.clone(),
            owner_id: rule.owner_id.clone(),
            status: ExecutionStatus::Pending,
            budget_limit: rule.budget_limit,
            selected_products: candidates.clone(),
            candidate_products: candidates,
            selection_confidence,
            total_amount: total,
            payment_method_ref: rule.payment_method_ref.clone(),
            address_metadata: event.recipient_address.clone(),
            order_id: None,
            payment: None,
            fulfillment: None,
            error_message: None,
            retry_count: 0,
            next_retry_at: None,
            approved_by: None,
            rejection_reason: None,
            claimed_by: None,
            created_at,
            updated_at: created_at,
            completed_at: None,
        }
    }

    /// Occupies the (rule, event) slot: still in flight or waiting to retry
    pub fn is_active(&self) -> bool {
        match self.status {
            ExecutionStatus::Pending
            | ExecutionStatus::PendingApproval
            | ExecutionStatus::Processing => true,
            ExecutionStatus::Failed => self.next_retry_at.is_some(),
            ExecutionStatus::Completed | ExecutionStatus::Rejected => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    pub fn payment_succeeded(&self) -> bool {
        matches!(&self.payment, Some(p) if p.status == PaymentStatus::Succeeded)
    }

    pub fn payment_pending(&self) -> bool {
        matches!(&self.payment, Some(p) if p.status == PaymentStatus::Pending)
    }

    pub fn is_fulfilled(&self) -> bool {
        self.fulfillment.is_some()
    }

    pub fn over_budget(&self) -> bool {
        self.total_amount > self.budget_limit
    }

    /// A driver may take the pipeline over: `processing` and either
    /// unclaimed or untouched by its holder since `stale_before`
    pub fn is_claimable(&self, stale_before: DateTime<Utc>) -> bool {
        self.status == ExecutionStatus::Processing
            && (self.claimed_by.is_none() || self.updated_at < stale_before)
    }

    /// Apply a transition in place. Callers must already have checked the
    /// expected prior status.
    pub fn apply_transition(
        &mut self,
        next: ExecutionStatus,
        update: &ExecutionUpdate,
        at: DateTime<Utc>,
    ) -> StateTransition {
        let from = self.status;
        update.apply(self);
        self.status = next;
        self.updated_at = at;
        if next != ExecutionStatus::Processing {
            self.claimed_by = None;
        }
        if next == ExecutionStatus::Completed {
            self.completed_at = Some(at);
        }

        StateTransition {
            from,
            to: next,
            at,
            details: update.details.clone(),
        }
    }
}

/// Field changes carried along with a status transition
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionUpdate {
    pub candidate_products: Option<Vec<LineItem>>,
    pub selected_products: Option<Vec<LineItem>>,
    pub total_amount: Option<Decimal>,
    pub payment_method_ref: Option<String>,
    pub order_id: Option<String>,
    pub payment: Option<PaymentRecord>,
    pub fulfillment: Option<FulfillmentRecord>,
    pub error_message: Option<Option<String>>,
    pub retry_count: Option<u32>,
    pub next_retry_at: Option<Option<DateTime<Utc>>>,
    pub approved_by: Option<String>,
    pub rejection_reason: Option<String>,

    /// Free-form note for the transition history
    pub details: Option<String>,
}

impl ExecutionUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the selection; the total follows the selection
    pub fn with_selection(mut self, items: Vec<LineItem>) -> Self {
        self.total_amount = Some(total_amount(&items));
        self.selected_products = Some(items);
        self
    }

    pub fn with_payment_method(mut self, payment_method_ref: impl Into<String>) -> Self {
        self.payment_method_ref = Some(payment_method_ref.into());
        self
    }

    pub fn with_order_id(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    pub fn with_payment(mut self, payment: PaymentRecord) -> Self {
        self.payment = Some(payment);
        self
    }

    pub fn with_fulfillment(mut self, fulfillment: FulfillmentRecord) -> Self {
        self.fulfillment = Some(fulfillment);
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(Some(message.into()));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.error_message = Some(None);
        self
    }

    pub fn with_retry(mut self, retry_count: u32, next_retry_at: Option<DateTime<Utc>>) -> Self {
        self.retry_count = Some(retry_count);
        self.next_retry_at = Some(next_retry_at);
        self
    }

    pub fn clear_next_retry(mut self) -> Self {
        self.next_retry_at = Some(None);
        self
    }

    pub fn with_approver(mut self, actor: impl Into<String>) -> Self {
        self.approved_by = Some(actor.into());
        self
    }

    pub fn with_rejection_reason(mut self, reason: Option<String>) -> Self {
        self.rejection_reason = reason;
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn apply(&self, execution: &mut Execution) {
        if let Some(items) = &self.candidate_products {
            execution.candidate_products = items.clone();
        }
        if let Some(items) = &self.selected_products {
            execution.selected_products = items.clone();
        }
        if let Some(total) = self.total_amount {
            execution.total_amount = total;
        }
        if let Some(method) = &self.payment_method_ref {
            execution.payment_method_ref = Some(method.clone());
        }
        if let Some(order_id) = &self.order_id {
            execution.order_id = Some(order_id.clone());
        }
        if let Some(payment) = &self.payment {
            execution.payment = Some(payment.clone());
        }
        if let Some(fulfillment) = &self.fulfillment {
            execution.fulfillment = Some(fulfillment.clone());
        }
        if let Some(message) = &self.error_message {
            execution.error_message = message.clone();
        }
        if let Some(count) = self.retry_count {
            execution.retry_count = count;
        }
        if let Some(next) = self.next_retry_at {
            execution.next_retry_at = next;
        }
        if let Some(actor) = &self.approved_by {
            execution.approved_by = Some(actor.clone());
        }
        if let Some(reason) = &self.rejection_reason {
            execution.rejection_reason = Some(reason.clone());
        }
    }
}

/// One entry of an execution's status history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: ExecutionStatus,
    pub to: ExecutionStatus,
    pub at: DateTime<Utc>,
    pub details: Option<String>,
}

/// Result of a compare-and-set status write
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// Write applied; the execution as now persisted
    Applied(Execution),

    /// Another writer got there first. `current` is the status found, if the
    /// execution exists at all.
    Conflict { current: Option<ExecutionStatus> },
}

impl TransitionOutcome {
    pub fn applied(self) -> Option<Execution> {
        match self {
            TransitionOutcome::Applied(execution) => Some(execution),
            TransitionOutcome::Conflict { .. } => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, TransitionOutcome::Conflict { .. })
    }
}
