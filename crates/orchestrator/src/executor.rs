//! The three sub-steps of `processing`: order materialization, payment and
//! fulfillment. Each step first checks whether its work is already recorded
//! on the execution and skips if so; progress is persisted after every step,
//! so re-running the pipeline on the same execution resumes where it stopped.

use autogift_metrics::MetricsCollector;
use autogift_retry::{FailureClass, RetryPolicy};
use autogift_store::{ExecutionStore, StoreError};
use autogift_types::{
    Clock, CoordinatorError, Execution, ExecutionStatus, ExecutionUpdate, FulfillmentRecord,
    FulfillmentResult, GiftFailure, NewOrder, PaymentRecord, PaymentStatus, PipelineStep,
    ShippingAddress, TransitionOutcome,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ports::{FulfillmentCoordinator, OrderGateway, PaymentCoordinator};

/// Where a pipeline run stopped without failing
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineProgress {
    /// Order, payment and fulfillment are all recorded
    Fulfilled(Execution),

    /// The payment processor reported `pending`; the recovery scanner
    /// re-verifies it later
    AwaitingPayment(Execution),
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error("{failure}")]
    Failed {
        failure: GiftFailure,
        class: FailureClass,
    },

    /// The claim was lost: another driver took the execution over or moved
    /// it out of `processing`
    #[error("execution claim lost (now {current:?})")]
    Conflict { current: Option<ExecutionStatus> },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl StepError {
    fn validation(step: PipelineStep, message: impl Into<String>) -> Self {
        StepError::Failed {
            failure: GiftFailure::validation(step, message),
            class: FailureClass::Permanent,
        }
    }

    fn external(step: PipelineStep, class: FailureClass, detail: String) -> Self {
        let failure = if class.is_transient() {
            GiftFailure::TransientExternal { step, detail }
        } else {
            GiftFailure::PermanentExternal { step, detail }
        };
        StepError::Failed { failure, class }
    }

    fn coordinator(step: PipelineStep, error: &CoordinatorError) -> Self {
        Self::external(step, RetryPolicy::classify_error(error), error.to_string())
    }
}

enum PaymentProgress {
    Settled(Execution),
    Pending(Execution),
}

/// Runs the `processing` sub-steps for one execution the caller has
/// claimed. Every write is conditional on the claim token.
pub struct PipelineExecutor {
    store: Arc<dyn ExecutionStore>,
    orders: Arc<dyn OrderGateway>,
    payments: Arc<dyn PaymentCoordinator>,
    fulfillment: Arc<dyn FulfillmentCoordinator>,
    clock: Arc<dyn Clock>,
    metrics: MetricsCollector,
}

impl PipelineExecutor {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        orders: Arc<dyn OrderGateway>,
        payments: Arc<dyn PaymentCoordinator>,
        fulfillment: Arc<dyn FulfillmentCoordinator>,
        clock: Arc<dyn Clock>,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            store,
            orders,
            payments,
            fulfillment,
            clock,
            metrics,
        }
    }

    /// Run every step not yet recorded on `execution`, in order, as the
    /// holder of `token`
    pub async fn run(
        &self,
        execution: Execution,
        token: &str,
        gift_message: &str,
    ) -> Result<PipelineProgress, StepError> {
        let execution = self.ensure_order(execution, token, gift_message).await?;

        let execution = match self.ensure_payment(execution, token).await? {
            PaymentProgress::Settled(execution) => execution,
            PaymentProgress::Pending(execution) => {
                return Ok(PipelineProgress::AwaitingPayment(execution))
            }
        };

        let execution = self.ensure_fulfillment(execution, token).await?;
        Ok(PipelineProgress::Fulfilled(execution))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // STEP 1: ORDER
    // ═══════════════════════════════════════════════════════════════════════════

    async fn ensure_order(
        &self,
        execution: Execution,
        token: &str,
        gift_message: &str,
    ) -> Result<Execution, StepError> {
        if let Some(order_id) = &execution.order_id {
            debug!(execution_id = %execution.id, order_id = %order_id, "Order already exists");
            return Ok(execution);
        }

        if execution.selected_products.is_empty() {
            return Err(StepError::validation(
                PipelineStep::OrderCreation,
                "No products were selected for this gift.",
            ));
        }
        for item in &execution.selected_products {
            if let Err(e) = item.validate() {
                return Err(StepError::validation(
                    PipelineStep::OrderCreation,
                    format!("A selected product is invalid: {e}."),
                ));
            }
        }
        let address = resolved_address(&execution, PipelineStep::OrderCreation)?;

        let order = NewOrder {
            execution_id: execution.id.clone(),
            owner_id: execution.owner_id.clone(),
            line_items: execution.selected_products.clone(),
            shipping_address: address.clone(),
            gift_message: gift_message.to_string(),
            total_amount: execution.total_amount,
        };

        let order_id = self
            .orders
            .create_order(&order)
            .await
            .map_err(|e| StepError::coordinator(PipelineStep::OrderCreation, &e))?;

        info!(execution_id = %execution.id, order_id = %order_id, "Order created");

        self.record(
            &execution.id,
            token,
            ExecutionUpdate::new()
                .with_order_id(order_id.clone())
                .with_details(format!("order {order_id} created")),
        )
        .await
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // STEP 2: PAYMENT
    // ═══════════════════════════════════════════════════════════════════════════

    async fn ensure_payment(
        &self,
        execution: Execution,
        token: &str,
    ) -> Result<PaymentProgress, StepError> {
        if execution.payment_succeeded() {
            debug!(execution_id = %execution.id, "Payment already succeeded");
            return Ok(PaymentProgress::Settled(execution));
        }

        let payment_method_ref = execution.payment_method_ref.clone().ok_or_else(|| {
            StepError::validation(
                PipelineStep::Payment,
                "No payment method is on file for this gift.",
            )
        })?;
        let order_id = execution.order_id.clone().ok_or_else(|| {
            StepError::validation(PipelineStep::Payment, "The order for this gift is missing.")
        })?;

        // A pending charge is verified, never charged again
        let result = match execution.payment.as_ref().filter(|_| execution.payment_pending()) {
            Some(previous) => {
                debug!(execution_id = %execution.id, reference = %previous.reference, "Verifying pending payment");
                self.payments.verify(&previous.reference).await
            }
            None => {
                self.payments
                    .charge(&order_id, execution.total_amount, &payment_method_ref)
                    .await
            }
        };

        let result = match result {
            Ok(result) => result,
            Err(e) => {
                self.metrics.record_payment_attempt("error");
                return Err(StepError::coordinator(PipelineStep::Payment, &e));
            }
        };
        self.metrics.record_payment_attempt(result.status.as_str());

        let record = PaymentRecord {
            reference: result.reference.clone(),
            status: result.status,
            amount: execution.total_amount,
            payment_method_ref,
            recorded_at: self.clock.now(),
        };
        let execution = self
            .record(
                &execution.id,
                token,
                ExecutionUpdate::new()
                    .with_payment(record)
                    .with_details(format!("payment {} {}", result.reference, result.status.as_str())),
            )
            .await?;

        match result.status {
            PaymentStatus::Succeeded => {
                info!(execution_id = %execution.id, reference = %result.reference, "Payment succeeded");
                Ok(PaymentProgress::Settled(execution))
            }
            PaymentStatus::Pending => {
                info!(execution_id = %execution.id, reference = %result.reference, "Payment pending");
                Ok(PaymentProgress::Pending(execution))
            }
            PaymentStatus::Failed => Err(StepError::external(
                PipelineStep::Payment,
                FailureClass::Permanent,
                format!("payment {} failed", result.reference),
            )),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // STEP 3: FULFILLMENT
    // ═══════════════════════════════════════════════════════════════════════════

    async fn ensure_fulfillment(
        &self,
        execution: Execution,
        token: &str,
    ) -> Result<Execution, StepError> {
        if let Some(fulfillment) = &execution.fulfillment {
            debug!(
                execution_id = %execution.id,
                fulfillment_ref = %fulfillment.reference,
                "Fulfillment already submitted"
            );
            return Ok(execution);
        }

        let address = resolved_address(&execution, PipelineStep::Fulfillment)?;
        let order_id = execution.order_id.as_deref().ok_or_else(|| {
            StepError::validation(
                PipelineStep::Fulfillment,
                "The order for this gift is missing.",
            )
        })?;

        let result = self
            .fulfillment
            .submit(order_id, &execution.selected_products, address)
            .await;

        match result {
            Ok(FulfillmentResult::Accepted { fulfillment_ref }) => {
                self.metrics.record_fulfillment("accepted");
                info!(
                    execution_id = %execution.id,
                    fulfillment_ref = %fulfillment_ref,
                    "Fulfillment accepted"
                );

                let record = FulfillmentRecord {
                    reference: fulfillment_ref.clone(),
                    submitted_at: self.clock.now(),
                };
                self.record(
                    &execution.id,
                    token,
                    ExecutionUpdate::new()
                        .with_fulfillment(record)
                        .with_details(format!("fulfillment {fulfillment_ref} accepted")),
                )
                .await
            }
            Ok(FulfillmentResult::Rejected { reason, detail }) => {
                self.metrics.record_fulfillment("rejected");
                warn!(
                    execution_id = %execution.id,
                    reason = %reason,
                    detail = %detail,
                    "Fulfillment rejected"
                );
                Err(StepError::external(
                    PipelineStep::Fulfillment,
                    RetryPolicy::classify_rejection(reason),
                    format!("{reason}: {detail}"),
                ))
            }
            Err(e) => {
                self.metrics.record_fulfillment("error");
                Err(StepError::coordinator(PipelineStep::Fulfillment, &e))
            }
        }
    }

    /// Persist step progress. The write is conditional on the execution
    /// still being `processing` under our claim.
    async fn record(
        &self,
        id: &str,
        token: &str,
        update: ExecutionUpdate,
    ) -> Result<Execution, StepError> {
        let outcome = self
            .store
            .update_claimed(
                id,
                token,
                ExecutionStatus::Processing,
                update,
                self.clock.now(),
            )
            .await?;

        match outcome {
            TransitionOutcome::Applied(execution) => Ok(execution),
            TransitionOutcome::Conflict { current } => Err(StepError::Conflict { current }),
        }
    }
}

fn resolved_address(
    execution: &Execution,
    step: PipelineStep,
) -> Result<&ShippingAddress, StepError> {
    execution
        .address_metadata
        .as_ref()
        .filter(|address| address.is_complete())
        .ok_or_else(|| {
            StepError::validation(step, "The recipient's shipping address could not be resolved.")
        })
}
