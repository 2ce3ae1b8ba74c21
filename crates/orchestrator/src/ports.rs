//! Interfaces to the capabilities the pipeline drives but does not own.
//! Each is injected so the orchestrator can be built with fakes.

use async_trait::async_trait;
use autogift_types::{
    AutoGiftRule, CandidateProduct, CoordinatorError, FulfillmentResult, LineItem, NewOrder,
    NotificationKind, PaymentResult, ScheduledEvent, ShippingAddress,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// External payment capability
#[async_trait]
pub trait PaymentCoordinator: Send + Sync {
    /// Charge `amount` against `payment_method_ref` for `order_id`
    async fn charge(
        &self,
        order_id: &str,
        amount: Decimal,
        payment_method_ref: &str,
    ) -> Result<PaymentResult, CoordinatorError>;

    /// Re-check a payment previously reported as pending
    async fn verify(&self, reference: &str) -> Result<PaymentResult, CoordinatorError>;
}

/// External fulfillment vendor
#[async_trait]
pub trait FulfillmentCoordinator: Send + Sync {
    async fn submit(
        &self,
        order_id: &str,
        line_items: &[LineItem],
        address: &ShippingAddress,
    ) -> Result<FulfillmentResult, CoordinatorError>;
}

/// Checkout subsystem. Implementations must treat `execution_id` as an
/// idempotency key and return the existing order id on a repeat.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn create_order(&self, order: &NewOrder) -> Result<String, CoordinatorError>;
}

/// Owner notifications (email, push, in-app)
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn notify(
        &self,
        user_id: &str,
        kind: NotificationKind,
        payload: serde_json::Value,
    ) -> Result<(), CoordinatorError>;
}

/// Candidates proposed by catalog search for one rule/event pair
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub candidates: Vec<CandidateProduct>,
    /// How well the candidates match the rule's criteria, 0..=1
    pub confidence: f64,
}

/// Catalog search and ranking
#[async_trait]
pub trait ProductSelector: Send + Sync {
    async fn select(
        &self,
        rule: &AutoGiftRule,
        event: &ScheduledEvent,
    ) -> Result<Selection, CoordinatorError>;
}

/// Send a notification; a failure is logged and otherwise ignored.
pub(crate) async fn notify_quietly(
    notifier: &dyn NotificationService,
    user_id: &str,
    kind: NotificationKind,
    payload: serde_json::Value,
) {
    if let Err(e) = notifier.notify(user_id, kind, payload).await {
        warn!(
            user_id = %user_id,
            kind = kind.as_str(),
            error = %e,
            "Notification failed"
        );
    }
}
