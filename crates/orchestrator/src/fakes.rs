//! In-process stand-ins for the external capabilities, for simulations and
//! tests. Responses are scripted per call; an empty script means success.

use async_trait::async_trait;
use autogift_types::{
    AutoGiftRule, CandidateProduct, CoordinatorError, FulfillmentResult, LineItem, NewOrder,
    NotificationKind, PaymentResult, PaymentStatus, ScheduledEvent, ShippingAddress,
};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::ports::{
    FulfillmentCoordinator, NotificationService, OrderGateway, PaymentCoordinator,
    ProductSelector, Selection,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

type Scripted<T> = Mutex<VecDeque<Result<T, CoordinatorError>>>;

// ═══════════════════════════════════════════════════════════════════════════
// PAYMENTS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct ChargeCall {
    pub order_id: String,
    pub amount: Decimal,
    pub payment_method_ref: String,
}

#[derive(Debug, Default)]
pub struct ScriptedPayments {
    charges: Scripted<PaymentResult>,
    verifications: Scripted<PaymentResult>,
    charge_calls: Mutex<Vec<ChargeCall>>,
    verify_calls: Mutex<Vec<String>>,
    yield_on_call: AtomicBool,
}

impl ScriptedPayments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the result of the next unscripted `charge`
    pub fn push_charge(&self, result: Result<PaymentResult, CoordinatorError>) {
        lock(&self.charges).push_back(result);
    }

    pub fn push_verify(&self, result: Result<PaymentResult, CoordinatorError>) {
        lock(&self.verifications).push_back(result);
    }

    pub fn charge_calls(&self) -> Vec<ChargeCall> {
        lock(&self.charge_calls).clone()
    }

    pub fn charge_count(&self) -> usize {
        lock(&self.charge_calls).len()
    }

    /// Suspend once inside every call, like a network round trip, so
    /// concurrent drivers interleave
    pub fn set_yielding(&self, yielding: bool) {
        self.yield_on_call.store(yielding, Ordering::SeqCst);
    }

    async fn round_trip(&self) {
        if self.yield_on_call.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
    }

    pub fn verify_count(&self) -> usize {
        lock(&self.verify_calls).len()
    }
}

#[async_trait]
impl PaymentCoordinator for ScriptedPayments {
    async fn charge(
        &self,
        order_id: &str,
        amount: Decimal,
        payment_method_ref: &str,
    ) -> Result<PaymentResult, CoordinatorError> {
        lock(&self.charge_calls).push(ChargeCall {
            order_id: order_id.to_string(),
            amount,
            payment_method_ref: payment_method_ref.to_string(),
        });
        self.round_trip().await;

        lock(&self.charges).pop_front().unwrap_or_else(|| {
            Ok(PaymentResult {
                status: PaymentStatus::Succeeded,
                reference: format!("pay-{order_id}"),
            })
        })
    }

    async fn verify(&self, reference: &str) -> Result<PaymentResult, CoordinatorError> {
        lock(&self.verify_calls).push(reference.to_string());
        self.round_trip().await;

        lock(&self.verifications).pop_front().unwrap_or_else(|| {
            Ok(PaymentResult {
                status: PaymentStatus::Succeeded,
                reference: reference.to_string(),
            })
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// FULFILLMENT
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
pub struct ScriptedFulfillment {
    submissions: Scripted<FulfillmentResult>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFulfillment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_result(&self, result: Result<FulfillmentResult, CoordinatorError>) {
        lock(&self.submissions).push_back(result);
    }

    /// Order ids submitted so far
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn submit_count(&self) -> usize {
        lock(&self.calls).len()
    }
}

#[async_trait]
impl FulfillmentCoordinator for ScriptedFulfillment {
    async fn submit(
        &self,
        order_id: &str,
        _line_items: &[LineItem],
        _address: &ShippingAddress,
    ) -> Result<FulfillmentResult, CoordinatorError> {
        lock(&self.calls).push(order_id.to_string());

        lock(&self.submissions).pop_front().unwrap_or_else(|| {
            Ok(FulfillmentResult::Accepted {
                fulfillment_ref: format!("ful-{order_id}"),
            })
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ORDERS
// ═══════════════════════════════════════════════════════════════════════════

/// Honours the execution-id idempotency key
#[derive(Debug, Default)]
pub struct RecordingOrders {
    failures: Mutex<VecDeque<CoordinatorError>>,
    orders: Mutex<HashMap<String, NewOrder>>,
    calls: Mutex<usize>,
}

impl RecordingOrders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next call with `error`
    pub fn push_failure(&self, error: CoordinatorError) {
        lock(&self.failures).push_back(error);
    }

    pub fn create_count(&self) -> usize {
        *lock(&self.calls)
    }

    pub fn order_count(&self) -> usize {
        lock(&self.orders).len()
    }

    pub fn order_for(&self, execution_id: &str) -> Option<NewOrder> {
        lock(&self.orders).get(execution_id).cloned()
    }
}

#[async_trait]
impl OrderGateway for RecordingOrders {
    async fn create_order(&self, order: &NewOrder) -> Result<String, CoordinatorError> {
        *lock(&self.calls) += 1;

        if let Some(error) = lock(&self.failures).pop_front() {
            return Err(error);
        }

        lock(&self.orders)
            .entry(order.execution_id.clone())
            .or_insert_with(|| order.clone());
        Ok(format!("order-{}", order.execution_id))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// NOTIFICATIONS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct SentNotification {
    pub user_id: String,
    pub kind: NotificationKind,
    pub payload: serde_json::Value,
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
    failing: Mutex<bool>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every delivery fail (still recorded)
    pub fn set_failing(&self, failing: bool) {
        *lock(&self.failing) = failing;
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        lock(&self.sent).clone()
    }

    pub fn count(&self, kind: NotificationKind) -> usize {
        lock(&self.sent).iter().filter(|n| n.kind == kind).count()
    }
}

#[async_trait]
impl NotificationService for RecordingNotifier {
    async fn notify(
        &self,
        user_id: &str,
        kind: NotificationKind,
        payload: serde_json::Value,
    ) -> Result<(), CoordinatorError> {
        lock(&self.sent).push(SentNotification {
            user_id: user_id.to_string(),
            kind,
            payload,
        });

        if *lock(&self.failing) {
            return Err(CoordinatorError::Unavailable {
                status: 503,
                message: "notification service down".to_string(),
            });
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// PRODUCT SELECTION
// ═══════════════════════════════════════════════════════════════════════════

/// Returns a fixed selection, optionally overridden per rule id
#[derive(Debug, Default)]
pub struct StaticSelector {
    default: Mutex<Selection>,
    per_rule: Mutex<HashMap<String, Selection>>,
    failures: Mutex<VecDeque<CoordinatorError>>,
    calls: Mutex<usize>,
}

impl StaticSelector {
    pub fn new(default: Selection) -> Self {
        Self {
            default: Mutex::new(default),
            ..Default::default()
        }
    }

    /// Selection of priced candidates at `confidence`
    pub fn with_products(products: &[(&str, Decimal)], confidence: f64) -> Self {
        let candidates = products
            .iter()
            .map(|(id, price)| CandidateProduct {
                product_id: Some(id.to_string()),
                name: Some(id.to_string()),
                price: Some(*price),
                quantity: Some(1),
                image_url: None,
            })
            .collect();

        Self::new(Selection {
            candidates,
            confidence,
        })
    }

    pub fn set_for_rule(&self, rule_id: &str, selection: Selection) {
        lock(&self.per_rule).insert(rule_id.to_string(), selection);
    }

    pub fn push_failure(&self, error: CoordinatorError) {
        lock(&self.failures).push_back(error);
    }

    pub fn call_count(&self) -> usize {
        *lock(&self.calls)
    }
}

#[async_trait]
impl ProductSelector for StaticSelector {
    async fn select(
        &self,
        rule: &AutoGiftRule,
        _event: &ScheduledEvent,
    ) -> Result<Selection, CoordinatorError> {
        *lock(&self.calls) += 1;

        if let Some(error) = lock(&self.failures).pop_front() {
            return Err(error);
        }

        if let Some(selection) = lock(&self.per_rule).get(&rule.id) {
            return Ok(selection.clone());
        }
        Ok(lock(&self.default).clone())
    }
}
