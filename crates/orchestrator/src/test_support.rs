use autogift_config::AppConfig;
use autogift_metrics::MetricsCollector;
use autogift_store::{ExecutionStore, InMemoryStore, RuleStore};
use autogift_types::{
    AutoGiftRule, Execution, ExecutionStatus, ExecutionUpdate, LineItem, ManualClock,
    RecurringType, ScheduledEvent, SeriesTemplate, ShippingAddress,
};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

use crate::executor::PipelineExecutor;
use crate::fakes::{
    RecordingNotifier, RecordingOrders, ScriptedFulfillment, ScriptedPayments, StaticSelector,
};
use crate::runtime::{Ports, Runtime};

/// Claim token used when a test drives the executor directly
pub const TEST_CLAIM: &str = "test-driver";

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()
}

pub fn today() -> NaiveDate {
    now().date_naive()
}

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

pub fn address() -> ShippingAddress {
    ShippingAddress {
        recipient_name: "Alex Doe".to_string(),
        line1: "1 Main St".to_string(),
        line2: None,
        city: "Springfield".to_string(),
        region: Some("IL".to_string()),
        postal_code: "62701".to_string(),
        country: "US".to_string(),
    }
}

pub fn series(series_id: &str, recurring_type: RecurringType, anchor_date: NaiveDate) -> SeriesTemplate {
    SeriesTemplate {
        series_id: series_id.to_string(),
        owner_id: "owner-1".to_string(),
        recipient_id: "alex".to_string(),
        title: "Alex's Birthday".to_string(),
        anchor_date,
        recipient_address: Some(address()),
        recurring_type,
        end_date: None,
        max_occurrences: None,
        created_at: now(),
    }
}

pub fn one_off_event(id: &str, date: NaiveDate) -> ScheduledEvent {
    ScheduledEvent::one_off(id, "owner-1", "alex", "Alex's Birthday", date, now())
        .with_address(address())
}

pub fn rule(id: &str, event_id: &str) -> AutoGiftRule {
    AutoGiftRule::new(id, "owner-1", "alex", "birthday", event_id, Decimal::from(50), now())
        .with_payment_method("pm-default")
}

pub fn items() -> Vec<LineItem> {
    vec![
        LineItem::new("sku-1", "Mug", dec("12.50"), 1).unwrap(),
        LineItem::new("sku-2", "Candle", dec("20.00"), 1).unwrap(),
    ]
}

/// Runtime over an in-memory store, fake ports and a manual clock set to
/// `now()`
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<ManualClock>,
    pub payments: Arc<ScriptedPayments>,
    pub fulfillment: Arc<ScriptedFulfillment>,
    pub orders: Arc<RecordingOrders>,
    pub notifier: Arc<RecordingNotifier>,
    pub selector: Arc<StaticSelector>,
    pub runtime: Runtime,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(AppConfig::local())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(now()));
        let payments = Arc::new(ScriptedPayments::new());
        let fulfillment = Arc::new(ScriptedFulfillment::new());
        let orders = Arc::new(RecordingOrders::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let selector = Arc::new(StaticSelector::with_products(
            &[("sku-1", dec("12.50")), ("sku-2", dec("20.00"))],
            0.9,
        ));

        let ports = Ports {
            payments: payments.clone(),
            fulfillment: fulfillment.clone(),
            orders: orders.clone(),
            notifier: notifier.clone(),
            selector: selector.clone(),
        };

        let runtime = Runtime::from_config(
            &config,
            store.clone(),
            store.clone(),
            ports,
            clock.clone(),
        )
        .unwrap();

        Self {
            store,
            clock,
            payments,
            fulfillment,
            orders,
            notifier,
            selector,
            runtime,
        }
    }

    /// A standalone executor over the same store and ports
    pub fn executor(&self) -> PipelineExecutor {
        PipelineExecutor::new(
            self.store.clone(),
            self.orders.clone(),
            self.payments.clone(),
            self.fulfillment.clone(),
            self.clock.clone(),
            MetricsCollector::new(),
        )
    }

    /// rule-1 for a one-off event-1 dated today
    pub async fn seed_rule(&self) -> (AutoGiftRule, ScheduledEvent) {
        let event = one_off_event("event-1", today());
        let rule = rule("rule-1", "event-1");
        self.store.create_event(&event).await.unwrap();
        self.store.create_rule(&rule).await.unwrap();
        (rule, event)
    }

    /// `pending` execution for rule-1/event-1 with the two standard items
    pub async fn seed_pending(&self, id: &str, confidence: f64) -> Execution {
        let (rule, event) = self.seed_rule().await;
        let execution = Execution::candidate(id, &rule, &event, items(), confidence, now());
        self.store.create_execution(&execution).await.unwrap();
        execution
    }

    /// Same as `seed_pending`, then moved into `processing`
    pub async fn seed_processing(&self, id: &str) -> Execution {
        self.seed_pending(id, 0.9).await;
        self.store
            .conditional_update_status(
                id,
                ExecutionStatus::Pending,
                ExecutionStatus::Processing,
                ExecutionUpdate::new().with_approver("test"),
                now(),
            )
            .await
            .unwrap()
            .applied()
            .unwrap()
    }

    /// Same as `seed_processing`, then claimed with `TEST_CLAIM`
    pub async fn seed_claimed(&self, id: &str) -> Execution {
        self.seed_processing(id).await;
        self.store
            .acquire_claim(id, TEST_CLAIM, now(), now())
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn get(&self, id: &str) -> Execution {
        self.store.get_execution(id).await.unwrap().unwrap()
    }
}
