//! End-to-end gift lifecycles: scheduler tick, approval gate, pipeline and
//! series advancement against an in-memory store and fake capabilities.

use autogift::orchestrator::fakes::{
    RecordingNotifier, RecordingOrders, ScriptedFulfillment, ScriptedPayments, StaticSelector,
};
use autogift::orchestrator::ApprovalError;
use autogift::types::{
    AutoGiftRule, ManualClock, NotificationKind, RecurringType, ScheduledEvent, SeriesTemplate,
    ShippingAddress,
};
use autogift::{
    AppConfig, ExecutionStatus, ExecutionStore, GateOutcome, InMemoryStore, Ports,
    ProcessOutcome, RuleStore, Runtime,
};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

// ═══════════════════════════════════════════════════════════════════════════
// SETUP
// ═══════════════════════════════════════════════════════════════════════════

struct World {
    store: Arc<InMemoryStore>,
    clock: Arc<ManualClock>,
    payments: Arc<ScriptedPayments>,
    orders: Arc<RecordingOrders>,
    notifier: Arc<RecordingNotifier>,
    selector: Arc<StaticSelector>,
    runtime: Runtime,
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn address() -> ShippingAddress {
    ShippingAddress {
        recipient_name: "Sam Rivera".to_string(),
        line1: "42 Elm St".to_string(),
        line2: Some("Apt 3".to_string()),
        city: "Portland".to_string(),
        region: Some("OR".to_string()),
        postal_code: "97201".to_string(),
        country: "US".to_string(),
    }
}

fn world(confidence: f64) -> World {
    let store = Arc::new(InMemoryStore::new());
    let clock = Arc::new(ManualClock::new(start()));
    let payments = Arc::new(ScriptedPayments::new());
    let orders = Arc::new(RecordingOrders::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let selector = Arc::new(StaticSelector::with_products(
        &[("scarf", dec("24.00")), ("tea-set", dec("18.50"))],
        confidence,
    ));

    let ports = Ports {
        payments: payments.clone(),
        fulfillment: Arc::new(ScriptedFulfillment::new()),
        orders: orders.clone(),
        notifier: notifier.clone(),
        selector: selector.clone(),
    };
    let runtime = Runtime::from_config(
        &AppConfig::local(),
        store.clone(),
        store.clone(),
        ports,
        clock.clone(),
    )
    .unwrap();

    World {
        store,
        clock,
        payments,
        orders,
        notifier,
        selector,
        runtime,
    }
}

fn birthday_rule() -> AutoGiftRule {
    AutoGiftRule::new(
        "rule-sam",
        "owner-1",
        "sam",
        "birthday",
        "event-sam",
        Decimal::from(50),
        start(),
    )
    .with_payment_method("pm-visa")
    .with_gift_message("Happy birthday, Sam!")
}

async fn seed_one_off(world: &World, rule: AutoGiftRule) {
    let event = ScheduledEvent::one_off(
        "event-sam",
        "owner-1",
        "sam",
        "Sam's Birthday",
        date(2025, 6, 1),
        start(),
    )
    .with_address(address());
    world.store.create_event(&event).await.unwrap();
    world.store.create_rule(&rule).await.unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════
// LIFECYCLES
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_auto_approved_gift_completes() -> anyhow::Result<()> {
    // 1. Rule with a $50 budget and an event due today
    // 2. Scheduler creates a pending execution
    // 3. Confidence is above threshold, so the gate releases it
    // 4. Payment and fulfillment succeed
    let world = world(0.92);
    seed_one_off(&world, birthday_rule()).await;

    let tick = world.runtime.tick_scheduler().await?;
    assert_eq!(tick.report.created.len(), 1);

    let id = &tick.report.created[0];
    let execution = world.store.get_execution(id).await?.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.order_id.as_deref(), Some(format!("order-{id}").as_str()));
    assert_eq!(execution.retry_count, 0);
    assert_eq!(execution.total_amount, dec("42.50"));
    assert_eq!(execution.approved_by.as_deref(), Some("auto"));

    let order = world.orders.order_for(id).unwrap();
    assert_eq!(order.gift_message, "Happy birthday, Sam!");
    assert_eq!(order.shipping_address, address());

    assert!(world
        .store
        .get_event("event-sam")
        .await?
        .unwrap()
        .is_completed());
    assert_eq!(world.notifier.count(NotificationKind::GiftSent), 1);

    // A later tick finds the event handled and creates nothing
    world.clock.advance(Duration::hours(1));
    let tick = world.runtime.tick_scheduler().await?;
    assert!(tick.report.created.is_empty());
    assert_eq!(world.payments.charge_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_human_approval_selects_subset() -> anyhow::Result<()> {
    // 1. Low confidence parks the execution in pending_approval
    // 2. Empty approval is refused and changes nothing
    // 3. Approving one product charges only that product
    let world = world(0.4);
    seed_one_off(&world, birthday_rule()).await;

    let tick = world.runtime.tick_scheduler().await?;
    let (id, outcome) = &tick.gated[0];
    assert!(matches!(outcome, GateOutcome::AwaitingApproval(_)));
    assert_eq!(world.notifier.count(NotificationKind::ApprovalRequested), 1);

    let err = world
        .runtime
        .gate
        .approve(id, &[], "owner-1", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::EmptySelection));

    let execution = world.store.get_execution(id).await?.unwrap();
    assert_eq!(execution.status, ExecutionStatus::PendingApproval);
    assert_eq!(execution.total_amount, dec("42.50"));

    let outcome = world
        .runtime
        .gate
        .approve(id, &["tea-set".to_string()], "owner-1", None)
        .await?;
    let GateOutcome::Approved(ProcessOutcome::Completed(execution)) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(execution.total_amount, dec("18.50"));
    assert_eq!(world.payments.charge_calls()[0].amount, dec("18.50"));

    // The scheduler does not mistake the pending approval for a free slot
    assert_eq!(world.store.list_for_pair("rule-sam", "event-sam").await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_rejection_creates_no_order() -> anyhow::Result<()> {
    let world = world(0.4);
    seed_one_off(&world, birthday_rule()).await;

    let tick = world.runtime.tick_scheduler().await?;
    let id = tick.report.created[0].clone();

    let outcome = world
        .runtime
        .gate
        .reject(&id, Some("already bought one".to_string()), "owner-1")
        .await?;
    assert!(matches!(outcome, GateOutcome::Rejected(_)));
    assert_eq!(world.orders.create_count(), 0);
    assert_eq!(world.notifier.count(NotificationKind::GiftRejected), 1);

    let history = world.runtime.orchestrator.history(&id).await?;
    assert_eq!(history.last().map(|t| t.to), Some(ExecutionStatus::Rejected));
    Ok(())
}

#[tokio::test]
async fn test_disabling_rule_does_not_cancel_inflight() -> anyhow::Result<()> {
    let world = world(0.4);
    seed_one_off(&world, birthday_rule()).await;

    let tick = world.runtime.tick_scheduler().await?;
    let id = tick.report.created[0].clone();

    world
        .store
        .set_rule_active("rule-sam", false, start())
        .await?;

    let outcome = world
        .runtime
        .gate
        .approve(&id, &["scarf".to_string()], "owner-1", None)
        .await?;
    assert!(matches!(
        outcome,
        GateOutcome::Approved(ProcessOutcome::Completed(_))
    ));

    let tick = world.runtime.tick_scheduler().await?;
    assert_eq!(tick.report.rules_examined, 0);
    Ok(())
}

#[tokio::test]
async fn test_yearly_series_stops_at_max_occurrences() -> anyhow::Result<()> {
    // Two-occurrence yearly series: one gift per year, then nothing
    let world = world(0.95);
    let template = SeriesTemplate {
        series_id: "series-sam".to_string(),
        owner_id: "owner-1".to_string(),
        recipient_id: "sam".to_string(),
        title: "Sam's Birthday".to_string(),
        anchor_date: date(2025, 6, 1),
        recipient_address: Some(address()),
        recurring_type: RecurringType::Yearly,
        end_date: None,
        max_occurrences: Some(2),
        created_at: start(),
    };
    world.store.create_series(&template).await?;
    world
        .store
        .create_event(&template.first_instance("event-sam", start()))
        .await?;
    world
        .store
        .create_rule(&birthday_rule().with_series("series-sam"))
        .await?;

    let first = world.runtime.tick_scheduler().await?;
    assert_eq!(first.report.created.len(), 1);

    let events = world.store.list_series_events("series-sam").await?;
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].date, date(2026, 6, 1));

    world.clock.set(Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap());
    let second = world.runtime.tick_scheduler().await?;
    assert_eq!(second.report.created.len(), 1);

    let execution = world
        .store
        .get_execution(&second.report.created[0])
        .await?
        .unwrap();
    assert_eq!(execution.event_id, events[1].id);
    assert_eq!(execution.status, ExecutionStatus::Completed);

    // Series exhausted: no third occurrence, nothing further scheduled
    assert_eq!(world.store.list_series_events("series-sam").await?.len(), 2);
    world.clock.set(Utc.with_ymd_and_hms(2027, 6, 1, 9, 0, 0).unwrap());
    let third = world.runtime.tick_scheduler().await?;
    assert!(third.report.created.is_empty());
    assert_eq!(world.selector.call_count(), 2);
    Ok(())
}
