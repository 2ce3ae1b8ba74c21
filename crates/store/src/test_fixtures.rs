use autogift_types::{
    AutoGiftRule, Execution, LineItem, RecurringType, ScheduledEvent, SeriesTemplate,
    ShippingAddress,
};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()
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

pub fn make_rule(id: &str, event_id: &str) -> AutoGiftRule {
    AutoGiftRule::new(id, "owner-1", "alex", "birthday", event_id, Decimal::from(50), now())
        .with_payment_method("pm-default")
}

pub fn make_event(id: &str) -> ScheduledEvent {
    ScheduledEvent::one_off(
        id,
        "owner-1",
        "alex",
        "Alex's Birthday",
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
        now(),
    )
    .with_address(address())
}

pub fn make_series(series_id: &str, max_occurrences: Option<u32>) -> SeriesTemplate {
    SeriesTemplate {
        series_id: series_id.to_string(),
        owner_id: "owner-1".to_string(),
        recipient_id: "alex".to_string(),
        title: "Alex's Birthday".to_string(),
        anchor_date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
        recipient_address: Some(address()),
        recurring_type: RecurringType::Yearly,
        end_date: None,
        max_occurrences,
        created_at: now(),
    }
}

pub fn make_execution(id: &str, rule_id: &str, event_id: &str) -> Execution {
    let rule = make_rule(rule_id, event_id);
    let event = make_event(event_id);
    let items = vec![
        LineItem::new("sku-1", "Mug", Decimal::from_str("12.50").unwrap(), 1).unwrap(),
        LineItem::new("sku-2", "Candle", Decimal::from_str("20.00").unwrap(), 1).unwrap(),
    ];
    Execution::candidate(id, &rule, &event, items, 0.9, now())
}
