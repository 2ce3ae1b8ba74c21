use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// How products are chosen for a rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionCriteria {
    #[serde(default)]
    pub categories: Vec<String>,

    #[serde(default)]
    pub interests: Vec<String>,

    /// Owner asked to review every gift regardless of selection confidence
    #[serde(default)]
    pub always_require_approval: bool,
}

/// Standing instruction to send a gift automatically for an occasion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoGiftRule {
    pub id: String,
    pub owner_id: String,
    pub recipient_id: String,

    /// Occasion / date type, e.g. "birthday"
    pub occasion: String,

    /// Event the rule is attached to. For recurring occasions this is the
    /// first instance; `series_id` then identifies the whole series.
    pub event_id: String,
    pub series_id: Option<String>,

    pub budget_limit: Decimal,
    pub selection_criteria: SelectionCriteria,
    pub gift_message: Option<String>,

    /// Saved default payment method
    pub payment_method_ref: Option<String>,

    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AutoGiftRule {
    pub fn new(
        id: impl Into<String>,
        owner_id: impl Into<String>,
        recipient_id: impl Into<String>,
        occasion: impl Into<String>,
        event_id: impl Into<String>,
        budget_limit: Decimal,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            recipient_id: recipient_id.into(),
            occasion: occasion.into(),
            event_id: event_id.into(),
            series_id: None,
            budget_limit,
            selection_criteria: SelectionCriteria::default(),
            gift_message: None,
            payment_method_ref: None,
            is_active: true,
            created_at,
            updated_at: created_at,
        }
    }

    pub fn with_series(mut self, series_id: impl Into<String>) -> Self {
        self.series_id = Some(series_id.into());
        self
    }

    pub fn with_payment_method(mut self, payment_method_ref: impl Into<String>) -> Self {
        self.payment_method_ref = Some(payment_method_ref.into());
        self
    }

    pub fn with_gift_message(mut self, message: impl Into<String>) -> Self {
        self.gift_message = Some(message.into());
        self
    }

    pub fn with_criteria(mut self, criteria: SelectionCriteria) -> Self {
        self.selection_criteria = criteria;
        self
    }

    /// Message printed on the gift, falling back to the configured default
    pub fn message_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.gift_message
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(default)
    }
}
