use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ShippingAddress;

/// Repetition interval of an event series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecurringType {
    None,
    Monthly,
    Yearly,
}

impl RecurringType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecurringType::None => "none",
            RecurringType::Monthly => "monthly",
            RecurringType::Yearly => "yearly",
        }
    }

    /// Months in one interval, `None` for one-off events
    pub fn interval_months(&self) -> Option<u32> {
        match self {
            RecurringType::None => None,
            RecurringType::Monthly => Some(1),
            RecurringType::Yearly => Some(12),
        }
    }
}

impl fmt::Display for RecurringType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecurringType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(RecurringType::None),
            "monthly" => Ok(RecurringType::Monthly),
            "yearly" => Ok(RecurringType::Yearly),
            other => Err(format!("unknown recurring type: {other}")),
        }
    }
}

/// A calendar occurrence, optionally one instance of a recurring series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub id: String,
    pub owner_id: String,
    pub recipient_id: String,
    pub title: String,
    pub date: NaiveDate,
    pub recipient_address: Option<ShippingAddress>,

    pub series_id: Option<String>,
    pub recurring_type: RecurringType,
    pub end_date: Option<NaiveDate>,
    pub max_occurrences: Option<u32>,
    pub occurrence_number: u32,

    /// Set once this instance diverges from its series template
    pub is_modified: bool,

    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ScheduledEvent {
    /// A standalone, non-recurring event
    pub fn one_off(
        id: impl Into<String>,
        owner_id: impl Into<String>,
        recipient_id: impl Into<String>,
        title: impl Into<String>,
        date: NaiveDate,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            recipient_id: recipient_id.into(),
            title: title.into(),
            date,
            recipient_address: None,
            series_id: None,
            recurring_type: RecurringType::None,
            end_date: None,
            max_occurrences: None,
            occurrence_number: 1,
            is_modified: false,
            completed_at: None,
            created_at,
        }
    }

    pub fn with_address(mut self, address: ShippingAddress) -> Self {
        self.recipient_address = Some(address);
        self
    }

    pub fn is_recurring(&self) -> bool {
        self.recurring_type != RecurringType::None
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Recurring events must belong to a series; one-off events must not
    pub fn is_consistent(&self) -> bool {
        self.is_recurring() == self.series_id.is_some() && self.occurrence_number >= 1
    }
}

/// Template every instance of a recurring series is generated from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesTemplate {
    pub series_id: String,
    pub owner_id: String,
    pub recipient_id: String,
    pub title: String,

    /// Date of occurrence number 1
    pub anchor_date: NaiveDate,
    pub recipient_address: Option<ShippingAddress>,
    pub recurring_type: RecurringType,
    pub end_date: Option<NaiveDate>,
    pub max_occurrences: Option<u32>,
    pub created_at: DateTime<Utc>,
}

impl SeriesTemplate {
    /// Instance `occurrence_number` of this series dated `date`
    pub fn instance(
        &self,
        event_id: impl Into<String>,
        occurrence_number: u32,
        date: NaiveDate,
        created_at: DateTime<Utc>,
    ) -> ScheduledEvent {
        ScheduledEvent {
            id: event_id.into(),
            owner_id: self.owner_id.clone(),
            recipient_id: self.recipient_id.clone(),
            title: self.title.clone(),
            date,
            recipient_address: self.recipient_address.clone(),
            series_id: Some(self.series_id.clone()),
            recurring_type: self.recurring_type,
            end_date: self.end_date,
            max_occurrences: self.max_occurrences,
            occurrence_number,
            is_modified: false,
            completed_at: None,
            created_at,
        }
    }

    /// The first instance, created directly alongside the template
    pub fn first_instance(&self, event_id: impl Into<String>, created_at: DateTime<Utc>) -> ScheduledEvent {
        self.instance(event_id, 1, self.anchor_date, created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> SeriesTemplate {
        SeriesTemplate {
            series_id: "series-1".to_string(),
            owner_id: "owner".to_string(),
            recipient_id: "alex".to_string(),
            title: "Alex's Birthday".to_string(),
            anchor_date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            recipient_address: None,
            recurring_type: RecurringType::Yearly,
            end_date: None,
            max_occurrences: Some(3),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_first_instance_belongs_to_series() {
        let event = template().first_instance("e1", Utc::now());
        assert_eq!(event.occurrence_number, 1);
        assert_eq!(event.series_id.as_deref(), Some("series-1"));
        assert!(event.is_consistent());
    }

    #[test]
    fn test_one_off_is_consistent() {
        let event = ScheduledEvent::one_off(
            "e1",
            "owner",
            "alex",
            "Graduation",
            NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            Utc::now(),
        );
        assert!(!event.is_recurring());
        assert!(event.is_consistent());
    }

    #[test]
    fn test_recurring_type_parse() {
        assert_eq!("yearly".parse::<RecurringType>(), Ok(RecurringType::Yearly));
        assert!("weekly".parse::<RecurringType>().is_err());
    }
}
