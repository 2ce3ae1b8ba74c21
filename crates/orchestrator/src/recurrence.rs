//! Next-occurrence computation for recurring event series.
//!
//! Every occurrence is derived from the series template, never from the
//! previous instance, so edits to one instance (`is_modified`) do not carry
//! forward.

use autogift_store::{RuleStore, StoreError};
use autogift_types::{ScheduledEvent, SeriesTemplate};
use chrono::{DateTime, Months, NaiveDate, Utc};
use tracing::{debug, info};
use uuid::Uuid;

/// A computed, not yet persisted, series occurrence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occurrence {
    pub occurrence_number: u32,
    pub date: NaiveDate,
}

pub struct RecurrenceCalculator;

impl RecurrenceCalculator {
    /// Date of occurrence `n` (1-based): anchor plus `n - 1` intervals.
    /// Month-end anchors clamp per occurrence (Jan 31, Feb 28, Mar 31).
    pub fn occurrence_date(template: &SeriesTemplate, occurrence_number: u32) -> Option<NaiveDate> {
        match occurrence_number {
            0 => None,
            1 => Some(template.anchor_date),
            n => {
                let step = template.recurring_type.interval_months()?;
                let months = step.checked_mul(n - 1)?;
                template.anchor_date.checked_add_months(Months::new(months))
            }
        }
    }

    /// The occurrence after `current`, or `None` once the series has ended
    pub fn next_occurrence(template: &SeriesTemplate, current: u32) -> Option<Occurrence> {
        let next = current.checked_add(1)?;

        if let Some(max) = template.max_occurrences {
            if next > max {
                return None;
            }
        }

        let date = Self::occurrence_date(template, next)?;
        if let Some(end) = template.end_date {
            if date > end {
                return None;
            }
        }

        Some(Occurrence {
            occurrence_number: next,
            date,
        })
    }

    pub fn has_ended(template: &SeriesTemplate, current: u32) -> bool {
        Self::next_occurrence(template, current).is_none()
    }
}

/// Create the instance following `event` in its series. Idempotent: if the
/// next occurrence already exists nothing is created. Returns the new event.
pub async fn advance_series(
    rules: &dyn RuleStore,
    event: &ScheduledEvent,
    at: DateTime<Utc>,
) -> Result<Option<ScheduledEvent>, StoreError> {
    let Some(series_id) = &event.series_id else {
        return Ok(None);
    };

    let template = rules
        .get_series(series_id)
        .await?
        .ok_or_else(|| StoreError::NotFound(series_id.clone()))?;

    let Some(next) = RecurrenceCalculator::next_occurrence(&template, event.occurrence_number)
    else {
        info!(
            series_id = %series_id,
            occurrence_number = event.occurrence_number,
            "Series has ended"
        );
        return Ok(None);
    };

    let instance = template.instance(
        Uuid::new_v4().to_string(),
        next.occurrence_number,
        next.date,
        at,
    );

    match rules.create_event(&instance).await {
        Ok(()) => {
            info!(
                series_id = %series_id,
                event_id = %instance.id,
                occurrence_number = next.occurrence_number,
                date = %next.date,
                "Created next series occurrence"
            );
            Ok(Some(instance))
        }
        Err(StoreError::DuplicateOccurrence { .. }) => {
            debug!(
                series_id = %series_id,
                occurrence_number = next.occurrence_number,
                "Next occurrence already exists"
            );
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
