//! Daily driver that turns due events into `pending` executions.

use autogift_metrics::MetricsCollector;
use autogift_store::{ExecutionStore, RuleStore, StoreError};
use autogift_types::{
    AutoGiftRule, Clock, CoordinatorError, Execution, LineItem, ScheduledEvent,
};
use chrono::{Days, NaiveDate};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::ports::ProductSelector;
use crate::recurrence::advance_series;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("product selection failed for rule {rule_id}: {source}")]
    Selection {
        rule_id: String,
        source: CoordinatorError,
    },
}

/// What the scheduler did with one rule
#[derive(Debug, Clone, PartialEq)]
pub enum RuleDecision {
    Created(Execution),
    /// An execution already exists for the (rule, event) pair
    AlreadyScheduled,
    NotDue,
    /// The event date passed without an execution
    Missed,
    /// Every proposed candidate failed validation
    NoCandidates,
    /// The event was already handled, or the series has no open instance
    NoOpenEvent,
}

/// Counts from one scheduler pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulerReport {
    pub as_of: Option<NaiveDate>,
    pub rules_examined: usize,
    /// Ids of the executions created
    pub created: Vec<String>,
    pub already_scheduled: usize,
    pub not_due: usize,
    pub missed: usize,
    pub no_candidates: usize,
    pub errors: usize,
}

impl SchedulerReport {
    fn record(&mut self, decision: &RuleDecision) {
        match decision {
            RuleDecision::Created(execution) => self.created.push(execution.id.clone()),
            RuleDecision::AlreadyScheduled => self.already_scheduled += 1,
            RuleDecision::NotDue | RuleDecision::NoOpenEvent => self.not_due += 1,
            RuleDecision::Missed => self.missed += 1,
            RuleDecision::NoCandidates => self.no_candidates += 1,
        }
    }
}

pub struct Scheduler {
    store: Arc<dyn ExecutionStore>,
    rules: Arc<dyn RuleStore>,
    selector: Arc<dyn ProductSelector>,
    clock: Arc<dyn Clock>,
    metrics: MetricsCollector,
    lookahead_days: u32,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        rules: Arc<dyn RuleStore>,
        selector: Arc<dyn ProductSelector>,
        clock: Arc<dyn Clock>,
        metrics: MetricsCollector,
        lookahead_days: u32,
    ) -> Self {
        Self {
            store,
            rules,
            selector,
            clock,
            metrics,
            lookahead_days,
        }
    }

    /// One pass as of the clock's current date
    pub async fn run(&self) -> Result<SchedulerReport, SchedulerError> {
        self.run_once(self.clock.today()).await
    }

    /// One pass over every active rule as of `as_of`. A failure on one rule
    /// is logged and counted; only failing to list rules aborts the pass.
    pub async fn run_once(&self, as_of: NaiveDate) -> Result<SchedulerReport, SchedulerError> {
        let started = Instant::now();
        let rules = self.rules.list_active_rules().await?;

        let mut report = SchedulerReport {
            as_of: Some(as_of),
            rules_examined: rules.len(),
            ..Default::default()
        };

        for rule in &rules {
            match self.schedule_rule(rule, as_of).await {
                Ok(decision) => report.record(&decision),
                Err(e) => {
                    report.errors += 1;
                    error!(rule_id = %rule.id, error = %e, "Failed to schedule rule");
                }
            }
        }

        self.metrics.record_scheduler_run(started.elapsed());
        info!(
            as_of = %as_of,
            rules = report.rules_examined,
            created = report.created.len(),
            missed = report.missed,
            errors = report.errors,
            "Scheduler pass finished"
        );

        Ok(report)
    }

    async fn schedule_rule(
        &self,
        rule: &AutoGiftRule,
        as_of: NaiveDate,
    ) -> Result<RuleDecision, SchedulerError> {
        let Some(event) = self.open_event(rule).await? else {
            return Ok(RuleDecision::NoOpenEvent);
        };

        let existing = self.store.list_for_pair(&rule.id, &event.id).await?;
        if existing.iter().any(Execution::is_active) {
            debug!(rule_id = %rule.id, event_id = %event.id, "Execution already in flight");
            return Ok(RuleDecision::AlreadyScheduled);
        }

        if event.date < as_of {
            self.handle_missed(rule, &event, as_of).await?;
            return Ok(RuleDecision::Missed);
        }

        // One attempt per occurrence; a terminal execution is not replaced
        if !existing.is_empty() {
            return Ok(RuleDecision::AlreadyScheduled);
        }

        let horizon = as_of
            .checked_add_days(Days::new(u64::from(self.lookahead_days)))
            .unwrap_or(NaiveDate::MAX);
        if event.date > horizon {
            return Ok(RuleDecision::NotDue);
        }

        self.create_candidate(rule, &event).await
    }

    /// The event a rule currently targets: the earliest open instance of its
    /// series, or its own event if that is not yet completed
    async fn open_event(&self, rule: &AutoGiftRule) -> Result<Option<ScheduledEvent>, StoreError> {
        let event = match &rule.series_id {
            Some(series_id) => self.rules.next_open_event(series_id).await?,
            None => self.rules.get_event(&rule.event_id).await?,
        };

        Ok(event.filter(|e| !e.is_completed()))
    }

    async fn handle_missed(
        &self,
        rule: &AutoGiftRule,
        event: &ScheduledEvent,
        as_of: NaiveDate,
    ) -> Result<(), StoreError> {
        warn!(
            rule_id = %rule.id,
            event_id = %event.id,
            event_date = %event.date,
            as_of = %as_of,
            "Event date passed without an execution"
        );

        // Close the occurrence so the series moves on to the next one
        if event.is_recurring() {
            let now = self.clock.now();
            self.rules.mark_event_completed(&event.id, now).await?;
            advance_series(self.rules.as_ref(), event, now).await?;
        }

        Ok(())
    }

    async fn create_candidate(
        &self,
        rule: &AutoGiftRule,
        event: &ScheduledEvent,
    ) -> Result<RuleDecision, SchedulerError> {
        let selection = self
            .selector
            .select(rule, event)
            .await
            .map_err(|source| SchedulerError::Selection {
                rule_id: rule.id.clone(),
                source,
            })?;

        let mut items = Vec::with_capacity(selection.candidates.len());
        for candidate in selection.candidates {
            match LineItem::try_from(candidate) {
                Ok(item) => items.push(item),
                Err(e) => warn!(rule_id = %rule.id, error = %e, "Dropping invalid candidate"),
            }
        }
        if items.is_empty() {
            warn!(rule_id = %rule.id, event_id = %event.id, "No valid candidates");
            return Ok(RuleDecision::NoCandidates);
        }

        let confidence = if selection.confidence.is_nan() {
            0.0
        } else {
            selection.confidence.clamp(0.0, 1.0)
        };

        let execution = Execution::candidate(
            Uuid::new_v4().to_string(),
            rule,
            event,
            items,
            confidence,
            self.clock.now(),
        );

        match self.store.create_execution(&execution).await {
            Ok(()) => {}
            Err(StoreError::ActiveExecutionExists { .. }) => {
                return Ok(RuleDecision::AlreadyScheduled)
            }
            Err(e) => return Err(e.into()),
        }

        self.metrics.record_execution_created();
        info!(
            execution_id = %execution.id,
            rule_id = %rule.id,
            event_id = %event.id,
            total_amount = %execution.total_amount,
            confidence,
            "Execution created"
        );

        Ok(RuleDecision::Created(execution))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::Selection;
    use crate::test_support::*;
    use autogift_config::AppConfig;
    use autogift_types::{CandidateProduct, ExecutionStatus, RecurringType};
    use rust_decimal::Decimal;

    async fn seed(h: &Harness, rule_id: &str, event_id: &str, date: NaiveDate) {
        h.store
            .create_event(&one_off_event(event_id, date))
            .await
            .unwrap();
        h.store.create_rule(&rule(rule_id, event_id)).await.unwrap();
    }

    #[tokio::test]
    async fn test_due_event_gets_pending_execution() {
        let h = Harness::new();
        seed(&h, "rule-1", "event-1", today()).await;

        let report = h.runtime.scheduler.run_once(today()).await.unwrap();
        assert_eq!(report.rules_examined, 1);
        assert_eq!(report.created.len(), 1);

        let execution = h.get(&report.created[0]).await;
        assert_eq!(execution.status, ExecutionStatus::Pending);
        assert_eq!(execution.rule_id, "rule-1");
        assert_eq!(execution.budget_limit, Decimal::from(50));
        assert_eq!(execution.total_amount, dec("32.50"));
        assert_eq!(execution.address_metadata, Some(address()));
        assert_eq!(execution.selected_products, execution.candidate_products);
    }

    #[tokio::test]
    async fn test_second_pass_does_not_duplicate() {
        let h = Harness::new();
        seed(&h, "rule-1", "event-1", today()).await;

        h.runtime.scheduler.run_once(today()).await.unwrap();
        let report = h.runtime.scheduler.run_once(today()).await.unwrap();

        assert!(report.created.is_empty());
        assert_eq!(report.already_scheduled, 1);
        assert_eq!(h.store.list_for_pair("rule-1", "event-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_lookahead_window() {
        let h = Harness::new();
        let in_three_days = today().checked_add_days(Days::new(3)).unwrap();
        seed(&h, "rule-1", "event-1", in_three_days).await;

        let report = h.runtime.scheduler.run_once(today()).await.unwrap();
        assert_eq!(report.not_due, 1);

        let mut config = AppConfig::local();
        config.scheduler.lookahead_days = 7;
        let h = Harness::with_config(config);
        seed(&h, "rule-1", "event-1", in_three_days).await;

        let report = h.runtime.scheduler.run_once(today()).await.unwrap();
        assert_eq!(report.created.len(), 1);
    }

    #[tokio::test]
    async fn test_inactive_rule_is_ignored() {
        let h = Harness::new();
        seed(&h, "rule-1", "event-1", today()).await;
        h.store.set_rule_active("rule-1", false, now()).await.unwrap();

        let report = h.runtime.scheduler.run_once(today()).await.unwrap();
        assert_eq!(report.rules_examined, 0);
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_past_event_is_missed() {
        let h = Harness::new();
        let yesterday = today().pred_opt().unwrap();
        seed(&h, "rule-1", "event-1", yesterday).await;

        let report = h.runtime.scheduler.run_once(today()).await.unwrap();
        assert_eq!(report.missed, 1);
        assert!(report.created.is_empty());
        assert_eq!(h.selector.call_count(), 0);
    }

    #[tokio::test]
    async fn test_missed_series_occurrence_moves_on() {
        let h = Harness::new();
        let yesterday = today().pred_opt().unwrap();
        let template = series("series-1", RecurringType::Yearly, yesterday);
        h.store.create_series(&template).await.unwrap();
        h.store
            .create_event(&template.first_instance("event-1", now()))
            .await
            .unwrap();
        h.store
            .create_rule(&rule("rule-1", "event-1").with_series("series-1"))
            .await
            .unwrap();

        let report = h.runtime.scheduler.run_once(today()).await.unwrap();
        assert_eq!(report.missed, 1);

        let next = h.store.next_open_event("series-1").await.unwrap().unwrap();
        assert_eq!(next.occurrence_number, 2);
        assert!(next.date > today());
    }

    #[tokio::test]
    async fn test_invalid_candidates_are_dropped() {
        let h = Harness::new();
        seed(&h, "rule-1", "event-1", today()).await;
        h.selector.set_for_rule(
            "rule-1",
            Selection {
                candidates: vec![
                    CandidateProduct {
                        product_id: Some("sku-1".to_string()),
                        price: Some(dec("10.00")),
                        ..Default::default()
                    },
                    CandidateProduct {
                        product_id: Some("sku-2".to_string()),
                        price: None,
                        ..Default::default()
                    },
                ],
                confidence: 1.7,
            },
        );

        let report = h.runtime.scheduler.run_once(today()).await.unwrap();
        let execution = h.get(&report.created[0]).await;
        assert_eq!(execution.candidate_products.len(), 1);
        assert_eq!(execution.total_amount, dec("10.00"));
        assert_eq!(execution.selection_confidence, 1.0);
    }

    #[tokio::test]
    async fn test_no_valid_candidates() {
        let h = Harness::new();
        seed(&h, "rule-1", "event-1", today()).await;
        h.selector.set_for_rule("rule-1", Selection::default());

        let report = h.runtime.scheduler.run_once(today()).await.unwrap();
        assert_eq!(report.no_candidates, 1);
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_selection_failure_does_not_abort_pass() {
        let h = Harness::new();
        seed(&h, "rule-1", "event-1", today()).await;
        seed(&h, "rule-2", "event-2", today()).await;
        h.selector.push_failure(CoordinatorError::Timeout {
            operation: "search".to_string(),
        });

        let report = h.runtime.scheduler.run_once(today()).await.unwrap();
        assert_eq!(report.errors, 1);
        assert_eq!(report.created.len(), 1);
    }

    #[tokio::test]
    async fn test_terminal_execution_is_not_replaced() {
        let h = Harness::new();
        h.seed_processing("exec-1").await;
        h.runtime.orchestrator.process("exec-1").await.unwrap();
        // Reopen the one-off event to show the pair itself blocks rescheduling
        let mut event = h.store.get_event("event-1").await.unwrap().unwrap();
        event.completed_at = None;
        h.store.update_event(&event).await.unwrap();

        let report = h.runtime.scheduler.run_once(today()).await.unwrap();
        assert_eq!(report.already_scheduled, 1);
        assert_eq!(h.store.len(), 1);
    }

    #[tokio::test]
    async fn test_run_uses_clock_date() {
        let h = Harness::new();
        seed(&h, "rule-1", "event-1", today()).await;

        let report = h.runtime.scheduler.run().await.unwrap();
        assert_eq!(report.as_of, Some(today()));
        assert_eq!(report.created.len(), 1);
    }
}
