use async_trait::async_trait;
use autogift_types::{
    AutoGiftRule, Execution, ExecutionStatus, ExecutionUpdate, ScheduledEvent, SeriesTemplate,
    StateTransition, TransitionOutcome,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::StoreError;

// ═══════════════════════════════════════════════════════════════════════════
// STORE TRAITS
// ═══════════════════════════════════════════════════════════════════════════

/// Persistence for executions. The conditional status write is the only
/// lock in the system: a driver owns an execution for exactly as long as the
/// status it moved it into stays put.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Insert a new execution. Fails with `ActiveExecutionExists` if the
    /// (rule, event) pair already has an active one.
    async fn create_execution(&self, execution: &Execution) -> Result<(), StoreError>;

    async fn get_execution(&self, id: &str) -> Result<Option<Execution>, StoreError>;

    /// Move `id` from `expected` to `next` and apply `update`, but only if it
    /// is still in `expected` and no driver holds a claim on it. Losing the
    /// race is a `Conflict`, not an error.
    async fn conditional_update_status(
        &self,
        id: &str,
        expected: ExecutionStatus,
        next: ExecutionStatus,
        update: ExecutionUpdate,
        at: DateTime<Utc>,
    ) -> Result<TransitionOutcome, StoreError>;

    /// Executions in `status`, least recently updated first. With
    /// `older_than`, only those last updated strictly before it.
    async fn list_by_status(
        &self,
        status: ExecutionStatus,
        older_than: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Execution>, StoreError>;

    async fn list_for_pair(
        &self,
        rule_id: &str,
        event_id: &str,
    ) -> Result<Vec<Execution>, StoreError>;

    /// Most recently updated first
    async fn list_recent(&self, limit: usize) -> Result<Vec<Execution>, StoreError>;

    /// Take the pipeline claim on a `processing` execution for `token`.
    /// Wins when nobody holds it, or when the holder has not written since
    /// `stale_before`. Returns the execution as claimed.
    async fn acquire_claim(
        &self,
        id: &str,
        token: &str,
        stale_before: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<Option<Execution>, StoreError>;

    /// Conditional write by the claim holder: applies only while `id` is
    /// `processing` and claimed by `token`. Leaving `processing` drops the
    /// claim.
    async fn update_claimed(
        &self,
        id: &str,
        token: &str,
        next: ExecutionStatus,
        update: ExecutionUpdate,
        at: DateTime<Utc>,
    ) -> Result<TransitionOutcome, StoreError>;

    /// Drop the claim if `token` still holds it
    async fn release_claim(&self, id: &str, token: &str) -> Result<bool, StoreError>;

    async fn get_history(&self, id: &str) -> Result<Vec<StateTransition>, StoreError>;
}

/// Persistence for rules, series templates and scheduled events
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn create_rule(&self, rule: &AutoGiftRule) -> Result<(), StoreError>;

    async fn get_rule(&self, id: &str) -> Result<Option<AutoGiftRule>, StoreError>;

    async fn list_active_rules(&self) -> Result<Vec<AutoGiftRule>, StoreError>;

    /// Soft enable/disable; rules are never deleted
    async fn set_rule_active(
        &self,
        id: &str,
        active: bool,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn create_series(&self, template: &SeriesTemplate) -> Result<(), StoreError>;

    async fn get_series(&self, series_id: &str) -> Result<Option<SeriesTemplate>, StoreError>;

    /// Insert an event. Series instances are unique per occurrence number.
    async fn create_event(&self, event: &ScheduledEvent) -> Result<(), StoreError>;

    async fn get_event(&self, id: &str) -> Result<Option<ScheduledEvent>, StoreError>;

    /// Overwrite an event (owner edits)
    async fn update_event(&self, event: &ScheduledEvent) -> Result<(), StoreError>;

    /// Lowest-numbered instance of the series not yet completed
    async fn next_open_event(&self, series_id: &str)
        -> Result<Option<ScheduledEvent>, StoreError>;

    /// All instances of a series ordered by occurrence number
    async fn list_series_events(&self, series_id: &str)
        -> Result<Vec<ScheduledEvent>, StoreError>;

    /// Returns false if the event was already completed
    async fn mark_event_completed(&self, id: &str, at: DateTime<Utc>) -> Result<bool, StoreError>;
}

// ═══════════════════════════════════════════════════════════════════════════
// IN-MEMORY STORE (for testing and simulation)
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct MemoryState {
    executions: HashMap<String, Execution>,
    transitions: HashMap<String, Vec<StateTransition>>,
    rules: HashMap<String, AutoGiftRule>,
    series: HashMap<String, SeriesTemplate>,
    events: HashMap<String, ScheduledEvent>,
}

/// All maps live behind one lock so multi-record checks (the active-pair
/// invariant, compare-and-set) are atomic.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of executions (for testing)
    pub fn len(&self) -> usize {
        self.read().map(|s| s.executions.len()).unwrap_or(0)
    }

    /// Check if store holds no executions (for testing)
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrite an execution as-is, bypassing the state machine. Test
    /// fixtures use this to fabricate stale records.
    pub fn put_execution(&self, execution: Execution) -> Result<(), StoreError> {
        self.write()?
            .executions
            .insert(execution.id.clone(), execution);
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryState>, StoreError> {
        self.state
            .read()
            .map_err(|e| StoreError::DatabaseError(format!("lock poisoned: {e}")))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryState>, StoreError> {
        self.state
            .write()
            .map_err(|e| StoreError::DatabaseError(format!("lock poisoned: {e}")))
    }

    /// Status and claim must both match before `update` is applied. `claim`
    /// of `None` requires an unclaimed execution.
    fn compare_and_set(
        &self,
        id: &str,
        expected: ExecutionStatus,
        claim: Option<&str>,
        next: ExecutionStatus,
        update: &ExecutionUpdate,
        at: DateTime<Utc>,
    ) -> Result<TransitionOutcome, StoreError> {
        if !expected.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                from: expected,
                to: next,
            });
        }

        let mut state = self.write()?;
        let Some(execution) = state.executions.get_mut(id) else {
            return Ok(TransitionOutcome::Conflict { current: None });
        };

        if execution.status != expected || execution.claimed_by.as_deref() != claim {
            return Ok(TransitionOutcome::Conflict {
                current: Some(execution.status),
            });
        }

        let transition = execution.apply_transition(next, update, at);
        let updated = execution.clone();

        if transition.from != transition.to {
            state
                .transitions
                .entry(id.to_string())
                .or_default()
                .push(transition);
        }

        Ok(TransitionOutcome::Applied(updated))
    }
}

#[async_trait]
impl ExecutionStore for InMemoryStore {
    async fn create_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if state.executions.contains_key(&execution.id) {
            return Err(StoreError::DuplicateId(execution.id.clone()));
        }

        let pair_taken = state.executions.values().any(|e| {
            e.rule_id == execution.rule_id && e.event_id == execution.event_id && e.is_active()
        });
        if pair_taken && execution.is_active() {
            return Err(StoreError::ActiveExecutionExists {
                rule_id: execution.rule_id.clone(),
                event_id: execution.event_id.clone(),
            });
        }

        state
            .executions
            .insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn get_execution(&self, id: &str) -> Result<Option<Execution>, StoreError> {
        Ok(self.read()?.executions.get(id).cloned())
    }

    async fn conditional_update_status(
        &self,
        id: &str,
        expected: ExecutionStatus,
        next: ExecutionStatus,
        update: ExecutionUpdate,
        at: DateTime<Utc>,
    ) -> Result<TransitionOutcome, StoreError> {
        self.compare_and_set(id, expected, None, next, &update, at)
    }

    async fn list_by_status(
        &self,
        status: ExecutionStatus,
        older_than: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Execution>, StoreError> {
        let state = self.read()?;
        let mut results: Vec<_> = state
            .executions
            .values()
            .filter(|e| e.status == status)
            .filter(|e| older_than.map_or(true, |cutoff| e.updated_at < cutoff))
            .cloned()
            .collect();

        results.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.id.cmp(&b.id)));
        results.truncate(limit);
        Ok(results)
    }

    async fn list_for_pair(
        &self,
        rule_id: &str,
        event_id: &str,
    ) -> Result<Vec<Execution>, StoreError> {
        let state = self.read()?;
        let mut results: Vec<_> = state
            .executions
            .values()
            .filter(|e| e.rule_id == rule_id && e.event_id == event_id)
            .cloned()
            .collect();

        results.sort_by_key(|e| e.created_at);
        Ok(results)
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Execution>, StoreError> {
        let state = self.read()?;
        let mut results: Vec<_> = state.executions.values().cloned().collect();

        results.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
        results.truncate(limit);
        Ok(results)
    }

    async fn acquire_claim(
        &self,
        id: &str,
        token: &str,
        stale_before: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<Option<Execution>, StoreError> {
        let mut state = self.write()?;
        match state.executions.get_mut(id) {
            Some(e) if e.is_claimable(stale_before) => {
                e.claimed_by = Some(token.to_string());
                e.updated_at = at;
                Ok(Some(e.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn update_claimed(
        &self,
        id: &str,
        token: &str,
        next: ExecutionStatus,
        update: ExecutionUpdate,
        at: DateTime<Utc>,
    ) -> Result<TransitionOutcome, StoreError> {
        self.compare_and_set(id, ExecutionStatus::Processing, Some(token), next, &update, at)
    }

    async fn release_claim(&self, id: &str, token: &str) -> Result<bool, StoreError> {
        let mut state = self.write()?;
        match state.executions.get_mut(id) {
            Some(e) if e.claimed_by.as_deref() == Some(token) => {
                e.claimed_by = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_history(&self, id: &str) -> Result<Vec<StateTransition>, StoreError> {
        Ok(self
            .read()?
            .transitions
            .get(id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl RuleStore for InMemoryStore {
    async fn create_rule(&self, rule: &AutoGiftRule) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if state.rules.contains_key(&rule.id) {
            return Err(StoreError::DuplicateId(rule.id.clone()));
        }
        state.rules.insert(rule.id.clone(), rule.clone());
        Ok(())
    }

    async fn get_rule(&self, id: &str) -> Result<Option<AutoGiftRule>, StoreError> {
        Ok(self.read()?.rules.get(id).cloned())
    }

    async fn list_active_rules(&self) -> Result<Vec<AutoGiftRule>, StoreError> {
        let state = self.read()?;
        let mut rules: Vec<_> = state.rules.values().filter(|r| r.is_active).cloned().collect();
        rules.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(rules)
    }

    async fn set_rule_active(
        &self,
        id: &str,
        active: bool,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let rule = state
            .rules
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        rule.is_active = active;
        rule.updated_at = at;
        Ok(())
    }

    async fn create_series(&self, template: &SeriesTemplate) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if state.series.contains_key(&template.series_id) {
            return Err(StoreError::DuplicateId(template.series_id.clone()));
        }
        state
            .series
            .insert(template.series_id.clone(), template.clone());
        Ok(())
    }

    async fn get_series(&self, series_id: &str) -> Result<Option<SeriesTemplate>, StoreError> {
        Ok(self.read()?.series.get(series_id).cloned())
    }

    async fn create_event(&self, event: &ScheduledEvent) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if state.events.contains_key(&event.id) {
            return Err(StoreError::DuplicateId(event.id.clone()));
        }

        if let Some(series_id) = &event.series_id {
            let taken = state.events.values().any(|e| {
                e.series_id.as_ref() == Some(series_id)
                    && e.occurrence_number == event.occurrence_number
            });
            if taken {
                return Err(StoreError::DuplicateOccurrence {
                    series_id: series_id.clone(),
                    occurrence_number: event.occurrence_number,
                });
            }
        }

        state.events.insert(event.id.clone(), event.clone());
        Ok(())
    }

    async fn get_event(&self, id: &str) -> Result<Option<ScheduledEvent>, StoreError> {
        Ok(self.read()?.events.get(id).cloned())
    }

    async fn update_event(&self, event: &ScheduledEvent) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if !state.events.contains_key(&event.id) {
            return Err(StoreError::NotFound(event.id.clone()));
        }
        state.events.insert(event.id.clone(), event.clone());
        Ok(())
    }

    async fn next_open_event(
        &self,
        series_id: &str,
    ) -> Result<Option<ScheduledEvent>, StoreError> {
        let state = self.read()?;
        Ok(state
            .events
            .values()
            .filter(|e| e.series_id.as_deref() == Some(series_id) && !e.is_completed())
            .min_by_key(|e| e.occurrence_number)
            .cloned())
    }

    async fn list_series_events(
        &self,
        series_id: &str,
    ) -> Result<Vec<ScheduledEvent>, StoreError> {
        let state = self.read()?;
        let mut events: Vec<_> = state
            .events
            .values()
            .filter(|e| e.series_id.as_deref() == Some(series_id))
            .cloned()
            .collect();
        events.sort_by_key(|e| e.occurrence_number);
        Ok(events)
    }

    async fn mark_event_completed(&self, id: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut state = self.write()?;
        let event = state
            .events
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if event.completed_at.is_some() {
            return Ok(false);
        }
        event.completed_at = Some(at);
        Ok(true)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════
