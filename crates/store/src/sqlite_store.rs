use async_trait::async_trait;
use autogift_types::{
    AutoGiftRule, Execution, ExecutionStatus, ExecutionUpdate, RecurringType, ScheduledEvent,
    SeriesTemplate, StateTransition, TransitionOutcome,
};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

use crate::migrations::MIGRATIONS;
use crate::store::{ExecutionStore, RuleStore};
use crate::StoreError;

// ═══════════════════════════════════════════════════════════════════════════
// SQLITE STORE IMPLEMENTATION
// ═══════════════════════════════════════════════════════════════════════════

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database file at `db_path`
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        let url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());
        Self::connect(&url, 5).await
    }

    /// Create an in-memory SQLite database (for testing)
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::connect("sqlite::memory:", 1).await
    }

    /// Connect to a database URL. In-memory databases are private to one
    /// connection, so the pool is pinned to a single long-lived connection.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let in_memory = url.contains(":memory:");
        let options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections.max(1))
        };

        let pool = options
            .connect(url)
            .await
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        for statement in MIGRATIONS {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db_error)?;
        }
        debug!(count = MIGRATIONS.len(), "Applied store migrations");
        Ok(())
    }

    fn row_to_execution(row: &SqliteRow) -> Result<Execution, StoreError> {
        let status: String = col(row, "status")?;

        Ok(Execution {
            id: col(row, "id")?,
            rule_id: col(row, "rule_id")?,
            event_id: col(row, "event_id")?,
            owner_id: col(row, "owner_id")?,
            status: ExecutionStatus::from_str(&status).map_err(StoreError::SerializationError)?,
            budget_limit: parse_decimal(&col::<String>(row, "budget_limit")?)?,
            candidate_products: from_json(&col::<String>(row, "candidate_products")?)?,
            selection_confidence: col(row, "selection_confidence")?,
            selected_products: from_json(&col::<String>(row, "selected_products")?)?,
            total_amount: parse_decimal(&col::<String>(row, "total_amount")?)?,
            payment_method_ref: col(row, "payment_method_ref")?,
            address_metadata: from_json_opt(col(row, "address_metadata")?)?,
            order_id: col(row, "order_id")?,
            payment: from_json_opt(col(row, "payment")?)?,
            fulfillment: from_json_opt(col(row, "fulfillment")?)?,
            error_message: col(row, "error_message")?,
            retry_count: col::<i64>(row, "retry_count")? as u32,
            next_retry_at: from_millis_opt(col(row, "next_retry_at")?)?,
            approved_by: col(row, "approved_by")?,
            rejection_reason: col(row, "rejection_reason")?,
            claimed_by: col(row, "claimed_by")?,
            created_at: from_millis(col(row, "created_at")?)?,
            updated_at: from_millis(col(row, "updated_at")?)?,
            completed_at: from_millis_opt(col(row, "completed_at")?)?,
        })
    }

    fn row_to_rule(row: &SqliteRow) -> Result<AutoGiftRule, StoreError> {
        Ok(AutoGiftRule {
            id: col(row, "id")?,
            owner_id: col(row, "owner_id")?,
            recipient_id: col(row, "recipient_id")?,
            occasion: col(row, "occasion")?,
            event_id: col(row, "event_id")?,
            series_id: col(row, "series_id")?,
            budget_limit: parse_decimal(&col::<String>(row, "budget_limit")?)?,
            selection_criteria: from_json(&col::<String>(row, "selection_criteria")?)?,
            gift_message: col(row, "gift_message")?,
            payment_method_ref: col(row, "payment_method_ref")?,
            is_active: col(row, "is_active")?,
            created_at: from_millis(col(row, "created_at")?)?,
            updated_at: from_millis(col(row, "updated_at")?)?,
        })
    }

    fn row_to_series(row: &SqliteRow) -> Result<SeriesTemplate, StoreError> {
        Ok(SeriesTemplate {
            series_id: col(row, "series_id")?,
            owner_id: col(row, "owner_id")?,
            recipient_id: col(row, "recipient_id")?,
            title: col(row, "title")?,
            anchor_date: parse_date(&col::<String>(row, "anchor_date")?)?,
            recipient_address: from_json_opt(col(row, "recipient_address")?)?,
            recurring_type: parse_recurring(&col::<String>(row, "recurring_type")?)?,
            end_date: col::<Option<String>>(row, "end_date")?
                .map(|d| parse_date(&d))
                .transpose()?,
            max_occurrences: col::<Option<i64>>(row, "max_occurrences")?.map(|v| v as u32),
            created_at: from_millis(col(row, "created_at")?)?,
        })
    }

    fn row_to_event(row: &SqliteRow) -> Result<ScheduledEvent, StoreError> {
        Ok(ScheduledEvent {
            id: col(row, "id")?,
            owner_id: col(row, "owner_id")?,
            recipient_id: col(row, "recipient_id")?,
            title: col(row, "title")?,
            date: parse_date(&col::<String>(row, "date")?)?,
            recipient_address: from_json_opt(col(row, "recipient_address")?)?,
            series_id: col(row, "series_id")?,
            recurring_type: parse_recurring(&col::<String>(row, "recurring_type")?)?,
            end_date: col::<Option<String>>(row, "end_date")?
                .map(|d| parse_date(&d))
                .transpose()?,
            max_occurrences: col::<Option<i64>>(row, "max_occurrences")?.map(|v| v as u32),
            occurrence_number: col::<i64>(row, "occurrence_number")? as u32,
            is_modified: col(row, "is_modified")?,
            completed_at: from_millis_opt(col(row, "completed_at")?)?,
            created_at: from_millis(col(row, "created_at")?)?,
        })
    }

    async fn fetch_executions<'a>(
        &self,
        query: sqlx::query::Query<'a, Sqlite, sqlx::sqlite::SqliteArguments<'a>>,
    ) -> Result<Vec<Execution>, StoreError> {
        let rows = query.fetch_all(&self.pool).await.map_err(db_error)?;
        rows.iter().map(Self::row_to_execution).collect()
    }

    async fn fetch_events<'a>(
        &self,
        query: sqlx::query::Query<'a, Sqlite, sqlx::sqlite::SqliteArguments<'a>>,
    ) -> Result<Vec<ScheduledEvent>, StoreError> {
        let rows = query.fetch_all(&self.pool).await.map_err(db_error)?;
        rows.iter().map(Self::row_to_event).collect()
    }

    /// Status and claim must both match before `update` is applied. `claim`
    /// of `None` requires an unclaimed execution.
    async fn compare_and_set(
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

        let Some(mut execution) = self.get_execution(id).await? else {
            return Ok(TransitionOutcome::Conflict { current: None });
        };
        if execution.status != expected || execution.claimed_by.as_deref() != claim {
            return Ok(TransitionOutcome::Conflict {
                current: Some(execution.status),
            });
        }

        let read_version = to_millis(execution.updated_at);
        let transition = execution.apply_transition(next, update, at);

        // Compare-and-set on (status, claim, updated_at) as read above
        let result = sqlx::query(
            r#"
            UPDATE executions
            SET status = ?, candidate_products = ?, selected_products = ?, total_amount = ?,
                payment_method_ref = ?, order_id = ?, payment = ?, fulfillment = ?,
                error_message = ?, retry_count = ?, next_retry_at = ?, approved_by = ?,
                rejection_reason = ?, claimed_by = ?, updated_at = ?, completed_at = ?
            WHERE id = ? AND status = ? AND claimed_by IS ? AND updated_at = ?
            "#,
        )
        .bind(execution.status.as_str())
        .bind(to_json(&execution.candidate_products)?)
        .bind(to_json(&execution.selected_products)?)
        .bind(execution.total_amount.to_string())
        .bind(&execution.payment_method_ref)
        .bind(&execution.order_id)
        .bind(to_json_opt(&execution.payment)?)
        .bind(to_json_opt(&execution.fulfillment)?)
        .bind(&execution.error_message)
        .bind(execution.retry_count as i64)
        .bind(execution.next_retry_at.map(to_millis))
        .bind(&execution.approved_by)
        .bind(&execution.rejection_reason)
        .bind(&execution.claimed_by)
        .bind(to_millis(execution.updated_at))
        .bind(execution.completed_at.map(to_millis))
        .bind(id)
        .bind(expected.as_str())
        .bind(claim)
        .bind(read_version)
        .execute(&self.pool)
        .await;

        let result = match result {
            Ok(result) => result,
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                return Err(StoreError::ActiveExecutionExists {
                    rule_id: execution.rule_id.clone(),
                    event_id: execution.event_id.clone(),
                })
            }
            Err(e) => return Err(db_error(e)),
        };

        if result.rows_affected() == 0 {
            let current = self.get_execution(id).await?.map(|e| e.status);
            return Ok(TransitionOutcome::Conflict { current });
        }

        if transition.from != transition.to {
            self.record_transition(id, &transition).await?;
        }

        Ok(TransitionOutcome::Applied(execution))
    }

    async fn record_transition(
        &self,
        id: &str,
        transition: &StateTransition,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO execution_transitions (execution_id, from_status, to_status, at, details)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(transition.from.as_str())
        .bind(transition.to.as_str())
        .bind(to_millis(transition.at))
        .bind(&transition.details)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }
}

#[async_trait]
impl ExecutionStore for SqliteStore {
    async fn create_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        let existing = self.get_execution(&execution.id).await?;
        if existing.is_some() {
            return Err(StoreError::DuplicateId(execution.id.clone()));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO executions (
                id, rule_id, event_id, owner_id, status, budget_limit,
                candidate_products, selection_confidence, selected_products, total_amount,
                payment_method_ref, address_metadata, order_id, payment, fulfillment,
                error_message, retry_count, next_retry_at, approved_by, rejection_reason,
                claimed_by, created_at, updated_at, completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&execution.id)
        .bind(&execution.rule_id)
        .bind(&execution.event_id)
        .bind(&execution.owner_id)
        .bind(execution.status.as_str())
        .bind(execution.budget_limit.to_string())
        .bind(to_json(&execution.candidate_products)?)
        .bind(execution.selection_confidence)
        .bind(to_json(&execution.selected_products)?)
        .bind(execution.total_amount.to_string())
        .bind(&execution.payment_method_ref)
        .bind(to_json_opt(&execution.address_metadata)?)
        .bind(&execution.order_id)
        .bind(to_json_opt(&execution.payment)?)
        .bind(to_json_opt(&execution.fulfillment)?)
        .bind(&execution.error_message)
        .bind(execution.retry_count as i64)
        .bind(execution.next_retry_at.map(to_millis))
        .bind(&execution.approved_by)
        .bind(&execution.rejection_reason)
        .bind(&execution.claimed_by)
        .bind(to_millis(execution.created_at))
        .bind(to_millis(execution.updated_at))
        .bind(execution.completed_at.map(to_millis))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                if db_err.message().contains("executions.id") {
                    Err(StoreError::DuplicateId(execution.id.clone()))
                } else {
                    Err(StoreError::ActiveExecutionExists {
                        rule_id: execution.rule_id.clone(),
                        event_id: execution.event_id.clone(),
                    })
                }
            }
            Err(e) => Err(db_error(e)),
        }
    }

    async fn get_execution(&self, id: &str) -> Result<Option<Execution>, StoreError> {
        let row = sqlx::query("SELECT * FROM executions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.as_ref().map(Self::row_to_execution).transpose()
    }

    async fn conditional_update_status(
        &self,
        id: &str,
        expected: ExecutionStatus,
        next: ExecutionStatus,
        update: ExecutionUpdate,
        at: DateTime<Utc>,
    ) -> Result<TransitionOutcome, StoreError> {
        self.compare_and_set(id, expected, None, next, &update, at).await
    }

    async fn list_by_status(
        &self,
        status: ExecutionStatus,
        older_than: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Execution>, StoreError> {
        let cutoff = older_than.map(to_millis);
        self.fetch_executions(
            sqlx::query(
                r#"
                SELECT * FROM executions
                WHERE status = ? AND (? IS NULL OR updated_at < ?)
                ORDER BY updated_at ASC, id ASC
                LIMIT ?
                "#,
            )
            .bind(status.as_str())
            .bind(cutoff)
            .bind(cutoff)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX)),
        )
        .await
    }

    async fn list_for_pair(
        &self,
        rule_id: &str,
        event_id: &str,
    ) -> Result<Vec<Execution>, StoreError> {
        self.fetch_executions(
            sqlx::query(
                "SELECT * FROM executions WHERE rule_id = ? AND event_id = ? ORDER BY created_at ASC",
            )
            .bind(rule_id)
            .bind(event_id),
        )
        .await
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Execution>, StoreError> {
        self.fetch_executions(
            sqlx::query("SELECT * FROM executions ORDER BY updated_at DESC, id ASC LIMIT ?")
                .bind(i64::try_from(limit).unwrap_or(i64::MAX)),
        )
        .await
    }

    async fn acquire_claim(
        &self,
        id: &str,
        token: &str,
        stale_before: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<Option<Execution>, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE executions SET claimed_by = ?, updated_at = ?
            WHERE id = ? AND status = ? AND (claimed_by IS NULL OR updated_at < ?)
            "#,
        )
        .bind(token)
        .bind(to_millis(at))
        .bind(id)
        .bind(ExecutionStatus::Processing.as_str())
        .bind(to_millis(stale_before))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_execution(id).await
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
            .await
    }

    async fn release_claim(&self, id: &str, token: &str) -> Result<bool, StoreError> {
        let result =
            sqlx::query("UPDATE executions SET claimed_by = NULL WHERE id = ? AND claimed_by = ?")
                .bind(id)
                .bind(token)
                .execute(&self.pool)
                .await
                .map_err(db_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_history(&self, id: &str) -> Result<Vec<StateTransition>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM execution_transitions WHERE execution_id = ? ORDER BY id ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter()
            .map(|row| {
                let from: String = col(row, "from_status")?;
                let to: String = col(row, "to_status")?;
                Ok(StateTransition {
                    from: ExecutionStatus::from_str(&from)
                        .map_err(StoreError::SerializationError)?,
                    to: ExecutionStatus::from_str(&to).map_err(StoreError::SerializationError)?,
                    at: from_millis(col(row, "at")?)?,
                    details: col(row, "details")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl RuleStore for SqliteStore {
    async fn create_rule(&self, rule: &AutoGiftRule) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO rules (
                id, owner_id, recipient_id, occasion, event_id, series_id, budget_limit,
                selection_criteria, gift_message, payment_method_ref, is_active,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&rule.id)
        .bind(&rule.owner_id)
        .bind(&rule.recipient_id)
        .bind(&rule.occasion)
        .bind(&rule.event_id)
        .bind(&rule.series_id)
        .bind(rule.budget_limit.to_string())
        .bind(to_json(&rule.selection_criteria)?)
        .bind(&rule.gift_message)
        .bind(&rule.payment_method_ref)
        .bind(rule.is_active)
        .bind(to_millis(rule.created_at))
        .bind(to_millis(rule.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StoreError::DuplicateId(rule.id.clone()))
            }
            Err(e) => Err(db_error(e)),
        }
    }

    async fn get_rule(&self, id: &str) -> Result<Option<AutoGiftRule>, StoreError> {
        let row = sqlx::query("SELECT * FROM rules WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.as_ref().map(Self::row_to_rule).transpose()
    }

    async fn list_active_rules(&self) -> Result<Vec<AutoGiftRule>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM rules WHERE is_active = 1 ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(Self::row_to_rule).collect()
    }

    async fn set_rule_active(
        &self,
        id: &str,
        active: bool,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE rules SET is_active = ?, updated_at = ? WHERE id = ?")
            .bind(active)
            .bind(to_millis(at))
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn create_series(&self, template: &SeriesTemplate) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO event_series (
                series_id, owner_id, recipient_id, title, anchor_date, recipient_address,
                recurring_type, end_date, max_occurrences, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&template.series_id)
        .bind(&template.owner_id)
        .bind(&template.recipient_id)
        .bind(&template.title)
        .bind(format_date(template.anchor_date))
        .bind(to_json_opt(&template.recipient_address)?)
        .bind(template.recurring_type.as_str())
        .bind(template.end_date.map(format_date))
        .bind(template.max_occurrences.map(|v| v as i64))
        .bind(to_millis(template.created_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StoreError::DuplicateId(template.series_id.clone()))
            }
            Err(e) => Err(db_error(e)),
        }
    }

    async fn get_series(&self, series_id: &str) -> Result<Option<SeriesTemplate>, StoreError> {
        let row = sqlx::query("SELECT * FROM event_series WHERE series_id = ?")
            .bind(series_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.as_ref().map(Self::row_to_series).transpose()
    }

    async fn create_event(&self, event: &ScheduledEvent) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO events (
                id, owner_id, recipient_id, title, date, recipient_address, series_id,
                recurring_type, end_date, max_occurrences, occurrence_number, is_modified,
                completed_at, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.id)
        .bind(&event.owner_id)
        .bind(&event.recipient_id)
        .bind(&event.title)
        .bind(format_date(event.date))
        .bind(to_json_opt(&event.recipient_address)?)
        .bind(&event.series_id)
        .bind(event.recurring_type.as_str())
        .bind(event.end_date.map(format_date))
        .bind(event.max_occurrences.map(|v| v as i64))
        .bind(event.occurrence_number as i64)
        .bind(event.is_modified)
        .bind(event.completed_at.map(to_millis))
        .bind(to_millis(event.created_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                if db_err.message().contains("events.id") {
                    Err(StoreError::DuplicateId(event.id.clone()))
                } else {
                    Err(StoreError::DuplicateOccurrence {
                        series_id: event.series_id.clone().unwrap_or_default(),
                        occurrence_number: event.occurrence_number,
                    })
                }
            }
            Err(e) => Err(db_error(e)),
        }
    }

    async fn get_event(&self, id: &str) -> Result<Option<ScheduledEvent>, StoreError> {
        let row = sqlx::query("SELECT * FROM events WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.as_ref().map(Self::row_to_event).transpose()
    }

    async fn update_event(&self, event: &ScheduledEvent) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE events
            SET owner_id = ?, recipient_id = ?, title = ?, date = ?, recipient_address = ?,
                series_id = ?, recurring_type = ?, end_date = ?, max_occurrences = ?,
                occurrence_number = ?, is_modified = ?, completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&event.owner_id)
        .bind(&event.recipient_id)
        .bind(&event.title)
        .bind(format_date(event.date))
        .bind(to_json_opt(&event.recipient_address)?)
        .bind(&event.series_id)
        .bind(event.recurring_type.as_str())
        .bind(event.end_date.map(format_date))
        .bind(event.max_occurrences.map(|v| v as i64))
        .bind(event.occurrence_number as i64)
        .bind(event.is_modified)
        .bind(event.completed_at.map(to_millis))
        .bind(&event.id)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(event.id.clone()));
        }
        Ok(())
    }

    async fn next_open_event(
        &self,
        series_id: &str,
    ) -> Result<Option<ScheduledEvent>, StoreError> {
        let events = self
            .fetch_events(
                sqlx::query(
                    r#"
                    SELECT * FROM events
                    WHERE series_id = ? AND completed_at IS NULL
                    ORDER BY occurrence_number ASC
                    LIMIT 1
                    "#,
                )
                .bind(series_id),
            )
            .await?;

        Ok(events.into_iter().next())
    }

    async fn list_series_events(
        &self,
        series_id: &str,
    ) -> Result<Vec<ScheduledEvent>, StoreError> {
        self.fetch_events(
            sqlx::query("SELECT * FROM events WHERE series_id = ? ORDER BY occurrence_number ASC")
                .bind(series_id),
        )
        .await
    }

    async fn mark_event_completed(&self, id: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE events SET completed_at = ? WHERE id = ? AND completed_at IS NULL",
        )
        .bind(to_millis(at))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        match self.get_event(id).await? {
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HELPER FUNCTIONS
// ═══════════════════════════════════════════════════════════════════════════

fn db_error(e: sqlx::Error) -> StoreError {
    StoreError::DatabaseError(e.to_string())
}

fn col<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(name).map_err(db_error)
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::SerializationError(format!("invalid timestamp: {ms}")))
}

fn from_millis_opt(ms: Option<i64>) -> Result<Option<DateTime<Utc>>, StoreError> {
    ms.map(from_millis).transpose()
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn parse_date(s: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| StoreError::SerializationError(format!("invalid date {s}: {e}")))
}

fn parse_decimal(s: &str) -> Result<Decimal, StoreError> {
    Decimal::from_str(s).map_err(|e| StoreError::SerializationError(e.to_string()))
}

fn parse_recurring(s: &str) -> Result<RecurringType, StoreError> {
    RecurringType::from_str(s).map_err(StoreError::SerializationError)
}

fn to_json<T: Serialize>(value: &T) -> Result<String, StoreError> {
    Ok(serde_json::to_string(value)?)
}

fn to_json_opt<T: Serialize>(value: &Option<T>) -> Result<Option<String>, StoreError> {
    value.as_ref().map(to_json).transpose()
}

fn from_json<T: DeserializeOwned>(s: &str) -> Result<T, StoreError> {
    Ok(serde_json::from_str(s)?)
}

fn from_json_opt<T: DeserializeOwned>(s: Option<String>) -> Result<Option<T>, StoreError> {
    s.as_deref().map(from_json).transpose()
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::*;
    use autogift_types::{PaymentRecord, PaymentStatus};
    use chrono::Duration;

    #[tokio::test]
    async fn test_execution_persists_all_fields() {
        let store = SqliteStore::in_memory().await.unwrap();
        let execution = make_execution("exec-1", "rule-1", "event-1");

        store.create_execution(&execution).await.unwrap();

        let retrieved = store.get_execution("exec-1").await.unwrap();
        assert_eq!(retrieved, Some(execution));
    }

    #[tokio::test]
    async fn test_missing_execution_is_none() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert_eq!(store.get_execution("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicate_id_error() {
        let store = SqliteStore::in_memory().await.unwrap();
        let execution = make_execution("exec-1", "rule-1", "event-1");

        store.create_execution(&execution).await.unwrap();
        let result = store.create_execution(&execution).await;

        assert!(matches!(result, Err(StoreError::DuplicateId(_))));
    }

    #[tokio::test]
    async fn test_active_pair_index() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .create_execution(&make_execution("exec-1", "rule-1", "event-1"))
            .await
            .unwrap();

        let result = store
            .create_execution(&make_execution("exec-2", "rule-1", "event-1"))
            .await;
        assert!(matches!(result, Err(StoreError::ActiveExecutionExists { .. })));
    }

    #[tokio::test]
    async fn test_conditional_update_and_history() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .create_execution(&make_execution("exec-1", "rule-1", "event-1"))
            .await
            .unwrap();

        let at = now() + Duration::minutes(1);
        let payment = PaymentRecord {
            reference: "pay-1".to_string(),
            status: PaymentStatus::Succeeded,
            amount: Decimal::from(32),
            payment_method_ref: "pm-default".to_string(),
            recorded_at: at,
        };

        store
            .conditional_update_status(
                "exec-1",
                ExecutionStatus::Pending,
                ExecutionStatus::Processing,
                ExecutionUpdate::new().with_order_id("order-1").with_payment(payment.clone()),
                at,
            )
            .await
            .unwrap()
            .applied()
            .expect("transition applies");

        let stored = store.get_execution("exec-1").await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Processing);
        assert_eq!(stored.order_id.as_deref(), Some("order-1"));
        assert_eq!(stored.payment, Some(payment));

        let conflict = store
            .conditional_update_status(
                "exec-1",
                ExecutionStatus::Pending,
                ExecutionStatus::PendingApproval,
                ExecutionUpdate::new(),
                at,
            )
            .await
            .unwrap();
        assert_eq!(
            conflict,
            TransitionOutcome::Conflict {
                current: Some(ExecutionStatus::Processing)
            }
        );

        let history = store.get_history("exec-1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].to, ExecutionStatus::Processing);
    }

    #[tokio::test]
    async fn test_list_by_status_and_claim() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut stale = make_execution("exec-1", "rule-1", "event-1");
        stale.status = ExecutionStatus::Processing;
        stale.updated_at = now() - Duration::hours(7);
        store.create_execution(&stale).await.unwrap();

        let cutoff = now() - Duration::hours(6);
        let stuck = store
            .list_by_status(ExecutionStatus::Processing, Some(cutoff), 10)
            .await
            .unwrap();
        assert_eq!(stuck.len(), 1);

        let claimed = store
            .acquire_claim("exec-1", "driver-a", cutoff, now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.claimed_by.as_deref(), Some("driver-a"));
        assert!(store
            .list_by_status(ExecutionStatus::Processing, Some(cutoff), 10)
            .await
            .unwrap()
            .is_empty());

        // Held and fresh: nobody else gets in
        assert!(store
            .acquire_claim("exec-1", "driver-b", cutoff, now())
            .await
            .unwrap()
            .is_none());

        let foreign = store
            .update_claimed(
                "exec-1",
                "driver-b",
                ExecutionStatus::Processing,
                ExecutionUpdate::new().with_order_id("order-b"),
                now(),
            )
            .await
            .unwrap();
        assert!(foreign.is_conflict());

        let failed = store
            .update_claimed(
                "exec-1",
                "driver-a",
                ExecutionStatus::Failed,
                ExecutionUpdate::new().with_error("boom"),
                now() + Duration::seconds(1),
            )
            .await
            .unwrap()
            .applied()
            .unwrap();
        assert_eq!(failed.claimed_by, None);
        assert_eq!(
            store.get_execution("exec-1").await.unwrap().unwrap().claimed_by,
            None
        );
    }

    #[tokio::test]
    async fn test_release_claim() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut execution = make_execution("exec-1", "rule-1", "event-1");
        execution.status = ExecutionStatus::Processing;
        store.create_execution(&execution).await.unwrap();

        let stale_before = now() - Duration::hours(6);
        store
            .acquire_claim("exec-1", "driver-a", stale_before, now())
            .await
            .unwrap()
            .unwrap();

        assert!(!store.release_claim("exec-1", "driver-b").await.unwrap());
        assert!(store.release_claim("exec-1", "driver-a").await.unwrap());
        assert!(store
            .acquire_claim("exec-1", "driver-b", stale_before, now())
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_rules_and_events() {
        let store = SqliteStore::in_memory().await.unwrap();
        let rule = make_rule("rule-1", "event-1");
        store.create_rule(&rule).await.unwrap();
        assert_eq!(store.get_rule("rule-1").await.unwrap(), Some(rule));

        store.set_rule_active("rule-1", false, now()).await.unwrap();
        assert!(store.list_active_rules().await.unwrap().is_empty());

        let template = make_series("series-1", Some(3));
        store.create_series(&template).await.unwrap();
        assert_eq!(store.get_series("series-1").await.unwrap(), Some(template.clone()));

        let first = template.first_instance("event-1", now());
        store.create_event(&first).await.unwrap();
        assert_eq!(store.get_event("event-1").await.unwrap(), Some(first.clone()));

        let duplicate = store
            .create_event(&template.first_instance("event-x", now()))
            .await;
        assert!(matches!(duplicate, Err(StoreError::DuplicateOccurrence { .. })));

        assert!(store.mark_event_completed("event-1", now()).await.unwrap());
        assert!(!store.mark_event_completed("event-1", now()).await.unwrap());
        assert!(store.next_open_event("series-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_one_off_events_do_not_collide() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.create_event(&make_event("event-1")).await.unwrap();
        store.create_event(&make_event("event-2")).await.unwrap();

        let mut edited = make_event("event-2");
        edited.title = "Alex's Graduation".to_string();
        edited.is_modified = true;
        store.update_event(&edited).await.unwrap();

        assert_eq!(store.get_event("event-2").await.unwrap(), Some(edited));
    }
}
