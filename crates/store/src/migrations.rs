//! Schema for the SQLite store. One statement per entry; applied in order on
//! every connect, so each must be idempotent.

pub(crate) const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS executions (
        id TEXT PRIMARY KEY NOT NULL,
        rule_id TEXT NOT NULL,
        event_id TEXT NOT NULL,
        owner_id TEXT NOT NULL,
        status TEXT NOT NULL,
        budget_limit TEXT NOT NULL,
        candidate_products TEXT NOT NULL,
        selection_confidence REAL NOT NULL,
        selected_products TEXT NOT NULL,
        total_amount TEXT NOT NULL,
        payment_method_ref TEXT,
        address_metadata TEXT,
        order_id TEXT,
        payment TEXT,
        fulfillment TEXT,
        error_message TEXT,
        retry_count INTEGER NOT NULL DEFAULT 0,
        next_retry_at INTEGER,
        approved_by TEXT,
        rejection_reason TEXT,
        claimed_by TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        completed_at INTEGER
    )
    "#,
    // At most one active execution per (rule, event)
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_executions_active_pair
    ON executions (rule_id, event_id)
    WHERE status IN ('pending', 'pending_approval', 'processing')
       OR (status = 'failed' AND next_retry_at IS NOT NULL)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_executions_status_updated
    ON executions (status, updated_at)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS execution_transitions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        execution_id TEXT NOT NULL,
        from_status TEXT NOT NULL,
        to_status TEXT NOT NULL,
        at INTEGER NOT NULL,
        details TEXT
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_transitions_execution
    ON execution_transitions (execution_id, id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS rules (
        id TEXT PRIMARY KEY NOT NULL,
        owner_id TEXT NOT NULL,
        recipient_id TEXT NOT NULL,
        occasion TEXT NOT NULL,
        event_id TEXT NOT NULL,
        series_id TEXT,
        budget_limit TEXT NOT NULL,
        selection_criteria TEXT NOT NULL,
        gift_message TEXT,
        payment_method_ref TEXT,
        is_active INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS event_series (
        series_id TEXT PRIMARY KEY NOT NULL,
        owner_id TEXT NOT NULL,
        recipient_id TEXT NOT NULL,
        title TEXT NOT NULL,
        anchor_date TEXT NOT NULL,
        recipient_address TEXT,
        recurring_type TEXT NOT NULL,
        end_date TEXT,
        max_occurrences INTEGER,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS events (
        id TEXT PRIMARY KEY NOT NULL,
        owner_id TEXT NOT NULL,
        recipient_id TEXT NOT NULL,
        title TEXT NOT NULL,
        date TEXT NOT NULL,
        recipient_address TEXT,
        series_id TEXT,
        recurring_type TEXT NOT NULL,
        end_date TEXT,
        max_occurrences INTEGER,
        occurrence_number INTEGER NOT NULL,
        is_modified INTEGER NOT NULL,
        completed_at INTEGER,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_events_series_occurrence
    ON events (series_id, occurrence_number)
    WHERE series_id IS NOT NULL
    "#,
];
