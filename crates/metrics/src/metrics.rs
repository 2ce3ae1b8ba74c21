use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

lazy_static! {
    // ═══════════════════════════════════════════════════════════════════════════
    // EXECUTION METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Total number of candidate executions created by the scheduler
    pub static ref EXECUTIONS_CREATED: IntCounter = register_int_counter!(
        "autogift_executions_created_total",
        "Total number of candidate executions created"
    )
    .unwrap();

    /// Applied status transitions by target status
    pub static ref EXECUTION_TRANSITIONS: IntCounterVec = register_int_counter_vec!(
        "autogift_execution_transitions_total",
        "Total applied execution status transitions",
        &["to"]
    )
    .unwrap();

    /// Executions that have not reached a terminal status
    pub static ref ACTIVE_EXECUTIONS: IntGauge = register_int_gauge!(
        "autogift_executions_active",
        "Current number of non-terminal executions"
    )
    .unwrap();

    /// Conditional writes that lost to a concurrent driver
    pub static ref CONCURRENCY_CONFLICTS: IntCounter = register_int_counter!(
        "autogift_concurrency_conflicts_total",
        "Total conditional status writes lost to another driver"
    )
    .unwrap();

    // ═══════════════════════════════════════════════════════════════════════════
    // COORDINATOR METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Payment charges and verifications by result
    pub static ref PAYMENT_ATTEMPTS: IntCounterVec = register_int_counter_vec!(
        "autogift_payment_attempts_total",
        "Total payment charge/verify calls by result",
        &["result"]
    )
    .unwrap();

    /// Fulfillment submissions by result
    pub static ref FULFILLMENT_SUBMISSIONS: IntCounterVec = register_int_counter_vec!(
        "autogift_fulfillment_submissions_total",
        "Total fulfillment submissions by result",
        &["result"]
    )
    .unwrap();

    // ═══════════════════════════════════════════════════════════════════════════
    // RETRY & RECOVERY METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    pub static ref RETRIES_SCHEDULED: IntCounter = register_int_counter!(
        "autogift_retries_scheduled_total",
        "Total retries scheduled after transient failures"
    )
    .unwrap();

    pub static ref RECOVERY_REDRIVES: IntCounterVec = register_int_counter_vec!(
        "autogift_recovery_redrives_total",
        "Total executions re-driven by the recovery scanner",
        &["reason"]
    )
    .unwrap();

    // ═══════════════════════════════════════════════════════════════════════════
    // SCHEDULER METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Scheduler run duration histogram (in milliseconds)
    pub static ref SCHEDULER_RUN_DURATION: Histogram = register_histogram!(
        "autogift_scheduler_run_duration_ms",
        "Scheduler run duration in milliseconds",
        vec![10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0, 30000.0]
    )
    .unwrap();
}
