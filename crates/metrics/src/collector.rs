use std::time::Duration;

use autogift_types::ExecutionStatus;
use prometheus::{Encoder, TextEncoder};

use crate::metrics::*;

/// Metrics collector for the auto-gift pipeline
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EXECUTION METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Record a new candidate execution
    pub fn record_execution_created(&self) {
        EXECUTIONS_CREATED.inc();
        ACTIVE_EXECUTIONS.inc();
    }

    /// Record an applied status transition. `terminal` is true when the
    /// execution will not move again (completed, rejected, or failed with
    /// no retry scheduled).
    pub fn record_transition(&self, to: ExecutionStatus, terminal: bool) {
        EXECUTION_TRANSITIONS.with_label_values(&[to.as_str()]).inc();

        if terminal {
            ACTIVE_EXECUTIONS.dec();
        }
    }

    pub fn record_conflict(&self) {
        CONCURRENCY_CONFLICTS.inc();
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // COORDINATOR METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// `result` is a payment status or `error`
    pub fn record_payment_attempt(&self, result: &str) {
        PAYMENT_ATTEMPTS.with_label_values(&[result]).inc();
    }

    /// `result` is `accepted`, `rejected` or `error`
    pub fn record_fulfillment(&self, result: &str) {
        FULFILLMENT_SUBMISSIONS.with_label_values(&[result]).inc();
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // RETRY & RECOVERY METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn record_retry_scheduled(&self) {
        RETRIES_SCHEDULED.inc();
    }

    pub fn record_recovery_redrive(&self, reason: RecoveryReason) {
        let reason_str = match reason {
            RecoveryReason::StaleProcessing => "stale_processing",
            RecoveryReason::PaymentPending => "payment_pending",
            RecoveryReason::RetryDue => "retry_due",
            RecoveryReason::Manual => "manual",
        };

        RECOVERY_REDRIVES.with_label_values(&[reason_str]).inc();
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SCHEDULER METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn record_scheduler_run(&self, duration: Duration) {
        SCHEDULER_RUN_DURATION.observe(duration.as_millis() as f64);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EXPORT
    // ═══════════════════════════════════════════════════════════════════════════

    /// Export metrics in Prometheus text format
    pub fn gather(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| MetricsError::EncodingError(e.to_string()))?;

        String::from_utf8(buffer).map_err(|e| MetricsError::EncodingError(e.to_string()))
    }
}

/// Why the recovery scanner picked an execution up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryReason {
    StaleProcessing,
    PaymentPending,
    RetryDue,
    Manual,
}

/// Metrics error types
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("encoding error: {0}")]
    EncodingError(String),
}
