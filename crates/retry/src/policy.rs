use autogift_types::{CoordinatorError, RejectionReason};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::ExponentialBackoff;

/// Whether retrying a failed call can help
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Timeouts, rate limits, 5xx-equivalents. `retry_after` is the
    /// capability's own hint, if it gave one.
    Transient { retry_after: Option<Duration> },

    /// Invalid address, declined card, invalid product
    Permanent,
}

impl FailureClass {
    pub fn is_transient(&self) -> bool {
        matches!(self, FailureClass::Transient { .. })
    }
}

/// What to do after a failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule retry number `retry_count` at `retry_at`
    Retry {
        retry_count: u32,
        delay: Duration,
        retry_at: DateTime<Utc>,
    },

    /// Stop; the failure is terminal
    GiveUp { reason: GiveUpReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GiveUpReason {
    Permanent,
    RetriesExhausted,
}

/// Maps (retries so far, failure class) to a retry time or a terminal failure
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff: ExponentialBackoff,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: ExponentialBackoff) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether an execution that has already retried `retry_count` times may
    /// be retried again
    pub fn has_budget(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    pub fn classify_error(error: &CoordinatorError) -> FailureClass {
        match error {
            CoordinatorError::Timeout { .. } | CoordinatorError::Connection(_) => {
                FailureClass::Transient { retry_after: None }
            }
            CoordinatorError::RateLimited { retry_after_secs } => FailureClass::Transient {
                retry_after: retry_after_secs.map(Duration::from_secs),
            },
            CoordinatorError::Unavailable { status, .. } if *status >= 500 || *status == 429 => {
                FailureClass::Transient { retry_after: None }
            }
            CoordinatorError::Unavailable { .. }
            | CoordinatorError::Declined { .. }
            | CoordinatorError::InvalidAddress(_)
            | CoordinatorError::InvalidProduct(_)
            | CoordinatorError::InvalidRequest(_) => FailureClass::Permanent,
        }
    }

    pub fn classify_rejection(reason: RejectionReason) -> FailureClass {
        match reason {
            RejectionReason::CapacityExceeded | RejectionReason::RateLimited => {
                FailureClass::Transient { retry_after: None }
            }
            RejectionReason::InvalidAddress
            | RejectionReason::InvalidProduct
            | RejectionReason::OutOfStock
            | RejectionReason::Other => FailureClass::Permanent,
        }
    }

    /// Decide the fate of an execution that has already been retried
    /// `retry_count` times and just failed again with `class`.
    pub fn decide(&self, retry_count: u32, class: FailureClass, now: DateTime<Utc>) -> RetryDecision {
        let retry_after = match class {
            FailureClass::Permanent => {
                return RetryDecision::GiveUp {
                    reason: GiveUpReason::Permanent,
                }
            }
            FailureClass::Transient { retry_after } => retry_after,
        };

        if !self.has_budget(retry_count) {
            debug!(retry_count, max_retries = self.max_retries, "Retry budget exhausted");
            return RetryDecision::GiveUp {
                reason: GiveUpReason::RetriesExhausted,
            };
        }

        let delay = self
            .backoff
            .delay_for_attempt(retry_count)
            .max(retry_after.unwrap_or(Duration::ZERO));
        let retry_at = now
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::days(36_500));

        RetryDecision::Retry {
            retry_count: retry_count + 1,
            delay,
            retry_at,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, ExponentialBackoff::default())
    }
}
