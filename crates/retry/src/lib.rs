//! Retry policy for the auto-gift pipeline
//!
//! - `RetryPolicy`: classifies coordinator failures and decides between a
//!   scheduled retry and a terminal failure
//! - `ExponentialBackoff`: delay schedule used by the policy

pub mod backoff;
pub mod policy;

pub use backoff::ExponentialBackoff;
pub use policy::{FailureClass, GiveUpReason, RetryDecision, RetryPolicy};
