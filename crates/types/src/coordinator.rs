//! Normalized results exchanged with the external payment, fulfillment,
//! checkout and notification capabilities.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::{LineItem, PaymentStatus, ShippingAddress};

/// Result of a charge or a payment verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentResult {
    pub status: PaymentStatus,
    pub reference: String,
}

/// Machine-readable reason attached to a fulfillment rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    InvalidAddress,
    InvalidProduct,
    OutOfStock,
    CapacityExceeded,
    RateLimited,
    Other,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::InvalidAddress => "invalid_address",
            RejectionReason::InvalidProduct => "invalid_product",
            RejectionReason::OutOfStock => "out_of_stock",
            RejectionReason::CapacityExceeded => "capacity_exceeded",
            RejectionReason::RateLimited => "rate_limited",
            RejectionReason::Other => "other",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of handing an order to the fulfillment vendor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FulfillmentResult {
    Accepted {
        fulfillment_ref: String,
    },
    Rejected {
        reason: RejectionReason,
        detail: String,
    },
}

/// Order handed to the checkout subsystem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrder {
    /// Idempotency key: one order per execution
    pub execution_id: String,
    pub owner_id: String,
    pub line_items: Vec<LineItem>,
    pub shipping_address: ShippingAddress,
    pub gift_message: String,
    pub total_amount: Decimal,
}

/// Owner-facing notification kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ApprovalRequested,
    GiftRejected,
    GiftSent,
    ExecutionFailed,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::ApprovalRequested => "approval_requested",
            NotificationKind::GiftRejected => "gift_rejected",
            NotificationKind::GiftSent => "gift_sent",
            NotificationKind::ExecutionFailed => "execution_failed",
        }
    }
}

/// Errors surfaced by an external capability
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    #[error("{operation} timed out")]
    Timeout { operation: String },

    #[error("rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("service unavailable ({status}): {message}")]
    Unavailable { status: u16, message: String },

    #[error("payment declined: {reason}")]
    Declined { reason: String },

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid product: {0}")]
    InvalidProduct(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("connection error: {0}")]
    Connection(String),
}
