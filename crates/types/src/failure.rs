use serde::{Deserialize, Serialize};
use std::fmt;

/// Sub-step of the `processing` state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    OrderCreation,
    Payment,
    Fulfillment,
}

impl PipelineStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStep::OrderCreation => "order_creation",
            PipelineStep::Payment => "payment",
            PipelineStep::Fulfillment => "fulfillment",
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a sub-step failed, in the pipeline's own taxonomy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GiftFailure {
    /// Bad input (nothing selected, unresolved address); never retried
    Validation { step: PipelineStep, message: String },

    /// Timeouts, rate limits, outages; retried per retry policy
    TransientExternal { step: PipelineStep, detail: String },

    /// Declined payment, rejected fulfillment; fatal
    PermanentExternal { step: PipelineStep, detail: String },
}

impl GiftFailure {
    pub fn validation(step: PipelineStep, message: impl Into<String>) -> Self {
        GiftFailure::Validation {
            step,
            message: message.into(),
        }
    }

    pub fn step(&self) -> PipelineStep {
        match self {
            GiftFailure::Validation { step, .. }
            | GiftFailure::TransientExternal { step, .. }
            | GiftFailure::PermanentExternal { step, .. } => *step,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, GiftFailure::TransientExternal { .. })
    }

    /// Internal detail for logs; may contain raw vendor payloads
    pub fn detail(&self) -> &str {
        match self {
            GiftFailure::Validation { message, .. } => message,
            GiftFailure::TransientExternal { detail, .. }
            | GiftFailure::PermanentExternal { detail, .. } => detail,
        }
    }

    /// Text stored in `error_message` and shown to the owner
    pub fn user_message(&self) -> String {
        match self {
            GiftFailure::Validation { message, .. } => message.clone(),
            GiftFailure::TransientExternal { step, .. } => match step {
                PipelineStep::OrderCreation => {
                    "We couldn't place the order just now and will try again.".to_string()
                }
                PipelineStep::Payment => {
                    "The payment service is temporarily unavailable; we will try again.".to_string()
                }
                PipelineStep::Fulfillment => {
                    "Our delivery partner is temporarily unavailable; we will try again."
                        .to_string()
                }
            },
            GiftFailure::PermanentExternal { step, .. } => match step {
                PipelineStep::OrderCreation => {
                    "The order could not be created for this gift.".to_string()
                }
                PipelineStep::Payment => {
                    "The payment was declined. Please update your payment method.".to_string()
                }
                PipelineStep::Fulfillment => {
                    "Our delivery partner could not accept this gift.".to_string()
                }
            },
        }
    }
}

impl fmt::Display for GiftFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GiftFailure::Validation { step, message } => write!(f, "{step}: validation: {message}"),
            GiftFailure::TransientExternal { step, detail } => {
                write!(f, "{step}: transient: {detail}")
            }
            GiftFailure::PermanentExternal { step, detail } => {
                write!(f, "{step}: permanent: {detail}")
            }
        }
    }
}
