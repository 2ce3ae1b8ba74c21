use autogift_types::ExecutionStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("duplicate ID: {0}")]
    DuplicateId(String),

    #[error("rule {rule_id} already has an active execution for event {event_id}")]
    ActiveExecutionExists { rule_id: String, event_id: String },

    #[error("series {series_id} already has occurrence {occurrence_number}")]
    DuplicateOccurrence {
        series_id: String,
        occurrence_number: u32,
    },

    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: ExecutionStatus,
        to: ExecutionStatus,
    },

    #[error("database error: {0}")]
    DatabaseError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::SerializationError(e.to_string())
    }
}
