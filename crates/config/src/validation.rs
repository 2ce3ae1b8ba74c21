//! Configuration validation

use crate::{AppConfig, ConfigError, Result};

/// Validation error details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate the entire application configuration
pub fn validate_config(config: &AppConfig) -> Result<()> {
    let mut errors = Vec::new();

    // Service
    if let Err(e) = validate_log_level(&config.service.log_level) {
        errors.push(e);
    }

    // Store
    if let Err(e) = validate_database_url(&config.store.database_url) {
        errors.push(ValidationError::new("store.database_url", e));
    }

    if config.store.max_connections == 0 {
        errors.push(ValidationError::new(
            "store.max_connections",
            "must be greater than 0",
        ));
    }

    // Scheduler
    if config.scheduler.interval_secs == 0 {
        errors.push(ValidationError::new(
            "scheduler.interval_secs",
            "must be greater than 0",
        ));
    }

    // Approval
    let confidence = config.approval.auto_approve_confidence;
    if !(0.0..=1.0).contains(&confidence) {
        errors.push(ValidationError::new(
            "approval.auto_approve_confidence",
            format!("must be between 0 and 1, got {confidence}"),
        ));
    }

    // Orchestrator
    if config.orchestrator.default_gift_message.trim().is_empty() {
        errors.push(ValidationError::new(
            "orchestrator.default_gift_message",
            "default gift message is required",
        ));
    }

    // Retry
    if config.retry.base_delay_secs == 0 {
        errors.push(ValidationError::new(
            "retry.base_delay_secs",
            "must be greater than 0",
        ));
    }

    if config.retry.max_delay_secs < config.retry.base_delay_secs {
        errors.push(ValidationError::new(
            "retry.max_delay_secs",
            "must be >= retry.base_delay_secs",
        ));
    }

    if config.retry.multiplier < 1.0 {
        errors.push(ValidationError::new(
            "retry.multiplier",
            "must be >= 1.0",
        ));
    }

    // Recovery
    if config.recovery.interval_secs == 0 {
        errors.push(ValidationError::new(
            "recovery.interval_secs",
            "must be greater than 0",
        ));
    }

    if config.recovery.payment_verification_secs >= config.recovery.stale_processing_secs {
        errors.push(ValidationError::new(
            "recovery.payment_verification_secs",
            "must be shorter than recovery.stale_processing_secs",
        ));
    }

    if config.recovery.batch_limit == 0 {
        errors.push(ValidationError::new(
            "recovery.batch_limit",
            "must be greater than 0",
        ));
    }

    // Return all errors if any were found
    if !errors.is_empty() {
        let error_msg = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ConfigError::ValidationError(error_msg));
    }

    Ok(())
}

/// Validate a sqlx SQLite URL
pub fn validate_database_url(url: &str) -> std::result::Result<(), String> {
    if url.is_empty() {
        return Err("database URL cannot be empty".to_string());
    }

    if !url.starts_with("sqlite:") {
        return Err("database URL must start with sqlite:".to_string());
    }

    Ok(())
}

/// Validate log level
fn validate_log_level(level: &str) -> std::result::Result<(), ValidationError> {
    match level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ValidationError::new(
            "service.log_level",
            format!(
                "invalid log level '{level}', must be one of: trace, debug, info, warn, error"
            ),
        )),
    }
}
