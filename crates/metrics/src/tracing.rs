use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when neither `RUST_LOG` nor the configured level parses
pub const DEFAULT_FILTER: &str = "info,autogift=debug";

/// Install the global subscriber. `RUST_LOG` wins over `log_level`.
pub fn init_tracing(log_level: &str, json: bool) -> Result<(), TracingError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = if json {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_level(true)
                    .json(),
            )
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .try_init()
    };

    result.map_err(|e| TracingError::InitError(e.to_string()))
}

/// Span carrying the identifiers every pipeline log line for one execution needs
pub fn execution_span(execution_id: &str, rule_id: &str, event_id: &str) -> Span {
    tracing::info_span!(
        "execution",
        execution_id = %execution_id,
        rule_id = %rule_id,
        event_id = %event_id,
    )
}

/// Tracing error types
#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("tracing initialization error: {0}")]
    InitError(String),
}
