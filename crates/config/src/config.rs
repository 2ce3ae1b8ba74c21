//! Core configuration structures for the auto-gift service

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Service-wide settings
    pub service: ServiceConfig,

    /// Persistence
    pub store: StoreConfig,

    /// Daily execution scheduler
    pub scheduler: SchedulerConfig,

    /// Approval gate
    pub approval: ApprovalConfig,

    /// Execution pipeline
    pub orchestrator: OrchestratorConfig,

    /// Retry policy for transient coordinator failures
    pub retry: RetryConfig,

    /// Stuck-execution recovery
    pub recovery: RecoveryConfig,
}

/// Service environment configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Environment type (production, staging, local)
    pub environment: Environment,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Emit logs as JSON lines
    pub log_json: bool,

    /// Enable metrics collection
    pub metrics_enabled: bool,
}

/// Environment types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Staging,
    Local,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// `sqlite::memory:` or `sqlite:<path>`
    pub database_url: String,

    pub max_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How often the scheduler runs
    pub interval_secs: u64,

    /// Events up to this many days ahead of today are due
    pub lookahead_days: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    /// Minimum selection confidence for auto-approval (0..=1)
    pub auto_approve_confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Used when a rule carries no gift message
    pub default_gift_message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    pub multiplier: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// How often the recovery scanner runs
    pub interval_secs: u64,

    /// `processing` executions untouched this long are stuck
    pub stale_processing_secs: u64,

    /// `processing` executions with a pending payment are re-verified after this long
    pub payment_verification_secs: u64,

    /// Pause between consecutive re-drives
    pub inter_item_delay_ms: u64,

    /// Maximum executions per category per scan
    pub batch_limit: usize,
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_secs(self.base_delay_secs)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }
}

impl RecoveryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn stale_processing(&self) -> Duration {
        Duration::from_secs(self.stale_processing_secs)
    }

    pub fn payment_verification(&self) -> Duration {
        Duration::from_secs(self.payment_verification_secs)
    }

    pub fn inter_item_delay(&self) -> Duration {
        Duration::from_millis(self.inter_item_delay_ms)
    }
}

impl AppConfig {
    /// File-backed store, JSON logs
    pub fn production() -> Self {
        Self {
            service: ServiceConfig {
                environment: Environment::Production,
                log_level: "info".to_string(),
                log_json: true,
                metrics_enabled: true,
            },
            store: StoreConfig {
                database_url: "sqlite:autogift.db".to_string(),
                max_connections: 10,
            },
            ..Default::default()
        }
    }

    /// In-memory store, verbose pretty logs, no pacing between recovery items
    pub fn local() -> Self {
        Self {
            service: ServiceConfig {
                environment: Environment::Local,
                log_level: "debug".to_string(),
                log_json: false,
                metrics_enabled: false,
            },
            recovery: RecoveryConfig {
                inter_item_delay_ms: 0,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

// Default value functions
impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Local,
            log_level: "info".to_string(),
            log_json: false,
            metrics_enabled: true,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            max_connections: 5,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 86_400, // daily
            lookahead_days: 0,
        }
    }
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            auto_approve_confidence: 0.8,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_gift_message: "Thinking of you!".to_string(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_secs: 60,
            max_delay_secs: 3_600,
            multiplier: 2.0,
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,               // 5 minutes
            stale_processing_secs: 21_600,    // 6 hours
            payment_verification_secs: 600,   // 10 minutes
            inter_item_delay_ms: 1_000,
            batch_limit: 100,
        }
    }
}
