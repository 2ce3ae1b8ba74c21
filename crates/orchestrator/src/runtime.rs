//! Wiring from `AppConfig` plus the periodic scheduler and recovery loops.

use autogift_config::{AppConfig, RetryConfig};
use autogift_metrics::MetricsCollector;
use autogift_retry::{ExponentialBackoff, RetryPolicy};
use autogift_store::{ExecutionStore, RuleStore, SqliteStore, StoreError};
use autogift_types::{Clock, ExecutionStatus};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::approval::{ApprovalGate, GateOutcome};
use crate::executor::PipelineExecutor;
use crate::orchestrator::{BuilderError, ExecutionOrchestrator};
use crate::ports::{
    FulfillmentCoordinator, NotificationService, OrderGateway, PaymentCoordinator,
    ProductSelector,
};
use crate::recovery::{RecoveryError, RecoveryReport, RecoveryScanner};
use crate::scheduler::{Scheduler, SchedulerError, SchedulerReport};

/// The external capabilities a runtime drives
#[derive(Clone)]
pub struct Ports {
    pub payments: Arc<dyn PaymentCoordinator>,
    pub fulfillment: Arc<dyn FulfillmentCoordinator>,
    pub orders: Arc<dyn OrderGateway>,
    pub notifier: Arc<dyn NotificationService>,
    pub selector: Arc<dyn ProductSelector>,
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Builder(#[from] BuilderError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Recovery(#[from] RecoveryError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of one scheduler tick: what was created, and where the gate
/// routed every `pending` execution
#[derive(Debug, Clone, Default)]
pub struct SchedulerTick {
    pub report: SchedulerReport,
    pub gated: Vec<(String, GateOutcome)>,
}

pub fn retry_policy(config: &RetryConfig) -> RetryPolicy {
    RetryPolicy::new(
        config.max_retries,
        ExponentialBackoff::new(config.base_delay(), config.max_delay())
            .with_multiplier(config.multiplier),
    )
}

/// Open the configured SQLite database and apply migrations
pub async fn open_store(config: &AppConfig) -> Result<Arc<SqliteStore>, StoreError> {
    let store = SqliteStore::connect(&config.store.database_url, config.store.max_connections).await?;
    Ok(Arc::new(store))
}

pub struct Runtime {
    pub orchestrator: Arc<ExecutionOrchestrator>,
    pub gate: Arc<ApprovalGate>,
    pub scheduler: Arc<Scheduler>,
    pub scanner: Arc<RecoveryScanner>,
    store: Arc<dyn ExecutionStore>,
    scheduler_interval: Duration,
    recovery_interval: Duration,
}

impl Runtime {
    pub fn from_config(
        config: &AppConfig,
        store: Arc<dyn ExecutionStore>,
        rules: Arc<dyn RuleStore>,
        ports: Ports,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RuntimeError> {
        let metrics = MetricsCollector::new();

        let executor = PipelineExecutor::new(
            store.clone(),
            ports.orders,
            ports.payments,
            ports.fulfillment,
            clock.clone(),
            metrics.clone(),
        );

        let orchestrator = Arc::new(
            ExecutionOrchestrator::builder()
                .with_store(store.clone())
                .with_rules(rules.clone())
                .with_executor(executor)
                .with_notifier(ports.notifier.clone())
                .with_clock(clock.clone())
                .with_retry_policy(retry_policy(&config.retry))
                .with_config(config.orchestrator.clone())
                .with_metrics(metrics.clone())
                .with_claim_ttl(config.recovery.stale_processing())
                .build()?,
        );

        let gate = Arc::new(ApprovalGate::new(
            store.clone(),
            rules.clone(),
            orchestrator.clone(),
            ports.notifier,
            clock.clone(),
            metrics.clone(),
            config.approval.auto_approve_confidence,
        ));

        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            rules,
            ports.selector,
            clock.clone(),
            metrics.clone(),
            config.scheduler.lookahead_days,
        ));

        let scanner = Arc::new(RecoveryScanner::new(
            store.clone(),
            orchestrator.clone(),
            clock,
            metrics,
            config.recovery.clone(),
        ));

        Ok(Self {
            orchestrator,
            gate,
            scheduler,
            scanner,
            store,
            scheduler_interval: config.scheduler.interval(),
            recovery_interval: config.recovery.interval(),
        })
    }

    /// Run the scheduler for today, then pass every `pending` execution
    /// through the approval gate
    pub async fn tick_scheduler(&self) -> Result<SchedulerTick, RuntimeError> {
        let report = self.scheduler.run().await?;

        let pending = self
            .store
            .list_by_status(ExecutionStatus::Pending, None, usize::MAX)
            .await?;

        let mut gated = Vec::with_capacity(pending.len());
        for execution in pending {
            match self.gate.evaluate(&execution.id).await {
                Ok(outcome) => gated.push((execution.id, outcome)),
                Err(e) => {
                    error!(execution_id = %execution.id, error = %e, "Approval gate failed")
                }
            }
        }

        Ok(SchedulerTick { report, gated })
    }

    pub async fn tick_recovery(&self) -> Result<RecoveryReport, RuntimeError> {
        Ok(self.scanner.scan().await?)
    }

    /// Start both periodic loops. They run until `RuntimeHandle::shutdown`.
    pub fn spawn(self: Arc<Self>) -> RuntimeHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let scheduler = {
            let runtime = self.clone();
            let mut shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(non_zero(runtime.scheduler_interval));
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = runtime.tick_scheduler().await {
                                error!(error = %e, "Scheduler tick failed");
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
                info!("Scheduler loop stopped");
            })
        };

        let recovery = {
            let runtime = self;
            let mut shutdown = shutdown_rx;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(non_zero(runtime.recovery_interval));
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = runtime.tick_recovery().await {
                                error!(error = %e, "Recovery tick failed");
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
                info!("Recovery loop stopped");
            })
        };

        info!("Runtime started");
        RuntimeHandle {
            shutdown: shutdown_tx,
            tasks: vec![scheduler, recovery],
        }
    }
}

/// Handle to the spawned loops
pub struct RuntimeHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl RuntimeHandle {
    /// Signal both loops and wait for them to finish their current tick
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);

        for result in join_all(self.tasks).await {
            if let Err(e) = result {
                warn!(error = %e, "Runtime task ended abnormally");
            }
        }
    }
}

fn non_zero(period: Duration) -> Duration {
    period.max(Duration::from_millis(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::ProcessOutcome;
    use crate::test_support::*;

    #[test]
    fn test_retry_policy_from_config() {
        let config = RetryConfig {
            max_retries: 5,
            base_delay_secs: 10,
            max_delay_secs: 30,
            multiplier: 3.0,
        };
        let policy = retry_policy(&config);

        assert_eq!(policy.max_retries(), 5);
        assert!(policy.has_budget(4));
        assert!(!policy.has_budget(5));
    }

    #[tokio::test]
    async fn test_tick_schedules_and_gates() {
        let h = Harness::new();
        h.seed_rule().await;

        let tick = h.runtime.tick_scheduler().await.unwrap();
        assert_eq!(tick.report.created.len(), 1);
        assert_eq!(tick.gated.len(), 1);

        let (id, outcome) = &tick.gated[0];
        assert_eq!(id, &tick.report.created[0]);
        assert!(matches!(
            outcome,
            GateOutcome::AutoApproved(ProcessOutcome::Completed(_))
        ));
    }

    #[tokio::test]
    async fn test_scheduler_tick_reports_metrics() {
        let h = Harness::new();
        h.seed_rule().await;
        h.runtime.tick_scheduler().await.unwrap();

        let metrics = MetricsCollector::new().gather().unwrap();
        assert!(metrics.contains("autogift_scheduler_run_duration_ms"));
        assert!(metrics.contains("autogift_executions_created_total"));
    }

    #[tokio::test]
    async fn test_tick_recovery_with_nothing_to_do() {
        let h = Harness::new();
        let report = h.runtime.tick_recovery().await.unwrap();
        assert_eq!(report, RecoveryReport::default());
    }

    #[tokio::test]
    async fn test_open_in_memory_store() {
        let store = open_store(&AppConfig::local()).await.unwrap();
        assert!(store.list_recent(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_spawned_loops_stop_on_shutdown() {
        let h = Harness::new();
        h.seed_rule().await;

        let runtime = Arc::new(h.runtime);
        let handle = runtime.clone().spawn();
        // First interval tick fires immediately
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown().await;

        let recent = runtime.orchestrator.recent_executions(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].status, ExecutionStatus::Completed);
    }
}
