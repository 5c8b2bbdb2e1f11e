//! # AATR Scheduler Crate
//!
//! Periodically finds strategies with work to do and hands each one to the
//! orchestrator, at most one worker per strategy at a time.
//!
//! ## Architectural Principles
//!
//! - **Leases, not locks:** a worker claims a strategy by conditionally writing a
//!   time-bounded lease into the record. A crashed worker's lease simply expires
//!   and the strategy is picked up by the next pass.
//! - **Bounded parallelism:** independent strategies advance concurrently on a
//!   `Semaphore` + `JoinSet` pool capped at `scheduler.max_concurrency`.
//! - **Resumable stages:** long-running jobs come back as pending handles, so a
//!   worker never blocks on a training run.

use chrono::{Duration as ChronoDuration, Utc};
use configuration::SchedulerConfig;
use core_types::{GenerationRequest, Lease, StrategyId, StrategyRecord, StrategyStatus};
use database::{DbError, PageToken, StateStore, StatusFilter};
use orchestrator::{AdvanceOutcome, Orchestrator, OrchestratorError};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval};

pub mod error;
pub mod summary;

pub use error::SchedulerError;
pub use summary::{MonitorSummary, PassSummary};

pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    store: Arc<dyn StateStore>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<Orchestrator>, config: SchedulerConfig) -> Self {
        let store = orchestrator.store().clone();
        Self {
            orchestrator,
            store,
            config,
        }
    }

    /// Creates a new strategy at `PENDING_HYPOTHESIS`.
    pub async fn submit(&self, request: GenerationRequest) -> Result<StrategyId, SchedulerError> {
        if request.universe.is_empty() {
            return Err(SchedulerError::InvalidRequest(
                "universe must name at least one symbol".to_string(),
            ));
        }
        if request.risk.max_leverage <= Decimal::ZERO {
            return Err(SchedulerError::InvalidRequest(
                "max_leverage must be positive".to_string(),
            ));
        }

        let record = self
            .store
            .create(&StrategyRecord::new(request, Utc::now()))
            .await?;
        tracing::info!(
            strategy_id = %record.strategy_id,
            seed = record.request.seed,
            universe = ?record.request.universe,
            "Strategy submitted"
        );
        Ok(record.strategy_id)
    }

    fn lease_ttl(&self) -> ChronoDuration {
        ChronoDuration::from_std(self.config.lease_ttl)
            .unwrap_or_else(|_| ChronoDuration::minutes(10))
    }

    /// Claims a lease on a strategy for this worker.
    ///
    /// Returns `None` for terminal or not-yet-due strategies, for strategies under an
    /// unexpired foreign lease, and when another worker wins the claim race. An
    /// expired lease is taken over.
    pub async fn claim_lease(&self, strategy_id: StrategyId) -> Result<Option<Lease>, SchedulerError> {
        let record = self.store.read(strategy_id).await?;
        let now = Utc::now();
        if record.is_terminal() || !record.is_due(now) {
            return Ok(None);
        }
        if let Some(held) = record.active_lease(now) {
            tracing::debug!(%strategy_id, owner = %held.owner, "Strategy already leased");
            return Ok(None);
        }
        if let Some(expired) = &record.lease {
            tracing::info!(%strategy_id, previous_owner = %expired.owner, "Taking over expired lease");
        }

        let lease = Lease::new(self.config.worker_id.clone(), now, self.lease_ttl());
        let mut claimed = record.clone();
        claimed.lease = Some(lease.clone());
        match self
            .store
            .conditional_write(strategy_id, record.version, &claimed)
            .await
        {
            Ok(_) => Ok(Some(lease)),
            Err(DbError::VersionConflict { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort lease release; if it fails the lease expires on its own.
    async fn release_lease(store: &dyn StateStore, strategy_id: StrategyId, lease: &Lease) {
        let record = match store.read(strategy_id).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(%strategy_id, error = %e, "Could not read strategy to release lease");
                return;
            }
        };
        if record.lease.as_ref().map(|held| held.token) != Some(lease.token) {
            return;
        }
        let mut released = record.clone();
        released.lease = None;
        if let Err(e) = store
            .conditional_write(strategy_id, record.version, &released)
            .await
        {
            tracing::warn!(%strategy_id, error = %e, "Lease release failed, leaving it to expire");
        }
    }

    /// One sweep over every active strategy.
    pub async fn run_pass(&self) -> Result<PassSummary, SchedulerError> {
        let mut summary = PassSummary::default();
        let pool = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut tasks: JoinSet<(StrategyId, Result<AdvanceOutcome, OrchestratorError>)> =
            JoinSet::new();

        let filter = StatusFilter::active();
        let mut page_token: Option<PageToken> = None;
        loop {
            let page = self
                .store
                .list(&filter, page_token.as_ref(), self.config.page_size)
                .await?;

            for record in page.records {
                summary.scanned += 1;
                let now = Utc::now();
                if !record.is_due(now) {
                    summary.not_due += 1;
                    continue;
                }
                if record.active_lease(now).is_some() {
                    summary.leased += 1;
                    continue;
                }

                // Hold a worker slot before claiming, so no lease sits idle in the queue.
                let permit = Arc::clone(&pool).acquire_owned().await?;
                let strategy_id = record.strategy_id;
                let lease = match self.claim_lease(strategy_id).await {
                    Ok(Some(lease)) => lease,
                    Ok(None) => {
                        summary.leased += 1;
                        continue;
                    }
                    Err(e) => {
                        summary.errors += 1;
                        tracing::warn!(%strategy_id, error = %e, "Lease claim failed");
                        continue;
                    }
                };

                summary.dispatched += 1;
                let orchestrator = Arc::clone(&self.orchestrator);
                let store = Arc::clone(&self.store);
                tasks.spawn(async move {
                    let _permit = permit;
                    let result = orchestrator.advance_leased(strategy_id, &lease).await;
                    // Writing outcomes clear the lease themselves.
                    if !matches!(&result, Ok(outcome) if outcome.wrote()) {
                        Self::release_lease(store.as_ref(), strategy_id, &lease).await;
                    }
                    (strategy_id, result)
                });
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(outcome))) => summary.record(&outcome),
                Ok((strategy_id, Err(e))) => {
                    summary.errors += 1;
                    tracing::error!(%strategy_id, error = %e, "Advance failed");
                }
                Err(e) => {
                    summary.errors += 1;
                    tracing::error!(error = %e, "Advance task panicked");
                }
            }
        }

        Ok(summary)
    }

    /// Collects live performance of every deployed, non-archived strategy.
    pub async fn monitor_deployed(&self) -> Result<MonitorSummary, SchedulerError> {
        let mut summary = MonitorSummary::default();
        let filter = StatusFilter::only(StrategyStatus::Deployed);
        let mut page_token: Option<PageToken> = None;
        loop {
            let page = self
                .store
                .list(&filter, page_token.as_ref(), self.config.page_size)
                .await?;
            for record in page.records {
                match self.orchestrator.collect_performance(record.strategy_id).await {
                    Ok(_) => summary.collected += 1,
                    Err(e) => {
                        summary.errors += 1;
                        tracing::warn!(strategy_id = %record.strategy_id, error = %e, "Performance collection failed");
                    }
                }
            }
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(summary)
    }

    /// Runs passes on `scheduler.tick_interval` until `shutdown` flips to `true`.
    ///
    /// A failed pass is logged and retried on the next tick.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), SchedulerError> {
        let mut timer = interval(self.config.tick_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            worker_id = %self.config.worker_id,
            max_concurrency = self.config.max_concurrency,
            tick = ?self.config.tick_interval,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    match self.run_pass().await {
                        Ok(summary) if summary.scanned > 0 => tracing::info!(%summary, "Scheduler pass complete"),
                        Ok(_) => tracing::debug!("Scheduler pass found no active strategies"),
                        Err(e) => tracing::error!(error = %e, "Scheduler pass failed"),
                    }
                    if self.config.monitor_deployed {
                        match self.monitor_deployed().await {
                            Ok(monitor) if monitor.collected + monitor.errors > 0 => tracing::info!(
                                collected = monitor.collected,
                                errors = monitor.errors,
                                "Performance sweep complete"
                            ),
                            Ok(_) => {}
                            Err(e) => tracing::error!(error = %e, "Performance sweep failed"),
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Scheduler shutting down");
                        return Ok(());
                    }
                }
            }
        }
    }
}
