//! # AATR Orchestrator Crate
//!
//! The strategy lifecycle state machine. `advance` moves one strategy across at
//! most one edge of
//! `PENDING_HYPOTHESIS → HYPOTHESIZED → BACKTESTING → BACKTESTED → TRAINING → TRAINED → DEPLOYING → DEPLOYED`,
//! with `REJECTED`, `FAILED` and `CANCELLED` as terminal side branches.
//!
//! ## Architectural Principles
//!
//! - **Read, compute, conditionally write:** every mutating call reads a record and
//!   its version, computes the successor, and persists it with a single
//!   `conditional_write`. A conflicting writer forces a fresh read; if the status has
//!   moved in the meantime the call reports `Superseded` rather than writing the
//!   same transition twice.
//! - **Stage errors never escape:** adapter failures become retry bookkeeping or a
//!   `FAILED` record. Only store and lifecycle errors are returned to callers.
//! - **No hidden state:** the orchestrator holds no per-strategy memory. Workers
//!   coordinate exclusively through the store.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use configuration::{GateConfig, OrchestratorConfig};
use core_types::{
    EntryOutcome, FailureKind, Lease, LifecycleStep, Lineage, PendingJob, PerformanceSnapshot,
    Stage, StageEntry, StageFailure, StageResult, StrategyId, StrategyRecord, StrategyStatus,
    TerminalReason,
};
use database::{DbError, StateStore};
use stages::{StageAdapters, StageContext, StageError, StageOutput};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use uuid::Uuid;

pub mod error;
pub mod gate;
pub mod outcome;

pub use error::OrchestratorError;
pub use outcome::AdvanceOutcome;

/// Audit events (requeue, cancel, archive) are logged under this target.
pub const AUDIT_TARGET: &str = "aatr::audit";

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    now + ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::days(365))
}

/// Drives strategies through their lifecycle against a shared state store.
pub struct Orchestrator {
    store: Arc<dyn StateStore>,
    adapters: StageAdapters,
    config: OrchestratorConfig,
    gates: GateConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn StateStore>,
        adapters: StageAdapters,
        config: OrchestratorConfig,
        gates: GateConfig,
    ) -> Self {
        Self {
            store,
            adapters,
            config,
            gates,
        }
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Moves the strategy across at most one lifecycle edge.
    pub async fn advance(&self, strategy_id: StrategyId) -> Result<AdvanceOutcome, OrchestratorError> {
        self.advance_inner(strategy_id, None).await
    }

    /// Like `advance`, on behalf of the holder of `lease`. The write clears the lease.
    pub async fn advance_leased(
        &self,
        strategy_id: StrategyId,
        lease: &Lease,
    ) -> Result<AdvanceOutcome, OrchestratorError> {
        self.advance_inner(strategy_id, Some(lease.token)).await
    }

    async fn advance_inner(
        &self,
        strategy_id: StrategyId,
        lease_token: Option<Uuid>,
    ) -> Result<AdvanceOutcome, OrchestratorError> {
        let mut observed: Option<StrategyStatus> = None;

        for conflict in 0..=self.config.max_conflict_retries {
            let record = self.store.read(strategy_id).await?;

            match observed {
                Some(status) if status != record.status => {
                    tracing::info!(
                        %strategy_id,
                        observed = %status,
                        current = %record.status,
                        "Strategy advanced by another writer"
                    );
                    return Ok(AdvanceOutcome::Superseded {
                        observed: status,
                        current: record.status,
                    });
                }
                _ => observed = Some(record.status),
            }

            let Some(step) = record.status.step() else {
                return Ok(AdvanceOutcome::Noop);
            };

            let now = Utc::now();
            if let Some(lease) = record.active_lease(now) {
                if Some(lease.token) != lease_token {
                    tracing::debug!(%strategy_id, owner = %lease.owner, "Strategy is leased elsewhere");
                    return Ok(AdvanceOutcome::Leased);
                }
            }
            if let Some(next_attempt_at) = record.next_attempt_at.filter(|at| *at > now) {
                return Ok(AdvanceOutcome::NotDue { next_attempt_at });
            }

            let (next, outcome) = self.compute(&record, step, now).await?;

            match self
                .store
                .conditional_write(strategy_id, record.version, &next)
                .await
            {
                Ok(version) => {
                    tracing::info!(
                        %strategy_id,
                        stage = %step.stage(),
                        status = %next.status,
                        version,
                        attempt = next.attempts_for(step.stage()),
                        outcome = %outcome,
                        "Strategy advanced"
                    );
                    return Ok(outcome);
                }
                Err(DbError::VersionConflict {
                    expected, actual, ..
                }) => {
                    tracing::warn!(
                        %strategy_id,
                        expected,
                        actual,
                        conflict = conflict + 1,
                        "Version conflict, re-reading strategy"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(OrchestratorError::ConflictRetriesExhausted {
            strategy_id,
            attempts: self.config.max_conflict_retries + 1,
        })
    }

    /// Computes the successor record for one step. Invokes the stage adapter for `Run` steps.
    async fn compute(
        &self,
        record: &StrategyRecord,
        step: LifecycleStep,
        now: DateTime<Utc>,
    ) -> Result<(StrategyRecord, AdvanceOutcome), OrchestratorError> {
        let mut next = record.clone();
        next.lease = None;
        next.updated_at = now;

        let stage = match step {
            LifecycleStep::Start(stage) => {
                let to = stage.running_status();
                next.transition(to, now)?;
                return Ok((
                    next,
                    AdvanceOutcome::Advanced {
                        from: record.status,
                        to,
                    },
                ));
            }
            LifecycleStep::Run(stage) => stage,
        };

        let context = StageContext::from_record(record, stage);
        let adapter = self.adapters.get(stage);
        let call = async {
            match record.pending_for(stage) {
                Some(job) => {
                    tracing::debug!(strategy_id = %record.strategy_id, %stage, handle = %job.handle, "Polling stage job");
                    adapter.poll(&context, &job.handle).await
                }
                None => {
                    tracing::debug!(strategy_id = %record.strategy_id, %stage, attempt = context.attempt, "Running stage");
                    adapter.run(&context).await
                }
            }
        };
        // A hung collaborator must not outlive the lease this worker holds.
        let output = match timeout(self.config.stage_timeout, call).await {
            Ok(output) => output,
            Err(_) => {
                tracing::warn!(
                    strategy_id = %record.strategy_id,
                    %stage,
                    timeout = ?self.config.stage_timeout,
                    "Stage call timed out"
                );
                Err(StageError::transient(format!(
                    "{stage} stage timed out after {:?}",
                    self.config.stage_timeout
                )))
            }
        };

        let outcome = match output {
            Ok(StageOutput::Complete(result)) => {
                self.complete(&mut next, stage, context.attempt, result, now)?
            }
            Ok(StageOutput::Pending(handle)) => {
                next.pending = Some(match record.pending_for(stage) {
                    Some(job) => PendingJob {
                        handle: handle.clone(),
                        polls: job.polls + 1,
                        ..job.clone()
                    },
                    None => PendingJob {
                        stage,
                        handle: handle.clone(),
                        submitted_at: now,
                        polls: 0,
                    },
                });
                next.next_attempt_at = Some(after(now, self.config.poll_interval));
                AdvanceOutcome::Waiting { handle }
            }
            Err(error) => self.stage_failed(&mut next, stage, context.attempt, error, now)?,
        };
        Ok((next, outcome))
    }

    fn complete(
        &self,
        next: &mut StrategyRecord,
        stage: Stage,
        attempt: u32,
        result: StageResult,
        now: DateTime<Utc>,
    ) -> Result<AdvanceOutcome, OrchestratorError> {
        if result.stage() != stage {
            let error = StageError::permanent(format!(
                "{stage} adapter returned a {} result",
                result.stage()
            ));
            return self.fail(next, stage, attempt, error, "invalid_result", now);
        }
        if let Err(e) = result.validate() {
            return self.fail(next, stage, attempt, e.into(), "invalid_result", now);
        }

        next.pending = None;
        next.next_attempt_at = None;
        next.last_error = None;

        if let Some(gate) = gate::evaluate(&self.gates, &result) {
            next.append_result(StageEntry {
                stage,
                attempt,
                recorded_at: now,
                outcome: EntryOutcome::Rejected {
                    result,
                    gate: gate.clone(),
                },
            })?;
            next.terminal_reason = Some(TerminalReason::new(
                gate.code.clone(),
                format!(
                    "{} {} did not clear threshold {}",
                    gate.metric, gate.observed, gate.threshold
                ),
            ));
            next.transition(StrategyStatus::Rejected, now)?;
            return Ok(AdvanceOutcome::Rejected { gate });
        }

        if let StageResult::Hypothesis(hypothesis) = &result {
            next.set_definition(hypothesis.definition.clone())?;
        }
        next.append_result(StageEntry {
            stage,
            attempt,
            recorded_at: now,
            outcome: EntryOutcome::Completed { result },
        })?;

        let from = next.status;
        let to = stage.completed_status();
        next.transition(to, now)?;
        Ok(AdvanceOutcome::Advanced { from, to })
    }

    fn stage_failed(
        &self,
        next: &mut StrategyRecord,
        stage: Stage,
        attempt: u32,
        error: StageError,
        now: DateTime<Utc>,
    ) -> Result<AdvanceOutcome, OrchestratorError> {
        if error.kind == FailureKind::Permanent {
            return self.fail(next, stage, attempt, error, "permanent_error", now);
        }

        let failures = next.bump_attempts(stage);
        let ceiling = self.config.max_attempts_for(stage);
        if failures >= ceiling {
            let error = StageError::transient(format!(
                "{} (gave up after {failures} attempts)",
                error.detail
            ));
            return self.fail(next, stage, attempt, error, "retries_exhausted", now);
        }

        let next_attempt_at = after(now, self.config.backoff_for(failures));
        tracing::warn!(
            strategy_id = %next.strategy_id,
            %stage,
            attempt = failures,
            ceiling,
            error = %error.detail,
            "Transient stage failure, backing off"
        );
        next.last_error = Some(StageFailure {
            kind: error.kind,
            detail: error.detail,
            attempt,
            occurred_at: now,
        });
        next.next_attempt_at = Some(next_attempt_at);
        Ok(AdvanceOutcome::Retrying {
            attempt: failures,
            next_attempt_at,
        })
    }

    fn fail(
        &self,
        next: &mut StrategyRecord,
        stage: Stage,
        attempt: u32,
        error: StageError,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<AdvanceOutcome, OrchestratorError> {
        let failure = StageFailure {
            kind: error.kind,
            detail: error.detail,
            attempt,
            occurred_at: now,
        };
        tracing::error!(
            strategy_id = %next.strategy_id,
            %stage,
            code,
            error = %failure.detail,
            "Stage failed"
        );

        next.append_result(StageEntry {
            stage,
            attempt,
            recorded_at: now,
            outcome: EntryOutcome::Failed {
                failure: failure.clone(),
            },
        })?;
        let reason = TerminalReason::new(code, format!("{stage}: {}", failure.detail));
        next.terminal_reason = Some(reason.clone());
        next.last_error = Some(failure);
        next.pending = None;
        next.next_attempt_at = None;
        next.transition(StrategyStatus::Failed, now)?;
        Ok(AdvanceOutcome::Failed { reason })
    }

    /// Moves a non-terminal strategy to `CANCELLED`. Returns `false` if it was already terminal.
    pub async fn cancel(
        &self,
        strategy_id: StrategyId,
        reason: &str,
    ) -> Result<bool, OrchestratorError> {
        for _ in 0..=self.config.max_conflict_retries {
            let record = self.store.read(strategy_id).await?;
            if record.is_terminal() {
                return Ok(false);
            }

            let now = Utc::now();
            let mut next = record.clone();
            next.terminal_reason = Some(TerminalReason::new("cancelled", reason));
            next.pending = None;
            next.next_attempt_at = None;
            next.lease = None;
            next.transition(StrategyStatus::Cancelled, now)?;

            match self
                .store
                .conditional_write(strategy_id, record.version, &next)
                .await
            {
                Ok(version) => {
                    tracing::info!(
                        target: AUDIT_TARGET,
                        action = "cancel",
                        %strategy_id,
                        from = %record.status,
                        version,
                        reason,
                        "Strategy cancelled"
                    );
                    return Ok(true);
                }
                Err(DbError::VersionConflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(OrchestratorError::ConflictRetriesExhausted {
            strategy_id,
            attempts: self.config.max_conflict_retries + 1,
        })
    }

    /// Starts a fresh lifecycle for a terminal strategy and returns the new id.
    ///
    /// The original record is left untouched; the new one carries its lineage. With
    /// `regenerate` the seed is bumped and the next definition gets a new version.
    pub async fn requeue(
        &self,
        strategy_id: StrategyId,
        reason: &str,
        requested_by: &str,
        regenerate: bool,
    ) -> Result<StrategyId, OrchestratorError> {
        let parent = self.store.read(strategy_id).await?;
        if !parent.is_terminal() {
            return Err(OrchestratorError::NotTerminal {
                strategy_id,
                status: parent.status,
            });
        }

        let now = Utc::now();
        let (root_id, generation, definition_version) = match &parent.lineage {
            Some(lineage) => (
                lineage.root_id,
                lineage.generation + 1,
                lineage.definition_version,
            ),
            None => (parent.strategy_id, 1, 1),
        };

        let mut request = parent.request.clone();
        let definition_version = if regenerate {
            request.seed = request.seed.wrapping_add(1);
            definition_version + 1
        } else {
            definition_version
        };

        let mut child = StrategyRecord::new(request, now);
        child.lineage = Some(Lineage {
            parent_id: parent.strategy_id,
            root_id,
            generation,
            definition_version,
            reason: reason.to_string(),
            requested_by: requested_by.to_string(),
            requeued_at: now,
        });
        let child = self.store.create(&child).await?;

        tracing::info!(
            target: AUDIT_TARGET,
            action = "requeue",
            parent_id = %parent.strategy_id,
            strategy_id = %child.strategy_id,
            parent_status = %parent.status,
            generation,
            regenerate,
            requested_by,
            reason,
            "Strategy requeued"
        );
        Ok(child.strategy_id)
    }

    /// Hides a terminal strategy from default listings. Returns `false` if it was already archived.
    pub async fn archive(&self, strategy_id: StrategyId) -> Result<bool, OrchestratorError> {
        for _ in 0..=self.config.max_conflict_retries {
            let record = self.store.read(strategy_id).await?;
            if !record.is_terminal() {
                return Err(OrchestratorError::NotTerminal {
                    strategy_id,
                    status: record.status,
                });
            }
            if record.archived {
                return Ok(false);
            }

            let mut next = record.clone();
            next.archived = true;
            next.updated_at = Utc::now();
            match self
                .store
                .conditional_write(strategy_id, record.version, &next)
                .await
            {
                Ok(_) => {
                    tracing::info!(target: AUDIT_TARGET, action = "archive", %strategy_id, status = %record.status, "Strategy archived");
                    return Ok(true);
                }
                Err(DbError::VersionConflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(OrchestratorError::ConflictRetriesExhausted {
            strategy_id,
            attempts: self.config.max_conflict_retries + 1,
        })
    }

    /// Reads live performance of a deployed strategy and appends it to the store.
    pub async fn collect_performance(
        &self,
        strategy_id: StrategyId,
    ) -> Result<PerformanceSnapshot, OrchestratorError> {
        let record = self.store.read(strategy_id).await?;
        if record.status != StrategyStatus::Deployed {
            return Err(OrchestratorError::NotDeployed {
                strategy_id,
                status: record.status,
            });
        }
        let deployment = match record.completed_result(Stage::Deployment) {
            Some(StageResult::Deployment(result)) => result.deployment.clone(),
            _ => return Err(OrchestratorError::MissingDeployment(strategy_id)),
        };

        let snapshot = self
            .adapters
            .performance()
            .snapshot(strategy_id, &deployment)
            .await
            .map_err(OrchestratorError::Performance)?;
        self.store.record_performance(&snapshot).await?;

        tracing::debug!(%strategy_id, pnl = %snapshot.pnl, drawdown = %snapshot.drawdown, "Performance recorded");
        Ok(snapshot)
    }
}
