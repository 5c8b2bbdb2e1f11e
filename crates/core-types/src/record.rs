use crate::enums::{Stage, StrategyStatus};
use crate::error::CoreError;
use crate::results::{JobHandle, StageEntry, StageFailure, StageResult};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The globally unique, immutable identifier of a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrategyId(pub Uuid);

impl StrategyId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StrategyId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for StrategyId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(StrategyId)
            .map_err(|e| CoreError::InvalidInput("strategy_id".to_string(), e.to_string()))
    }
}

/// Risk limits the hypothesis generator must respect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskConstraints {
    pub max_leverage: Decimal,
    /// Maximum fraction of capital in a single position.
    pub max_position_pct: Decimal,
    /// Maximum tolerated drawdown as a fraction of equity.
    pub max_drawdown: Decimal,
}

/// What a new hypothesis is requested for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub universe: Vec<String>,
    pub risk: RiskConstraints,
    /// Seed handed to the generator so a hypothesis can be reproduced.
    pub seed: u64,
}

/// The opaque, versioned strategy payload produced by the hypothesis stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyDefinition {
    pub version: u32,
    pub seed: u64,
    pub payload: serde_json::Value,
    pub generated_at: DateTime<Utc>,
}

/// An in-flight long-running stage job, polled on later passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingJob {
    pub stage: Stage,
    pub handle: JobHandle,
    pub submitted_at: DateTime<Utc>,
    pub polls: u32,
}

/// Why a strategy reached a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalReason {
    pub code: String,
    pub detail: String,
}

impl TerminalReason {
    pub fn new(code: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            detail: detail.into(),
        }
    }
}

/// A time-bounded claim on a strategy held by one scheduler worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub owner: String,
    pub token: Uuid,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(owner: impl Into<String>, now: DateTime<Utc>, ttl: chrono::Duration) -> Self {
        Self {
            owner: owner.into(),
            token: Uuid::new_v4(),
            acquired_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Ancestry of a requeued strategy. The parent record itself is never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lineage {
    pub parent_id: StrategyId,
    pub root_id: StrategyId,
    pub generation: u32,
    /// Version the next generated definition carries; bumped on regeneration.
    pub definition_version: u32,
    pub reason: String,
    pub requested_by: String,
    pub requeued_at: DateTime<Utc>,
}

/// One candidate trading strategy and everything recorded about its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRecord {
    pub strategy_id: StrategyId,
    pub request: GenerationRequest,
    pub definition: Option<StrategyDefinition>,
    pub status: StrategyStatus,
    pub stage_results: BTreeMap<Stage, StageEntry>,
    /// Transient failures per stage.
    #[serde(default)]
    pub attempts: BTreeMap<Stage, u32>,
    #[serde(default)]
    pub pending: Option<PendingJob>,
    #[serde(default)]
    pub last_error: Option<StageFailure>,
    #[serde(default)]
    pub next_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub terminal_reason: Option<TerminalReason>,
    #[serde(default)]
    pub lease: Option<Lease>,
    #[serde(default)]
    pub lineage: Option<Lineage>,
    #[serde(default)]
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Owned by the store: set from the stored row on read, bumped on every write.
    pub version: u64,
}

impl StrategyRecord {
    /// A fresh record waiting for its hypothesis.
    pub fn new(request: GenerationRequest, now: DateTime<Utc>) -> Self {
        Self {
            strategy_id: StrategyId::new(),
            request,
            definition: None,
            status: StrategyStatus::PendingHypothesis,
            stage_results: BTreeMap::new(),
            attempts: BTreeMap::new(),
            pending: None,
            last_error: None,
            next_attempt_at: None,
            terminal_reason: None,
            lease: None,
            lineage: None,
            archived: false,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Moves to `next`, refusing any edge the state machine does not define.
    pub fn transition(&mut self, next: StrategyStatus, now: DateTime<Utc>) -> Result<(), CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Appends the one entry a stage is allowed to write.
    pub fn append_result(&mut self, entry: StageEntry) -> Result<(), CoreError> {
        if self.stage_results.contains_key(&entry.stage) {
            return Err(CoreError::ResultAlreadyRecorded(entry.stage));
        }
        self.stage_results.insert(entry.stage, entry);
        Ok(())
    }

    pub fn set_definition(&mut self, definition: StrategyDefinition) -> Result<(), CoreError> {
        if self.definition.is_some() {
            return Err(CoreError::DefinitionAlreadySet);
        }
        self.definition = Some(definition);
        Ok(())
    }

    pub fn attempts_for(&self, stage: Stage) -> u32 {
        self.attempts.get(&stage).copied().unwrap_or(0)
    }

    /// Increments and returns the transient-failure count for `stage`.
    pub fn bump_attempts(&mut self, stage: Stage) -> u32 {
        let count = self.attempts.entry(stage).or_insert(0);
        *count += 1;
        *count
    }

    /// The successful result a stage recorded, if any.
    pub fn completed_result(&self, stage: Stage) -> Option<&StageResult> {
        self.stage_results.get(&stage).and_then(StageEntry::completed_result)
    }

    /// The lease still in force at `now`, if any.
    pub fn active_lease(&self, now: DateTime<Utc>) -> Option<&Lease> {
        self.lease.as_ref().filter(|lease| !lease.is_expired(now))
    }

    /// Whether retry backoff or the polling interval allows acting on the record.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at.map_or(true, |at| at <= now)
    }

    /// The pending handle belonging to `stage`, ignoring handles of other stages.
    pub fn pending_for(&self, stage: Stage) -> Option<&PendingJob> {
        self.pending.as_ref().filter(|job| job.stage == stage)
    }
}

/// A point-in-time reading of a deployed strategy's live performance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub strategy_id: StrategyId,
    pub observed_at: DateTime<Utc>,
    pub pnl: Decimal,
    pub sharpe: Option<Decimal>,
    pub drawdown: Decimal,
    pub open_positions: u32,
}
