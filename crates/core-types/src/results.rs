use crate::enums::{FailureKind, Stage};
use crate::error::CoreError;
use crate::record::StrategyDefinition;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// An opaque reference to an artifact owned by an external collaborator
/// (a backtest report, a model checkpoint). Never dereferenced by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(pub String);

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A resumable handle to an in-progress external job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(pub String);

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypothesisResult {
    pub definition: StrategyDefinition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub total_return: Decimal,
    pub sharpe: Decimal,
    /// Peak-to-trough loss as a fraction of equity, `0.25` for 25%.
    pub max_drawdown: Decimal,
    pub trades: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub metrics: BacktestMetrics,
    pub report: ArtifactRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub eval_reward: Decimal,
    pub timesteps: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingResult {
    pub metrics: TrainingMetrics,
    pub model: ArtifactRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentResult {
    pub deployment: JobHandle,
    pub venue: String,
    pub deployed_at: DateTime<Utc>,
}

/// The structured result of a completed stage, tagged by stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageResult {
    Hypothesis(HypothesisResult),
    Backtest(BacktestResult),
    Training(TrainingResult),
    Deployment(DeploymentResult),
}

impl StageResult {
    pub fn stage(&self) -> Stage {
        match self {
            StageResult::Hypothesis(_) => Stage::Hypothesis,
            StageResult::Backtest(_) => Stage::Backtest,
            StageResult::Training(_) => Stage::Training,
            StageResult::Deployment(_) => Stage::Deployment,
        }
    }

    /// Schema check applied at the adapter boundary before anything is persisted.
    pub fn validate(&self) -> Result<(), CoreError> {
        let invalid = |reason: &str| CoreError::InvalidResult {
            stage: self.stage(),
            reason: reason.to_string(),
        };
        match self {
            StageResult::Hypothesis(h) => {
                if h.definition.payload.is_null() {
                    return Err(invalid("definition payload is empty"));
                }
                if h.definition.version == 0 {
                    return Err(invalid("definition version must start at 1"));
                }
            }
            StageResult::Backtest(b) => {
                if b.metrics.max_drawdown.is_sign_negative() {
                    return Err(invalid("max_drawdown must be non-negative"));
                }
                if b.report.0.is_empty() {
                    return Err(invalid("report reference is empty"));
                }
            }
            StageResult::Training(t) => {
                if t.metrics.timesteps == 0 {
                    return Err(invalid("timesteps must be positive"));
                }
                if t.model.0.is_empty() {
                    return Err(invalid("model reference is empty"));
                }
            }
            StageResult::Deployment(d) => {
                if d.deployment.0.is_empty() {
                    return Err(invalid("deployment handle is empty"));
                }
            }
        }
        Ok(())
    }

    /// A flat view of the numeric metrics, used for display and audit.
    pub fn metrics(&self) -> BTreeMap<&'static str, Decimal> {
        let mut metrics = BTreeMap::new();
        match self {
            StageResult::Backtest(b) => {
                metrics.insert("total_return", b.metrics.total_return);
                metrics.insert("sharpe", b.metrics.sharpe);
                metrics.insert("max_drawdown", b.metrics.max_drawdown);
                metrics.insert("trades", Decimal::from(b.metrics.trades));
            }
            StageResult::Training(t) => {
                metrics.insert("eval_reward", t.metrics.eval_reward);
                metrics.insert("timesteps", Decimal::from(t.metrics.timesteps));
            }
            StageResult::Hypothesis(_) | StageResult::Deployment(_) => {}
        }
        metrics
    }
}

/// The failing metric behind a `REJECTED` transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateFailure {
    /// Machine-readable reason, e.g. `sharpe_below_threshold`.
    pub code: String,
    pub metric: String,
    pub observed: Decimal,
    pub threshold: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    pub kind: FailureKind,
    pub detail: String,
    pub attempt: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EntryOutcome {
    Completed { result: StageResult },
    Rejected { result: StageResult, gate: GateFailure },
    Failed { failure: StageFailure },
}

/// The single, immutable `stage_results` entry a stage writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageEntry {
    pub stage: Stage,
    pub attempt: u32,
    pub recorded_at: DateTime<Utc>,
    pub outcome: EntryOutcome,
}

impl StageEntry {
    pub fn completed_result(&self) -> Option<&StageResult> {
        match &self.outcome {
            EntryOutcome::Completed { result } => Some(result),
            _ => None,
        }
    }
}
