use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One phase of a strategy's lifecycle.
///
/// The derived ordering is the lifecycle order, which is also the order in which
/// `stage_results` are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Hypothesis,
    Backtest,
    Training,
    Deployment,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Hypothesis,
        Stage::Backtest,
        Stage::Training,
        Stage::Deployment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Hypothesis => "hypothesis",
            Stage::Backtest => "backtest",
            Stage::Training => "training",
            Stage::Deployment => "deployment",
        }
    }

    /// The status a strategy holds while this stage's adapter is being driven.
    pub fn running_status(&self) -> StrategyStatus {
        match self {
            Stage::Hypothesis => StrategyStatus::PendingHypothesis,
            Stage::Backtest => StrategyStatus::Backtesting,
            Stage::Training => StrategyStatus::Training,
            Stage::Deployment => StrategyStatus::Deploying,
        }
    }

    /// The status a strategy moves to once this stage completes and clears its gate.
    pub fn completed_status(&self) -> StrategyStatus {
        match self {
            Stage::Hypothesis => StrategyStatus::Hypothesized,
            Stage::Backtest => StrategyStatus::Backtested,
            Stage::Training => StrategyStatus::Trained,
            Stage::Deployment => StrategyStatus::Deployed,
        }
    }

    /// Whether a completed result for this stage is checked against a gate.
    pub fn is_gated(&self) -> bool {
        matches!(self, Stage::Backtest | Stage::Training)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CoreError::InvalidInput("stage".to_string(), s.to_string()))
    }
}

/// The lifecycle state of a strategy.
///
/// ```plain
/// PENDING_HYPOTHESIS -> HYPOTHESIZED -> BACKTESTING -> BACKTESTED
///     -> TRAINING -> TRAINED -> DEPLOYING -> DEPLOYED
///
/// BACKTESTING | TRAINING      -> REJECTED   (gate failed)
/// any non-terminal state      -> FAILED     (permanent error / retries exhausted)
/// any non-terminal state      -> CANCELLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyStatus {
    PendingHypothesis,
    Hypothesized,
    Backtesting,
    Backtested,
    Training,
    Trained,
    Deploying,
    Deployed,
    Rejected,
    Failed,
    Cancelled,
}

/// What `advance` does for a strategy in a given non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleStep {
    /// Durably mark the stage as begun. No adapter is invoked.
    Start(Stage),
    /// Invoke (or poll) the stage's adapter.
    Run(Stage),
}

impl LifecycleStep {
    pub fn stage(&self) -> Stage {
        match self {
            LifecycleStep::Start(stage) | LifecycleStep::Run(stage) => *stage,
        }
    }
}

impl StrategyStatus {
    pub const ALL: [StrategyStatus; 11] = [
        StrategyStatus::PendingHypothesis,
        StrategyStatus::Hypothesized,
        StrategyStatus::Backtesting,
        StrategyStatus::Backtested,
        StrategyStatus::Training,
        StrategyStatus::Trained,
        StrategyStatus::Deploying,
        StrategyStatus::Deployed,
        StrategyStatus::Rejected,
        StrategyStatus::Failed,
        StrategyStatus::Cancelled,
    ];

    /// Every status the scheduler still has work to do for.
    pub const ACTIVE: [StrategyStatus; 7] = [
        StrategyStatus::PendingHypothesis,
        StrategyStatus::Hypothesized,
        StrategyStatus::Backtesting,
        StrategyStatus::Backtested,
        StrategyStatus::Training,
        StrategyStatus::Trained,
        StrategyStatus::Deploying,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyStatus::PendingHypothesis => "PENDING_HYPOTHESIS",
            StrategyStatus::Hypothesized => "HYPOTHESIZED",
            StrategyStatus::Backtesting => "BACKTESTING",
            StrategyStatus::Backtested => "BACKTESTED",
            StrategyStatus::Training => "TRAINING",
            StrategyStatus::Trained => "TRAINED",
            StrategyStatus::Deploying => "DEPLOYING",
            StrategyStatus::Deployed => "DEPLOYED",
            StrategyStatus::Rejected => "REJECTED",
            StrategyStatus::Failed => "FAILED",
            StrategyStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StrategyStatus::Deployed
                | StrategyStatus::Rejected
                | StrategyStatus::Failed
                | StrategyStatus::Cancelled
        )
    }

    /// The work `advance` performs from this status, `None` for terminal states.
    pub fn step(&self) -> Option<LifecycleStep> {
        match self {
            StrategyStatus::PendingHypothesis => Some(LifecycleStep::Run(Stage::Hypothesis)),
            StrategyStatus::Hypothesized => Some(LifecycleStep::Start(Stage::Backtest)),
            StrategyStatus::Backtesting => Some(LifecycleStep::Run(Stage::Backtest)),
            StrategyStatus::Backtested => Some(LifecycleStep::Start(Stage::Training)),
            StrategyStatus::Training => Some(LifecycleStep::Run(Stage::Training)),
            StrategyStatus::Trained => Some(LifecycleStep::Start(Stage::Deployment)),
            StrategyStatus::Deploying => Some(LifecycleStep::Run(Stage::Deployment)),
            _ => None,
        }
    }

    /// The next status along the happy path.
    pub fn success_target(&self) -> Option<StrategyStatus> {
        match self.step()? {
            LifecycleStep::Start(stage) => Some(stage.running_status()),
            LifecycleStep::Run(stage) => Some(stage.completed_status()),
        }
    }

    /// The single source of truth for legal lifecycle edges.
    pub fn can_transition_to(&self, next: StrategyStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            StrategyStatus::Failed | StrategyStatus::Cancelled => true,
            StrategyStatus::Rejected => {
                matches!(self, StrategyStatus::Backtesting | StrategyStatus::Training)
            }
            other => self.success_target() == Some(other),
        }
    }
}

impl fmt::Display for StrategyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace('-', "_");
        StrategyStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(&normalized))
            .ok_or_else(|| CoreError::InvalidInput("status".to_string(), s.to_string()))
    }
}

/// How a stage failure must be treated by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// Timeouts, rate limits, venue connectivity, transient I/O. Retried up to a ceiling.
    Transient,
    /// Invalid input, validation or compliance rejection. Never retried.
    Permanent,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Transient => f.write_str("TRANSIENT"),
            FailureKind::Permanent => f.write_str("PERMANENT"),
        }
    }
}
