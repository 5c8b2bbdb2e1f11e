//! Deterministic paper collaborators.
//!
//! Every output is drawn from a ChaCha stream seeded by the strategy's seed, so a
//! strategy produces the same hypothesis, metrics and model on every run. Job handles
//! carry their seed, which keeps the engines stateless across process restarts.

use crate::deployment::{DeploymentStatus, DeploymentTarget, LiveMetrics};
use crate::error::{CollaboratorError, CollaboratorErrorKind};
use crate::hypothesis::{GeneratedHypothesis, HypothesisGenerator};
use crate::training::{TrainingEngine, TrainingStatus};
use crate::backtest::BacktestEngine;
use async_trait::async_trait;
use chrono::Utc;
use configuration::{BacktestSettings, CapitalLimits, TrainingSettings};
use core_types::{
    ArtifactRef, BacktestMetrics, BacktestResult, GenerationRequest, JobHandle,
    StrategyDefinition, TrainingMetrics, TrainingResult,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::HashMap;
use tokio::sync::Mutex;

const STRATEGY_FAMILIES: [&str; 3] = ["momentum", "mean_reversion", "breakout"];

// Separate streams per collaborator so backtest and training draws are independent.
const BACKTEST_STREAM: u64 = 0x6261_636b;
const TRAINING_STREAM: u64 = 0x7472_6169;
const LIVE_STREAM: u64 = 0x6c69_7665;

fn to_decimal(value: f64, dp: u32) -> Decimal {
    Decimal::try_from(value).unwrap_or_default().round_dp(dp)
}

fn rng_for(seed: u64, stream: u64) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(stream);
    rng
}

/// FNV-1a, for turning idempotency keys into stable handle suffixes.
fn key_hash(key: &str) -> u64 {
    key.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

fn invalid(message: impl Into<String>) -> CollaboratorError {
    CollaboratorError::new(CollaboratorErrorKind::Invalid, message)
}

/// Parses `{prefix}-{seed:x}-{extra}-{hash:x}` handles.
fn parse_handle(handle: &JobHandle, prefix: &str) -> Result<(u64, u64), CollaboratorError> {
    let rest = handle
        .0
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('-'))
        .ok_or_else(|| invalid(format!("unknown job handle '{handle}'")))?;
    let mut parts = rest.split('-');
    let seed = parts
        .next()
        .and_then(|s| u64::from_str_radix(s, 16).ok())
        .ok_or_else(|| invalid(format!("malformed job handle '{handle}'")))?;
    let extra = parts
        .next()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| invalid(format!("malformed job handle '{handle}'")))?;
    Ok((seed, extra))
}

#[derive(Debug, Default)]
pub struct SimulatedHypothesisGenerator;

#[async_trait]
impl HypothesisGenerator for SimulatedHypothesisGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
        seed: u64,
    ) -> Result<GeneratedHypothesis, CollaboratorError> {
        if request.universe.is_empty() {
            return Err(invalid("generation request has an empty universe"));
        }
        if request.risk.max_leverage <= Decimal::ZERO {
            return Err(invalid("max_leverage must be positive"));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let family = STRATEGY_FAMILIES[rng.gen_range(0..STRATEGY_FAMILIES.len())];
        let lookback: u32 = rng.gen_range(10..=120);
        let entry_z = to_decimal(rng.gen_range(0.5..2.5), 2);
        let exit_z = to_decimal(rng.gen_range(0.0..0.5), 2);
        let leverage = to_decimal(rng.gen_range(1.0..3.0), 1).min(request.risk.max_leverage);

        Ok(GeneratedHypothesis {
            payload: json!({
                "family": family,
                "universe": request.universe,
                "lookback": lookback,
                "entry_z": entry_z,
                "exit_z": exit_z,
                "leverage": leverage,
                "max_position_pct": request.risk.max_position_pct,
            }),
            rationale: Some(format!(
                "{family} across {} symbols with a {lookback}-bar lookback",
                request.universe.len()
            )),
        })
    }
}

#[derive(Debug, Default)]
pub struct SimulatedBacktestEngine;

#[async_trait]
impl BacktestEngine for SimulatedBacktestEngine {
    async fn backtest(
        &self,
        definition: &StrategyDefinition,
        settings: &BacktestSettings,
        idempotency_key: &str,
    ) -> Result<BacktestResult, CollaboratorError> {
        if settings.lookback_days == 0 {
            return Err(invalid("backtest window is empty"));
        }
        let mut rng = rng_for(definition.seed, BACKTEST_STREAM);
        let gross_return: f64 = rng.gen_range(-0.2..0.6);
        let trades: u32 = rng.gen_range(20..400) * settings.lookback_days / 365 + 1;
        let commission = settings.commission_pct * Decimal::from(trades);

        Ok(BacktestResult {
            metrics: BacktestMetrics {
                total_return: to_decimal(gross_return, 4) - commission.round_dp(4),
                sharpe: to_decimal(rng.gen_range(-0.5..2.5), 4),
                max_drawdown: to_decimal(rng.gen_range(0.02..0.35), 4),
                trades,
            },
            report: ArtifactRef(format!("sim://backtests/{:016x}.json", key_hash(idempotency_key))),
        })
    }
}

/// A trainer whose jobs report `Running` for a fixed number of polls.
#[derive(Debug)]
pub struct SimulatedTrainingEngine {
    polls_to_complete: u32,
    polls: Mutex<HashMap<JobHandle, u32>>,
}

impl SimulatedTrainingEngine {
    const PREFIX: &'static str = "sim-train";

    pub fn new(polls_to_complete: u32) -> Self {
        Self {
            polls_to_complete,
            polls: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for SimulatedTrainingEngine {
    fn default() -> Self {
        Self::new(1)
    }
}

#[async_trait]
impl TrainingEngine for SimulatedTrainingEngine {
    async fn submit(
        &self,
        definition: &StrategyDefinition,
        settings: &TrainingSettings,
        idempotency_key: &str,
    ) -> Result<JobHandle, CollaboratorError> {
        if settings.timesteps == 0 {
            return Err(invalid("training needs a positive timestep budget"));
        }
        Ok(JobHandle(format!(
            "{}-{:016x}-{}-{:016x}",
            Self::PREFIX,
            definition.seed,
            settings.timesteps,
            key_hash(idempotency_key)
        )))
    }

    async fn status(&self, handle: &JobHandle) -> Result<TrainingStatus, CollaboratorError> {
        let (seed, timesteps) = parse_handle(handle, Self::PREFIX)?;

        // The counter stays at the threshold once reached, so a repeated poll of a
        // finished job keeps reporting it finished.
        let mut polls = self.polls.lock().await;
        let seen = polls.entry(handle.clone()).or_insert(0);
        if *seen < self.polls_to_complete {
            *seen += 1;
            return Ok(TrainingStatus::Running);
        }

        let mut rng = rng_for(seed, TRAINING_STREAM);
        Ok(TrainingStatus::Completed(TrainingResult {
            metrics: TrainingMetrics {
                eval_reward: to_decimal(rng.gen_range(0.0..1.5), 4),
                timesteps,
            },
            model: ArtifactRef(format!("sim://models/{}.zip", handle)),
        }))
    }
}

/// A paper venue. Deployments go live immediately.
#[derive(Debug)]
pub struct SimulatedDeploymentTarget {
    venue: String,
}

impl SimulatedDeploymentTarget {
    const PREFIX: &'static str = "sim-deploy";

    pub fn new(venue: impl Into<String>) -> Self {
        Self {
            venue: venue.into(),
        }
    }
}

#[async_trait]
impl DeploymentTarget for SimulatedDeploymentTarget {
    async fn deploy(
        &self,
        definition: &StrategyDefinition,
        model: &ArtifactRef,
        limits: &CapitalLimits,
        idempotency_key: &str,
    ) -> Result<JobHandle, CollaboratorError> {
        if limits.venue != self.venue {
            return Err(CollaboratorError::new(
                CollaboratorErrorKind::Rejected,
                format!("venue '{}' is not served by this target ({})", limits.venue, self.venue),
            ));
        }
        tracing::debug!(model = %model, venue = %self.venue, "Paper deployment");
        Ok(JobHandle(format!(
            "{}-{:016x}-{}-{:016x}",
            Self::PREFIX,
            definition.seed,
            u64::try_from(limits.max_capital_per_strategy.trunc()).unwrap_or(0),
            key_hash(idempotency_key)
        )))
    }

    async fn status(&self, deployment: &JobHandle) -> Result<DeploymentStatus, CollaboratorError> {
        parse_handle(deployment, Self::PREFIX)?;
        Ok(DeploymentStatus::Live {
            venue: self.venue.clone(),
        })
    }

    async fn performance(&self, deployment: &JobHandle) -> Result<LiveMetrics, CollaboratorError> {
        let (seed, capital) = parse_handle(deployment, Self::PREFIX)?;
        // One reading per minute bucket; repeated reads within a minute agree.
        let minute = Utc::now().timestamp() / 60;
        let mut rng = rng_for(seed ^ minute as u64, LIVE_STREAM);
        let pnl_pct: f64 = rng.gen_range(-0.05..0.10);

        Ok(LiveMetrics {
            pnl: to_decimal(pnl_pct * capital as f64, 2),
            sharpe: Some(to_decimal(rng.gen_range(-1.0..3.0), 4)),
            drawdown: to_decimal(rng.gen_range(0.0..0.15), 4),
            open_positions: rng.gen_range(0..5),
        })
    }
}
