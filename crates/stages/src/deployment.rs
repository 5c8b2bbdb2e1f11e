use crate::adapter::{StageAdapter, StageContext, StageOutput};
use crate::error::{CollaboratorError, StageError};
use async_trait::async_trait;
use chrono::Utc;
use configuration::CapitalLimits;
use core_types::{
    ArtifactRef, DeploymentResult, JobHandle, PerformanceSnapshot, Stage, StageResult,
    StrategyDefinition, StrategyId,
};
use rust_decimal::Decimal;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum DeploymentStatus {
    RollingOut,
    Live { venue: String },
    Failed(CollaboratorError),
}

/// Live performance as reported by the venue.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveMetrics {
    pub pnl: Decimal,
    pub sharpe: Option<Decimal>,
    pub drawdown: Decimal,
    pub open_positions: u32,
}

/// The paper or live venue a trained strategy is shipped to.
#[async_trait]
pub trait DeploymentTarget: Send + Sync {
    /// Requests a deployment. Repeating the key returns the existing deployment's handle.
    async fn deploy(
        &self,
        definition: &StrategyDefinition,
        model: &ArtifactRef,
        limits: &CapitalLimits,
        idempotency_key: &str,
    ) -> Result<JobHandle, CollaboratorError>;

    async fn status(&self, deployment: &JobHandle) -> Result<DeploymentStatus, CollaboratorError>;

    async fn performance(&self, deployment: &JobHandle) -> Result<LiveMetrics, CollaboratorError>;
}

/// Reads live performance of an already deployed strategy.
#[async_trait]
pub trait PerformanceFeed: Send + Sync {
    async fn snapshot(
        &self,
        strategy_id: StrategyId,
        deployment: &JobHandle,
    ) -> Result<PerformanceSnapshot, StageError>;
}

pub struct DeploymentAdapter {
    target: Arc<dyn DeploymentTarget>,
    limits: CapitalLimits,
}

impl DeploymentAdapter {
    pub fn new(target: Arc<dyn DeploymentTarget>, limits: CapitalLimits) -> Self {
        Self { target, limits }
    }

    async fn check(&self, handle: &JobHandle) -> Result<StageOutput, StageError> {
        match self.target.status(handle).await? {
            DeploymentStatus::RollingOut => Ok(StageOutput::Pending(handle.clone())),
            DeploymentStatus::Live { venue } => {
                let result = StageResult::Deployment(DeploymentResult {
                    deployment: handle.clone(),
                    venue,
                    deployed_at: Utc::now(),
                });
                result.validate()?;
                Ok(StageOutput::Complete(result))
            }
            DeploymentStatus::Failed(error) => Err(error.into()),
        }
    }
}

#[async_trait]
impl StageAdapter for DeploymentAdapter {
    fn stage(&self) -> Stage {
        Stage::Deployment
    }

    async fn run(&self, context: &StageContext) -> Result<StageOutput, StageError> {
        let definition = context.definition()?;
        let model = context.model_artifact()?;

        if self.limits.max_capital_per_strategy <= Decimal::ZERO {
            return Err(StageError::permanent("capital limit leaves nothing to deploy"));
        }

        let handle = self
            .target
            .deploy(definition, model, &self.limits, &context.idempotency_key())
            .await?;
        tracing::info!(
            strategy_id = %context.strategy_id,
            handle = %handle,
            venue = %self.limits.venue,
            capital = %self.limits.max_capital_per_strategy,
            "Deployment requested"
        );

        // Persist the handle before asking for status, so a failed status check
        // resumes this deployment instead of requesting another one.
        Ok(StageOutput::Pending(handle))
    }

    async fn poll(
        &self,
        _context: &StageContext,
        handle: &JobHandle,
    ) -> Result<StageOutput, StageError> {
        self.check(handle).await
    }
}

#[async_trait]
impl PerformanceFeed for DeploymentAdapter {
    async fn snapshot(
        &self,
        strategy_id: StrategyId,
        deployment: &JobHandle,
    ) -> Result<PerformanceSnapshot, StageError> {
        let live = self.target.performance(deployment).await?;
        Ok(PerformanceSnapshot {
            strategy_id,
            observed_at: Utc::now(),
            pnl: live.pnl,
            sharpe: live.sharpe,
            drawdown: live.drawdown,
            open_positions: live.open_positions,
        })
    }
}
