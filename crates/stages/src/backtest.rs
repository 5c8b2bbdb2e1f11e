use crate::adapter::{StageAdapter, StageContext, StageOutput};
use crate::error::{CollaboratorError, StageError};
use async_trait::async_trait;
use configuration::BacktestSettings;
use core_types::{BacktestResult, Stage, StageResult, StrategyDefinition};
use std::sync::Arc;

/// Evaluates a strategy definition against historical data.
#[async_trait]
pub trait BacktestEngine: Send + Sync {
    async fn backtest(
        &self,
        definition: &StrategyDefinition,
        settings: &BacktestSettings,
        idempotency_key: &str,
    ) -> Result<BacktestResult, CollaboratorError>;
}

/// Runs the backtest synchronously; gating on the metrics is the orchestrator's job.
pub struct BacktestAdapter {
    engine: Arc<dyn BacktestEngine>,
    settings: BacktestSettings,
}

impl BacktestAdapter {
    pub fn new(engine: Arc<dyn BacktestEngine>, settings: BacktestSettings) -> Self {
        Self { engine, settings }
    }
}

#[async_trait]
impl StageAdapter for BacktestAdapter {
    fn stage(&self) -> Stage {
        Stage::Backtest
    }

    async fn run(&self, context: &StageContext) -> Result<StageOutput, StageError> {
        let definition = context.definition()?;
        let key = context.idempotency_key();
        tracing::debug!(
            strategy_id = %context.strategy_id,
            attempt = context.attempt,
            lookback_days = self.settings.lookback_days,
            "Running backtest"
        );

        let result = self.engine.backtest(definition, &self.settings, &key).await?;
        let result = StageResult::Backtest(result);
        result.validate()?;
        Ok(StageOutput::Complete(result))
    }
}
