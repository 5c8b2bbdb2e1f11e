use crate::adapter::{StageAdapter, StageContext, StageOutput};
use crate::error::{CollaboratorError, StageError};
use async_trait::async_trait;
use configuration::TrainingSettings;
use core_types::{JobHandle, Stage, StageResult, StrategyDefinition, TrainingResult};
use std::sync::Arc;

/// The state of a submitted training job as reported by the trainer.
#[derive(Debug, Clone, PartialEq)]
pub enum TrainingStatus {
    Running,
    Completed(TrainingResult),
    Failed(CollaboratorError),
}

/// A remote trainer. Jobs are long-running: submit once, then poll.
#[async_trait]
pub trait TrainingEngine: Send + Sync {
    /// Submits a job. Resubmitting with the same key returns the existing handle.
    async fn submit(
        &self,
        definition: &StrategyDefinition,
        settings: &TrainingSettings,
        idempotency_key: &str,
    ) -> Result<JobHandle, CollaboratorError>;

    async fn status(&self, handle: &JobHandle) -> Result<TrainingStatus, CollaboratorError>;
}

pub struct TrainingAdapter {
    engine: Arc<dyn TrainingEngine>,
    settings: TrainingSettings,
}

impl TrainingAdapter {
    pub fn new(engine: Arc<dyn TrainingEngine>, settings: TrainingSettings) -> Self {
        Self { engine, settings }
    }
}

#[async_trait]
impl StageAdapter for TrainingAdapter {
    fn stage(&self) -> Stage {
        Stage::Training
    }

    async fn run(&self, context: &StageContext) -> Result<StageOutput, StageError> {
        let definition = context.definition()?;
        let handle = self
            .engine
            .submit(definition, &self.settings, &context.idempotency_key())
            .await?;
        tracing::info!(
            strategy_id = %context.strategy_id,
            handle = %handle,
            timesteps = self.settings.timesteps,
            "Training job submitted"
        );
        Ok(StageOutput::Pending(handle))
    }

    async fn poll(
        &self,
        context: &StageContext,
        handle: &JobHandle,
    ) -> Result<StageOutput, StageError> {
        match self.engine.status(handle).await? {
            TrainingStatus::Running => {
                tracing::debug!(strategy_id = %context.strategy_id, handle = %handle, "Training still running");
                Ok(StageOutput::Pending(handle.clone()))
            }
            TrainingStatus::Completed(result) => {
                let result = StageResult::Training(result);
                result.validate()?;
                Ok(StageOutput::Complete(result))
            }
            TrainingStatus::Failed(error) => Err(error.into()),
        }
    }
}
