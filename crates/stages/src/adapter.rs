use crate::error::StageError;
use async_trait::async_trait;
use core_types::{
    ArtifactRef, GenerationRequest, JobHandle, Stage, StageResult, StrategyDefinition, StrategyId,
    StrategyRecord,
};
use std::collections::BTreeMap;

/// What a stage adapter hands back to the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput {
    /// The stage finished and produced its result.
    Complete(StageResult),
    /// The stage is a long-running external job; poll this handle on a later pass.
    Pending(JobHandle),
}

/// The read-only input a stage adapter receives.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub strategy_id: StrategyId,
    pub stage: Stage,
    pub request: GenerationRequest,
    pub definition: Option<StrategyDefinition>,
    /// Completed results of the stages before this one.
    pub prior_results: BTreeMap<Stage, StageResult>,
    /// 1 on the first try, incremented after each transient failure.
    pub attempt: u32,
    /// Version the hypothesis stage stamps on a freshly generated definition.
    pub definition_version: u32,
}

impl StageContext {
    pub fn from_record(record: &StrategyRecord, stage: Stage) -> Self {
        let prior_results = record
            .stage_results
            .iter()
            .filter(|(earlier, _)| **earlier < stage)
            .filter_map(|(earlier, entry)| entry.completed_result().map(|r| (*earlier, r.clone())))
            .collect();

        Self {
            strategy_id: record.strategy_id,
            stage,
            request: record.request.clone(),
            definition: record.definition.clone(),
            prior_results,
            attempt: record.attempts_for(stage) + 1,
            definition_version: record
                .lineage
                .as_ref()
                .map_or(1, |lineage| lineage.definition_version),
        }
    }

    /// A key external collaborators deduplicate re-invocations on.
    ///
    /// Stable across attempts: a retry after a lost response (a timed-out submit, a
    /// crash before the write) must land on the job the collaborator already accepted.
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.strategy_id, self.stage)
    }

    pub fn definition(&self) -> Result<&StrategyDefinition, StageError> {
        self.definition.as_ref().ok_or_else(|| {
            StageError::permanent(format!("{} stage requires a strategy definition", self.stage))
        })
    }

    /// The trained model the deployment stage ships.
    pub fn model_artifact(&self) -> Result<&ArtifactRef, StageError> {
        match self.prior_results.get(&Stage::Training) {
            Some(StageResult::Training(training)) => Ok(&training.model),
            _ => Err(StageError::permanent(
                "no completed training result to take a model from",
            )),
        }
    }
}

/// The uniform contract every lifecycle stage is driven through.
#[async_trait]
pub trait StageAdapter: Send + Sync {
    fn stage(&self) -> Stage;

    /// Starts (and for short stages, finishes) the stage.
    async fn run(&self, context: &StageContext) -> Result<StageOutput, StageError>;

    /// Checks on a job previously returned as `StageOutput::Pending`.
    async fn poll(
        &self,
        _context: &StageContext,
        handle: &JobHandle,
    ) -> Result<StageOutput, StageError> {
        Err(StageError::permanent(format!(
            "{} stage does not support polling (handle {handle})",
            self.stage()
        )))
    }
}
