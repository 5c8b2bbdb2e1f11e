use crate::adapter::{StageAdapter, StageContext, StageOutput};
use crate::error::{CollaboratorError, StageError};
use async_trait::async_trait;
use chrono::Utc;
use core_types::{
    GenerationRequest, HypothesisResult, Stage, StageResult, StrategyDefinition,
};
use std::sync::Arc;

/// What a generator returns: the opaque definition body and an optional rationale.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedHypothesis {
    pub payload: serde_json::Value,
    pub rationale: Option<String>,
}

/// The interface to whatever proposes new strategies.
///
/// Must be a pure function of `(request, seed)` so a hypothesis can be reproduced.
#[async_trait]
pub trait HypothesisGenerator: Send + Sync {
    async fn generate(
        &self,
        request: &GenerationRequest,
        seed: u64,
    ) -> Result<GeneratedHypothesis, CollaboratorError>;
}

pub struct HypothesisAdapter {
    generator: Arc<dyn HypothesisGenerator>,
}

impl HypothesisAdapter {
    pub fn new(generator: Arc<dyn HypothesisGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl StageAdapter for HypothesisAdapter {
    fn stage(&self) -> Stage {
        Stage::Hypothesis
    }

    async fn run(&self, context: &StageContext) -> Result<StageOutput, StageError> {
        let seed = context.request.seed;
        tracing::debug!(strategy_id = %context.strategy_id, seed, "Generating hypothesis");

        // Generation is pure in (request, seed), so every failure is permanent.
        let generated = self
            .generator
            .generate(&context.request, seed)
            .await
            .map_err(|e| StageError::permanent(format!("hypothesis generation failed: {e}")))?;

        let result = StageResult::Hypothesis(HypothesisResult {
            definition: StrategyDefinition {
                version: context.definition_version,
                seed,
                payload: generated.payload,
                generated_at: Utc::now(),
            },
            rationale: generated.rationale,
        });
        result.validate()?;
        Ok(StageOutput::Complete(result))
    }
}
