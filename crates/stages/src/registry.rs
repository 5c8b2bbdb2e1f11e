use crate::adapter::StageAdapter;
use crate::backtest::BacktestAdapter;
use crate::deployment::{DeploymentAdapter, PerformanceFeed};
use crate::hypothesis::HypothesisAdapter;
use crate::simulated::{
    SimulatedBacktestEngine, SimulatedDeploymentTarget, SimulatedHypothesisGenerator,
    SimulatedTrainingEngine,
};
use crate::training::TrainingAdapter;
use configuration::Config;
use core_types::Stage;
use std::sync::Arc;

/// One adapter per stage, plus the feed used to monitor deployed strategies.
#[derive(Clone)]
pub struct StageAdapters {
    hypothesis: Arc<dyn StageAdapter>,
    backtest: Arc<dyn StageAdapter>,
    training: Arc<dyn StageAdapter>,
    deployment: Arc<dyn StageAdapter>,
    performance: Arc<dyn PerformanceFeed>,
}

impl StageAdapters {
    pub fn new(
        hypothesis: Arc<dyn StageAdapter>,
        backtest: Arc<dyn StageAdapter>,
        training: Arc<dyn StageAdapter>,
        deployment: Arc<dyn StageAdapter>,
        performance: Arc<dyn PerformanceFeed>,
    ) -> Self {
        Self {
            hypothesis,
            backtest,
            training,
            deployment,
            performance,
        }
    }

    /// Wires every stage to the deterministic paper collaborators.
    pub fn simulated(config: &Config) -> Self {
        let deployment = Arc::new(DeploymentAdapter::new(
            Arc::new(SimulatedDeploymentTarget::new(config.capital.venue.clone())),
            config.capital.clone(),
        ));
        Self::new(
            Arc::new(HypothesisAdapter::new(Arc::new(SimulatedHypothesisGenerator))),
            Arc::new(BacktestAdapter::new(
                Arc::new(SimulatedBacktestEngine),
                config.backtest.clone(),
            )),
            Arc::new(TrainingAdapter::new(
                Arc::new(SimulatedTrainingEngine::default()),
                config.training.clone(),
            )),
            deployment.clone(),
            deployment,
        )
    }

    pub fn get(&self, stage: Stage) -> &Arc<dyn StageAdapter> {
        match stage {
            Stage::Hypothesis => &self.hypothesis,
            Stage::Backtest => &self.backtest,
            Stage::Training => &self.training,
            Stage::Deployment => &self.deployment,
        }
    }

    pub fn performance(&self) -> &Arc<dyn PerformanceFeed> {
        &self.performance
    }
}
