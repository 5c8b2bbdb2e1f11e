use core_types::{CoreError, StrategyId, StrategyStatus};
use stages::StageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("State store error: {0}")]
    Store(#[from] database::DbError),

    #[error("Lifecycle error: {0}")]
    Core(#[from] CoreError),

    #[error("Strategy {strategy_id} kept conflicting after {attempts} attempts")]
    ConflictRetriesExhausted { strategy_id: StrategyId, attempts: u32 },

    #[error("Strategy {strategy_id} is {status}; the operation needs a terminal strategy")]
    NotTerminal {
        strategy_id: StrategyId,
        status: StrategyStatus,
    },

    #[error("Strategy {strategy_id} is {status}, not DEPLOYED")]
    NotDeployed {
        strategy_id: StrategyId,
        status: StrategyStatus,
    },

    #[error("Strategy {0} is DEPLOYED but has no deployment result")]
    MissingDeployment(StrategyId),

    #[error("Performance feed error: {0}")]
    Performance(StageError),
}
