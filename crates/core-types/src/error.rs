use crate::enums::{Stage, StrategyStatus};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Invalid input for {0}: {1}")]
    InvalidInput(String, String),

    #[error("Illegal lifecycle transition from {from} to {to}")]
    InvalidTransition {
        from: StrategyStatus,
        to: StrategyStatus,
    },

    #[error("A result for stage '{0}' has already been recorded and is immutable")]
    ResultAlreadyRecorded(Stage),

    #[error("The strategy definition has already been set and is immutable")]
    DefinitionAlreadySet,

    #[error("Invalid {stage} result: {reason}")]
    InvalidResult { stage: Stage, reason: String },
}
