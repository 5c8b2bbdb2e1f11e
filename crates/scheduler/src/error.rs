use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("State store error: {0}")]
    Store(#[from] database::DbError),

    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] orchestrator::OrchestratorError),

    #[error("Invalid generation request: {0}")]
    InvalidRequest(String),

    #[error("Worker pool closed")]
    PoolClosed(#[from] tokio::sync::AcquireError),
}
