//! # AATR Core Types
//!
//! The shared vocabulary of the strategy lifecycle: identifiers, the status
//! state machine, the strategy record and the tagged per-stage results.
//!
//! This is a pure crate with no I/O. Every other crate in the workspace depends on it.

pub mod enums;
pub mod error;
pub mod record;
pub mod results;

// Re-export the core types to provide a clean public API.
pub use enums::{FailureKind, LifecycleStep, Stage, StrategyStatus};
pub use error::CoreError;
pub use record::{
    GenerationRequest, Lease, Lineage, PendingJob, PerformanceSnapshot, RiskConstraints,
    StrategyDefinition, StrategyId, StrategyRecord, TerminalReason,
};
pub use results::{
    ArtifactRef, BacktestMetrics, BacktestResult, DeploymentResult, EntryOutcome, GateFailure,
    HypothesisResult, JobHandle, StageEntry, StageFailure, StageResult, TrainingMetrics,
    TrainingResult,
};
