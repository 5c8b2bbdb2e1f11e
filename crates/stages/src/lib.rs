//! # AATR Stages Crate
//!
//! The uniform adapter contract each lifecycle stage is driven through, the
//! collaborator interfaces behind each adapter, and deterministic simulated
//! collaborators for paper runs.
//!
//! ## Architectural Principles
//!
//! - **Adapters are stateless:** an adapter reads a `StageContext` and returns a
//!   `StageOutput` or a classified `StageError`. It never touches the state store;
//!   the orchestrator alone persists results.
//! - **Classification at the boundary:** collaborator errors are mapped to
//!   `FailureKind::Transient` or `FailureKind::Permanent` here, so the retry
//!   policy upstream never has to inspect collaborator-specific failures.
//! - **Validated output:** every `StageResult` is schema-checked before it leaves
//!   an adapter.
//!
//! ## Public API
//!
//! - `StageAdapter`, `StageContext`, `StageOutput`: the adapter contract.
//! - `HypothesisGenerator`, `BacktestEngine`, `TrainingEngine`, `DeploymentTarget`:
//!   the external collaborators, each wrapped by its adapter.
//! - `PerformanceFeed`: live performance of deployed strategies.
//! - `StageAdapters`: the per-stage adapter set handed to the orchestrator.
//! - `simulated`: seeded paper collaborators.
//! - `StageError`, `CollaboratorError`: the errors adapters and collaborators return.

pub mod adapter;
pub mod backtest;
pub mod deployment;
pub mod error;
pub mod hypothesis;
pub mod registry;
pub mod simulated;
pub mod training;

pub use adapter::{StageAdapter, StageContext, StageOutput};
pub use backtest::{BacktestAdapter, BacktestEngine};
pub use deployment::{
    DeploymentAdapter, DeploymentStatus, DeploymentTarget, LiveMetrics, PerformanceFeed,
};
pub use error::{CollaboratorError, CollaboratorErrorKind, StageError};
pub use hypothesis::{GeneratedHypothesis, HypothesisAdapter, HypothesisGenerator};
pub use registry::StageAdapters;
pub use training::{TrainingAdapter, TrainingEngine, TrainingStatus};
