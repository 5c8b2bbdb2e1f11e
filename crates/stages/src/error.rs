use core_types::{CoreError, FailureKind};
use std::fmt;
use thiserror::Error;

/// A stage adapter failure, classified for the retry policy.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind} stage error: {detail}")]
pub struct StageError {
    pub kind: FailureKind,
    pub detail: String,
}

impl StageError {
    pub fn transient(detail: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            detail: detail.into(),
        }
    }

    pub fn permanent(detail: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            detail: detail.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == FailureKind::Transient
    }
}

/// A result that fails schema validation is never retried.
impl From<CoreError> for StageError {
    fn from(error: CoreError) -> Self {
        StageError::permanent(error.to_string())
    }
}

/// What went wrong inside an external collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollaboratorErrorKind {
    Timeout,
    RateLimited,
    /// Network or venue connectivity.
    Connectivity,
    /// The request itself is malformed or the definition is unusable.
    Invalid,
    /// Refused on validation or compliance grounds.
    Rejected,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub struct CollaboratorError {
    pub kind: CollaboratorErrorKind,
    pub message: String,
}

impl CollaboratorError {
    pub fn new(kind: CollaboratorErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The default classification: infrastructure trouble is transient,
    /// anything about the request itself is permanent.
    pub fn failure_kind(&self) -> FailureKind {
        match self.kind {
            CollaboratorErrorKind::Timeout
            | CollaboratorErrorKind::RateLimited
            | CollaboratorErrorKind::Connectivity => FailureKind::Transient,
            CollaboratorErrorKind::Invalid | CollaboratorErrorKind::Rejected => {
                FailureKind::Permanent
            }
        }
    }
}

impl fmt::Display for CollaboratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl From<CollaboratorError> for StageError {
    fn from(error: CollaboratorError) -> Self {
        Self {
            kind: error.failure_kind(),
            detail: error.to_string(),
        }
    }
}
