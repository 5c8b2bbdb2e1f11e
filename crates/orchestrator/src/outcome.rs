use chrono::{DateTime, Utc};
use core_types::{GateFailure, JobHandle, StrategyStatus, TerminalReason};
use std::fmt;

/// What a single `advance` call did.
#[derive(Debug, Clone, PartialEq)]
pub enum AdvanceOutcome {
    /// The strategy is terminal.
    Noop,
    /// Another worker holds an unexpired lease.
    Leased,
    /// Waiting out a retry backoff or a poll interval.
    NotDue { next_attempt_at: DateTime<Utc> },
    /// Another writer moved the strategy on while this call was computing.
    Superseded {
        observed: StrategyStatus,
        current: StrategyStatus,
    },
    Advanced {
        from: StrategyStatus,
        to: StrategyStatus,
    },
    /// A long-running stage job is still in progress.
    Waiting { handle: JobHandle },
    Retrying {
        attempt: u32,
        next_attempt_at: DateTime<Utc>,
    },
    Rejected { gate: GateFailure },
    Failed { reason: TerminalReason },
}

impl AdvanceOutcome {
    /// Whether the call persisted a write.
    pub fn wrote(&self) -> bool {
        matches!(
            self,
            AdvanceOutcome::Advanced { .. }
                | AdvanceOutcome::Waiting { .. }
                | AdvanceOutcome::Retrying { .. }
                | AdvanceOutcome::Rejected { .. }
                | AdvanceOutcome::Failed { .. }
        )
    }
}

impl fmt::Display for AdvanceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdvanceOutcome::Noop => f.write_str("no-op (terminal)"),
            AdvanceOutcome::Leased => f.write_str("leased by another worker"),
            AdvanceOutcome::NotDue { next_attempt_at } => {
                write!(f, "not due until {next_attempt_at}")
            }
            AdvanceOutcome::Superseded { observed, current } => {
                write!(f, "superseded ({observed} -> {current} elsewhere)")
            }
            AdvanceOutcome::Advanced { from, to } => write!(f, "{from} -> {to}"),
            AdvanceOutcome::Waiting { handle } => write!(f, "waiting on {handle}"),
            AdvanceOutcome::Retrying {
                attempt,
                next_attempt_at,
            } => write!(f, "retry #{attempt} at {next_attempt_at}"),
            AdvanceOutcome::Rejected { gate } => write!(
                f,
                "rejected: {} ({} {} vs {})",
                gate.code, gate.metric, gate.observed, gate.threshold
            ),
            AdvanceOutcome::Failed { reason } => write!(f, "failed: {}: {}", reason.code, reason.detail),
        }
    }
}
