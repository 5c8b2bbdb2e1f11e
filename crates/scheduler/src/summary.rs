use orchestrator::AdvanceOutcome;
use std::fmt;

/// Tally of one scheduler pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Active records seen while paging.
    pub scanned: usize,
    /// Records whose lease this worker claimed and handed to the orchestrator.
    pub dispatched: usize,
    pub not_due: usize,
    /// Leased elsewhere, or lost the claim race.
    pub leased: usize,
    pub advanced: usize,
    pub waiting: usize,
    pub retrying: usize,
    pub rejected: usize,
    pub failed: usize,
    /// Dispatched, but another writer got there first.
    pub skipped: usize,
    /// Orchestrator errors. The strategy is left as it was.
    pub errors: usize,
}

impl PassSummary {
    pub fn record(&mut self, outcome: &AdvanceOutcome) {
        match outcome {
            AdvanceOutcome::Advanced { .. } => self.advanced += 1,
            AdvanceOutcome::Waiting { .. } => self.waiting += 1,
            AdvanceOutcome::Retrying { .. } => self.retrying += 1,
            AdvanceOutcome::Rejected { .. } => self.rejected += 1,
            AdvanceOutcome::Failed { .. } => self.failed += 1,
            AdvanceOutcome::Noop
            | AdvanceOutcome::Leased
            | AdvanceOutcome::NotDue { .. }
            | AdvanceOutcome::Superseded { .. } => self.skipped += 1,
        }
    }

    /// Outcomes that persisted a write.
    pub fn writes(&self) -> usize {
        self.advanced + self.waiting + self.retrying + self.rejected + self.failed
    }
}

impl fmt::Display for PassSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scanned={} dispatched={} advanced={} waiting={} retrying={} rejected={} failed={} skipped={} not_due={} leased={} errors={}",
            self.scanned,
            self.dispatched,
            self.advanced,
            self.waiting,
            self.retrying,
            self.rejected,
            self.failed,
            self.skipped,
            self.not_due,
            self.leased,
            self.errors
        )
    }
}

/// Tally of one performance monitoring sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorSummary {
    pub collected: usize,
    pub errors: usize,
}
