use crate::DbError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{PerformanceSnapshot, StrategyId, StrategyRecord, StrategyStatus};
use std::fmt;
use std::str::FromStr;

/// The durable state store contract.
///
/// Every cross-worker coordination in the system goes through `conditional_write`,
/// so implementations must make it atomic with respect to concurrent writers and
/// must give a client read-after-write visibility of its own writes.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Inserts a brand-new record. The stored record has version 1.
    async fn create(&self, record: &StrategyRecord) -> Result<StrategyRecord, DbError>;

    /// Loads a record. `StrategyRecord::version` holds the stored version.
    async fn read(&self, strategy_id: StrategyId) -> Result<StrategyRecord, DbError>;

    /// Replaces the record if and only if its stored version equals `expected_version`.
    ///
    /// Returns the new version (`expected_version + 1`), or `DbError::VersionConflict`.
    async fn conditional_write(
        &self,
        strategy_id: StrategyId,
        expected_version: u64,
        record: &StrategyRecord,
    ) -> Result<u64, DbError>;

    /// One page of records matching `filter`, ordered by `(created_at, strategy_id)`.
    async fn list(
        &self,
        filter: &StatusFilter,
        page_token: Option<&PageToken>,
        limit: u32,
    ) -> Result<Page, DbError>;

    /// Appends a live performance reading for a deployed strategy.
    async fn record_performance(&self, snapshot: &PerformanceSnapshot) -> Result<(), DbError>;

    /// The most recent `limit` performance readings, newest first.
    async fn performance(
        &self,
        strategy_id: StrategyId,
        limit: u32,
    ) -> Result<Vec<PerformanceSnapshot>, DbError>;
}

/// Which records `list` returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusFilter {
    /// Empty means every status.
    pub statuses: Vec<StrategyStatus>,
    pub include_archived: bool,
}

impl StatusFilter {
    /// Every non-terminal, non-archived record: the scheduler's work queue.
    pub fn active() -> Self {
        Self {
            statuses: StrategyStatus::ACTIVE.to_vec(),
            include_archived: false,
        }
    }

    pub fn only(status: StrategyStatus) -> Self {
        Self {
            statuses: vec![status],
            include_archived: false,
        }
    }

    pub fn all() -> Self {
        Self {
            statuses: Vec::new(),
            include_archived: true,
        }
    }

    pub fn matches(&self, record: &StrategyRecord) -> bool {
        (self.include_archived || !record.archived)
            && (self.statuses.is_empty() || self.statuses.contains(&record.status))
    }
}

/// An opaque keyset cursor: the `(created_at, strategy_id)` of the last record served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageToken {
    pub created_at_micros: i64,
    pub strategy_id: StrategyId,
}

impl PageToken {
    pub fn after(record: &StrategyRecord) -> Self {
        Self {
            created_at_micros: record.created_at.timestamp_micros(),
            strategy_id: record.strategy_id,
        }
    }

    pub fn created_at(&self) -> Result<DateTime<Utc>, DbError> {
        DateTime::from_timestamp_micros(self.created_at_micros)
            .ok_or_else(|| DbError::InvalidPageToken(self.to_string()))
    }

    /// Whether `record` sorts strictly after this cursor.
    pub fn precedes(&self, record: &StrategyRecord) -> bool {
        (record.created_at.timestamp_micros(), record.strategy_id)
            > (self.created_at_micros, self.strategy_id)
    }
}

impl fmt::Display for PageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.created_at_micros, self.strategy_id)
    }
}

impl FromStr for PageToken {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DbError::InvalidPageToken(s.to_string());
        let (micros, id) = s.split_once('.').ok_or_else(invalid)?;
        Ok(Self {
            created_at_micros: micros.parse().map_err(|_| invalid())?,
            strategy_id: id.parse().map_err(|_| invalid())?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct Page {
    pub records: Vec<StrategyRecord>,
    pub next_page_token: Option<PageToken>,
}

impl Page {
    /// Builds a page from up to `limit + 1` sorted rows; the extra row only signals that more exist.
    pub fn from_overfetch(mut records: Vec<StrategyRecord>, limit: u32) -> Self {
        let limit = limit as usize;
        let next_page_token = if records.len() > limit {
            records.truncate(limit);
            records.last().map(PageToken::after)
        } else {
            None
        };
        Self {
            records,
            next_page_token,
        }
    }
}
