use crate::store::{Page, PageToken, StateStore, StatusFilter};
use crate::DbError;
use async_trait::async_trait;
use core_types::{PerformanceSnapshot, StrategyId, StrategyRecord};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// A process-local `StateStore`.
///
/// Used by tests and by `--in-memory` runs. Every operation takes the lock for
/// its full duration, which makes `conditional_write` trivially atomic.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: RwLock<HashMap<StrategyId, StrategyRecord>>,
    snapshots: RwLock<Vec<PerformanceSnapshot>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl StateStore for InMemoryStore {
    async fn create(&self, record: &StrategyRecord) -> Result<StrategyRecord, DbError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.strategy_id) {
            return Err(DbError::AlreadyExists(record.strategy_id));
        }
        let mut stored = record.clone();
        stored.version = 1;
        records.insert(stored.strategy_id, stored.clone());
        Ok(stored)
    }

    async fn read(&self, strategy_id: StrategyId) -> Result<StrategyRecord, DbError> {
        self.records
            .read()
            .await
            .get(&strategy_id)
            .cloned()
            .ok_or(DbError::NotFound(strategy_id))
    }

    async fn conditional_write(
        &self,
        strategy_id: StrategyId,
        expected_version: u64,
        record: &StrategyRecord,
    ) -> Result<u64, DbError> {
        let mut records = self.records.write().await;
        let current = records
            .get_mut(&strategy_id)
            .ok_or(DbError::NotFound(strategy_id))?;
        if current.version != expected_version {
            return Err(DbError::VersionConflict {
                strategy_id,
                expected: expected_version,
                actual: current.version,
            });
        }
        let mut stored = record.clone();
        stored.strategy_id = strategy_id;
        stored.version = expected_version + 1;
        *current = stored;
        Ok(expected_version + 1)
    }

    async fn list(
        &self,
        filter: &StatusFilter,
        page_token: Option<&PageToken>,
        limit: u32,
    ) -> Result<Page, DbError> {
        let records = self.records.read().await;
        let mut matching: Vec<StrategyRecord> = records
            .values()
            .filter(|record| filter.matches(record))
            .filter(|record| page_token.map_or(true, |token| token.precedes(record)))
            .cloned()
            .collect();
        matching.sort_by_key(|record| (record.created_at.timestamp_micros(), record.strategy_id));
        matching.truncate(limit as usize + 1);
        Ok(Page::from_overfetch(matching, limit))
    }

    async fn record_performance(&self, snapshot: &PerformanceSnapshot) -> Result<(), DbError> {
        if !self.records.read().await.contains_key(&snapshot.strategy_id) {
            return Err(DbError::NotFound(snapshot.strategy_id));
        }
        self.snapshots.write().await.push(snapshot.clone());
        Ok(())
    }

    async fn performance(
        &self,
        strategy_id: StrategyId,
        limit: u32,
    ) -> Result<Vec<PerformanceSnapshot>, DbError> {
        let snapshots = self.snapshots.read().await;
        let mut readings: Vec<PerformanceSnapshot> = snapshots
            .iter()
            .filter(|snapshot| snapshot.strategy_id == strategy_id)
            .cloned()
            .collect();
        readings.sort_by(|a, b| b.observed_at.cmp(&a.observed_at));
        readings.truncate(limit as usize);
        Ok(readings)
    }
}
