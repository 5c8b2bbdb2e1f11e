use crate::store::{Page, PageToken, StateStore, StatusFilter};
use crate::DbError;
use async_trait::async_trait;
use configuration::StoreConfig;
use core_types::{PerformanceSnapshot, StrategyId, StrategyRecord};
use std::future::Future;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

/// Backoff policy for a temporarily unavailable store.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    fn delays(&self) -> impl Iterator<Item = Duration> {
        // from_millis(2).factor(f) yields f*2, f*4, f*8, ... i.e. doubling from `initial_backoff`.
        let factor = (self.initial_backoff.as_millis() as u64 / 2).max(1);
        ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(self.max_backoff)
            .map(jitter)
            .take(self.max_attempts.saturating_sub(1))
    }
}

impl From<&StoreConfig> for RetryPolicy {
    fn from(config: &StoreConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: config.max_backoff,
        }
    }
}

/// Wraps any `StateStore` so that `DbError::Unavailable` is retried with
/// jittered exponential backoff before it is surfaced to the caller.
///
/// Every other error (conflicts, not-found, bad data) is returned immediately.
pub struct RetryingStore<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: StateStore> RetryingStore<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn retry<T, F, Fut>(&self, operation: &'static str, action: F) -> Result<T, DbError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DbError>>,
    {
        let mut attempt = 0usize;
        RetryIf::start(self.policy.delays(), action, |error: &DbError| {
            attempt += 1;
            let retry = error.is_transient() && attempt < self.policy.max_attempts;
            if retry {
                tracing::warn!(operation, attempt, error = %error, "State store unavailable, backing off");
            } else if error.is_transient() {
                tracing::error!(operation, attempt, error = %error, "State store still unavailable, giving up");
            }
            retry
        })
        .await
    }
}

#[async_trait]
impl<S: StateStore> StateStore for RetryingStore<S> {
    async fn create(&self, record: &StrategyRecord) -> Result<StrategyRecord, DbError> {
        self.retry("create", || self.inner.create(record)).await
    }

    async fn read(&self, strategy_id: StrategyId) -> Result<StrategyRecord, DbError> {
        self.retry("read", || self.inner.read(strategy_id)).await
    }

    async fn conditional_write(
        &self,
        strategy_id: StrategyId,
        expected_version: u64,
        record: &StrategyRecord,
    ) -> Result<u64, DbError> {
        self.retry("conditional_write", || {
            self.inner.conditional_write(strategy_id, expected_version, record)
        })
        .await
    }

    async fn list(
        &self,
        filter: &StatusFilter,
        page_token: Option<&PageToken>,
        limit: u32,
    ) -> Result<Page, DbError> {
        self.retry("list", || self.inner.list(filter, page_token, limit)).await
    }

    async fn record_performance(&self, snapshot: &PerformanceSnapshot) -> Result<(), DbError> {
        self.retry("record_performance", || self.inner.record_performance(snapshot))
            .await
    }

    async fn performance(
        &self,
        strategy_id: StrategyId,
        limit: u32,
    ) -> Result<Vec<PerformanceSnapshot>, DbError> {
        self.retry("performance", || self.inner.performance(strategy_id, limit))
            .await
    }
}
