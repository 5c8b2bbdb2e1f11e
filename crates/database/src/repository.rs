use crate::store::{Page, PageToken, StateStore, StatusFilter};
use crate::DbError;
use async_trait::async_trait;
use core_types::{PerformanceSnapshot, StrategyId, StrategyRecord};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Json;
use sqlx::Row;

/// The PostgreSQL implementation of the `StateStore`.
///
/// Each record is one row: the full `StrategyRecord` as a JSONB document plus the
/// columns we filter, order and version-check on. The optimistic-concurrency check
/// is a single `UPDATE ... WHERE version = $expected`, so it is atomic without an
/// explicit transaction.
#[derive(Debug, Clone)]
pub struct PgStateStore {
    pool: PgPool,
}

impl PgStateStore {
    /// Creates a new `PgStateStore` with a shared database connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn decode_record(row: &PgRow) -> Result<StrategyRecord, DbError> {
        let version: i64 = row.try_get("version")?;
        let Json(mut record): Json<StrategyRecord> = row.try_get("document")?;
        record.version = u64::try_from(version)
            .map_err(|_| DbError::Corrupt(format!("negative version {version}")))?;
        Ok(record)
    }

    async fn current_version(&self, strategy_id: StrategyId) -> Result<Option<u64>, DbError> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM strategies WHERE strategy_id = $1")
                .bind(strategy_id.0)
                .fetch_optional(&self.pool)
                .await?;
        Ok(version.map(|v| v as u64))
    }
}

#[async_trait]
impl StateStore for PgStateStore {
    async fn create(&self, record: &StrategyRecord) -> Result<StrategyRecord, DbError> {
        let mut stored = record.clone();
        stored.version = 1;

        let result = sqlx::query(
            r#"
            INSERT INTO strategies (strategy_id, status, archived, version, created_at, updated_at, document)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (strategy_id) DO NOTHING
            "#,
        )
        .bind(stored.strategy_id.0)
        .bind(stored.status.as_str())
        .bind(stored.archived)
        .bind(1_i64)
        .bind(stored.created_at)
        .bind(stored.updated_at)
        .bind(Json(&stored))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::AlreadyExists(stored.strategy_id));
        }
        Ok(stored)
    }

    async fn read(&self, strategy_id: StrategyId) -> Result<StrategyRecord, DbError> {
        let row = sqlx::query("SELECT version, document FROM strategies WHERE strategy_id = $1")
            .bind(strategy_id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(DbError::NotFound(strategy_id))?;
        Self::decode_record(&row)
    }

    async fn conditional_write(
        &self,
        strategy_id: StrategyId,
        expected_version: u64,
        record: &StrategyRecord,
    ) -> Result<u64, DbError> {
        let new_version = expected_version + 1;
        let mut stored = record.clone();
        stored.strategy_id = strategy_id;
        stored.version = new_version;

        let result = sqlx::query(
            r#"
            UPDATE strategies
            SET status = $3, archived = $4, version = $5, updated_at = $6, document = $7
            WHERE strategy_id = $1 AND version = $2
            "#,
        )
        .bind(strategy_id.0)
        .bind(expected_version as i64)
        .bind(stored.status.as_str())
        .bind(stored.archived)
        .bind(new_version as i64)
        .bind(stored.updated_at)
        .bind(Json(&stored))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(new_version);
        }

        // Nothing matched: either the row is gone or someone else bumped the version.
        match self.current_version(strategy_id).await? {
            None => Err(DbError::NotFound(strategy_id)),
            Some(actual) => Err(DbError::VersionConflict {
                strategy_id,
                expected: expected_version,
                actual,
            }),
        }
    }

    async fn list(
        &self,
        filter: &StatusFilter,
        page_token: Option<&PageToken>,
        limit: u32,
    ) -> Result<Page, DbError> {
        let statuses: Option<Vec<String>> = if filter.statuses.is_empty() {
            None
        } else {
            Some(filter.statuses.iter().map(|s| s.as_str().to_string()).collect())
        };
        let after_created_at = page_token.map(PageToken::created_at).transpose()?;
        let after_id = page_token.map(|token| token.strategy_id.0);

        let rows = sqlx::query(
            r#"
            SELECT version, document
            FROM strategies
            WHERE ($1::text[] IS NULL OR status = ANY($1))
              AND ($2 OR NOT archived)
              AND ($3::timestamptz IS NULL OR (created_at, strategy_id) > ($3, $4::uuid))
            ORDER BY created_at ASC, strategy_id ASC
            LIMIT $5
            "#,
        )
        .bind(statuses)
        .bind(filter.include_archived)
        .bind(after_created_at)
        .bind(after_id)
        .bind(i64::from(limit) + 1)
        .fetch_all(&self.pool)
        .await?;

        let records = rows
            .iter()
            .map(Self::decode_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::from_overfetch(records, limit))
    }

    async fn record_performance(&self, snapshot: &PerformanceSnapshot) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO performance_snapshots (strategy_id, observed_at, document) VALUES ($1, $2, $3)",
        )
        .bind(snapshot.strategy_id.0)
        .bind(snapshot.observed_at)
        .bind(Json(snapshot))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            let unknown_strategy =
                matches!(&e, sqlx::Error::Database(db) if db.is_foreign_key_violation());
            if unknown_strategy {
                DbError::NotFound(snapshot.strategy_id)
            } else {
                DbError::from(e)
            }
        })?;
        Ok(())
    }

    async fn performance(
        &self,
        strategy_id: StrategyId,
        limit: u32,
    ) -> Result<Vec<PerformanceSnapshot>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT document FROM performance_snapshots
            WHERE strategy_id = $1
            ORDER BY observed_at DESC
            LIMIT $2
            "#,
        )
        .bind(strategy_id.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<PerformanceSnapshot, DbError> {
                let Json(snapshot): Json<PerformanceSnapshot> = row.try_get("document")?;
                Ok(snapshot)
            })
            .collect()
    }
}
