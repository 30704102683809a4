//! PostgreSQL-backed stats store
//!
//! One table, `user_event_stats`, keyed by `(user_id, event_type)`. Writes
//! are idempotent merges: `INSERT .. ON CONFLICT .. DO UPDATE SET count =
//! existing + incoming`, batched inside a single transaction. Every
//! operation is wrapped in bounded retry with exponential backoff;
//! connection-level failures retry, everything else surfaces on the first
//! attempt.

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;

use super::{StatsStore, StoreError};
use crate::config::PostgresConfig;
use crate::error_handler::ExponentialBackoff;
use crate::events::UserEventStats;

const MAX_BACKOFF_SECS: u64 = 60;

pub struct PgStatsStore {
    pool: PgPool,
    max_retry_count: u32,
    retry_delay_seconds: u64,
}

impl PgStatsStore {
    /// Connect a pool sized and timed per configuration. The command
    /// timeout is pushed down to the server as `statement_timeout`.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StoreError> {
        let connect_options = PgConnectOptions::from_str(&config.connection_string)
            .map_err(classify)?
            .options([(
                "statement_timeout",
                format!("{}s", config.command_timeout_seconds),
            )]);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.command_timeout_seconds))
            .connect_with(connect_options)
            .await
            .map_err(classify)?;

        log::info!(
            "✅ Connected to PostgreSQL (pool: {}, statement timeout: {}s)",
            config.max_connections,
            config.command_timeout_seconds
        );

        Ok(Self {
            pool,
            max_retry_count: config.max_retry_count,
            retry_delay_seconds: config.retry_delay_seconds,
        })
    }

    /// Store handle over an existing pool.
    pub fn from_pool(pool: PgPool, max_retry_count: u32, retry_delay_seconds: u64) -> Self {
        Self {
            pool,
            max_retry_count,
            retry_delay_seconds,
        }
    }

    async fn with_retry<T, F, Fut>(&self, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, StoreError>>,
    {
        let mut backoff = ExponentialBackoff::new(
            self.retry_delay_seconds,
            MAX_BACKOFF_SECS,
            self.max_retry_count,
        );

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    log::warn!("⚠️  Transient store error: {}", err);
                    if backoff.sleep().await.is_err() {
                        log::error!("❌ Store retries exhausted");
                        return Err(err);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn run_initialize(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS user_event_stats (
                user_id    BIGINT      NOT NULL,
                event_type VARCHAR(50) NOT NULL,
                count      BIGINT      NOT NULL DEFAULT 0,
                PRIMARY KEY (user_id, event_type)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_user_event_stats_user_id
             ON user_event_stats (user_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        Ok(())
    }

    async fn run_upsert_batch(&self, stats: &[UserEventStats]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(classify)?;

        for stat in stats {
            sqlx::query(
                "INSERT INTO user_event_stats (user_id, event_type, count)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (user_id, event_type)
                 DO UPDATE SET count = user_event_stats.count + EXCLUDED.count",
            )
            .bind(stat.user_id())
            .bind(stat.event_type())
            .bind(stat.count())
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
        }

        tx.commit().await.map_err(classify)?;
        Ok(())
    }

    async fn run_get(
        &self,
        user_id: i64,
        event_type: &str,
    ) -> Result<Option<UserEventStats>, StoreError> {
        let row = sqlx::query(
            "SELECT count FROM user_event_stats
             WHERE user_id = $1 AND event_type = $2",
        )
        .bind(user_id)
        .bind(event_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;

        match row {
            Some(row) => {
                let count: i64 = row.try_get("count").map_err(classify)?;
                Ok(Some(UserEventStats::from_parts(user_id, event_type, count)))
            }
            None => Ok(None),
        }
    }

    async fn run_get_user(&self, user_id: i64) -> Result<Vec<UserEventStats>, StoreError> {
        let rows = sqlx::query(
            "SELECT event_type, count FROM user_event_stats
             WHERE user_id = $1
             ORDER BY event_type",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        let mut stats = Vec::with_capacity(rows.len());
        for row in rows {
            let event_type: String = row.try_get("event_type").map_err(classify)?;
            let count: i64 = row.try_get("count").map_err(classify)?;
            stats.push(UserEventStats::from_parts(user_id, event_type, count));
        }
        Ok(stats)
    }
}

#[async_trait]
impl StatsStore for PgStatsStore {
    async fn initialize(&self) -> Result<(), StoreError> {
        self.with_retry(|| self.run_initialize()).await?;
        log::info!("✅ user_event_stats table ready");
        Ok(())
    }

    async fn upsert_batch(&self, stats: &[UserEventStats]) -> Result<(), StoreError> {
        if stats.is_empty() {
            return Ok(());
        }
        self.with_retry(|| self.run_upsert_batch(stats)).await
    }

    async fn upsert(&self, stats: &UserEventStats) -> Result<(), StoreError> {
        self.with_retry(|| self.run_upsert_batch(std::slice::from_ref(stats)))
            .await
    }

    async fn get(
        &self,
        user_id: i64,
        event_type: &str,
    ) -> Result<Option<UserEventStats>, StoreError> {
        self.with_retry(|| self.run_get(user_id, event_type)).await
    }

    async fn get_user(&self, user_id: i64) -> Result<Vec<UserEventStats>, StoreError> {
        self.with_retry(|| self.run_get_user(user_id)).await
    }
}

/// Splits driver failures into retryable and terminal classes.
///
/// Connection-level trouble (I/O, TLS, pool exhaustion) and the SQLSTATE
/// classes Postgres marks as restart-safe (connection exceptions,
/// serialization failures, deadlocks, admin shutdown) retry; anything else
/// is a real error and propagates immediately.
fn classify(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Transient(err.to_string()),
        sqlx::Error::Database(db) => {
            let transient = db
                .code()
                .map(|code| {
                    code.starts_with("08") || code == "40001" || code == "40P01" || code == "57P01"
                })
                .unwrap_or(false);
            if transient {
                StoreError::Transient(err.to_string())
            } else {
                StoreError::Fatal(err.to_string())
            }
        }
        _ => StoreError::Fatal(err.to_string()),
    }
}
