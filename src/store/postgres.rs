//! # Postgres Job Store
//!
//! Durable [`JobStore`] on `sqlx` + Postgres. Records of every queue live in
//! one `broadcast_jobs` table keyed by `queue_name`; the pause flag lives in
//! `broadcast_queues` so it survives restarts and is shared between
//! processes draining the same queue.
//!
//! ## Claiming
//!
//! Claims select the oldest due row with `FOR UPDATE SKIP LOCKED` inside a
//! transaction, so concurrent claimers (in this process or another) never
//! receive the same row. Terminal transitions lock the row and run the same
//! guard logic as the in-memory store before writing it back.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::errors::{StoreError, StoreResult};
use super::traits::{JobStore, JobTransition};
use crate::models::{JobData, JobId, JobRecord};
use crate::state_machine::{transition, JobEvent, JobState};

const SCHEMA: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS broadcast_jobs (
        id            UUID PRIMARY KEY,
        seq           BIGSERIAL,
        queue_name    TEXT NOT NULL,
        batch_id      UUID NOT NULL,
        data          JSONB NOT NULL,
        state         TEXT NOT NULL,
        attempt       INTEGER NOT NULL DEFAULT 0,
        max_attempts  INTEGER NOT NULL,
        failed_reason TEXT,
        last_error    TEXT,
        return_value  JSONB,
        run_at        TIMESTAMPTZ NOT NULL,
        created_at    TIMESTAMPTZ NOT NULL,
        updated_at    TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS broadcast_jobs_claim_idx ON broadcast_jobs (queue_name, state, run_at, seq)",
    "CREATE INDEX IF NOT EXISTS broadcast_jobs_batch_idx ON broadcast_jobs (batch_id)",
    r#"
    CREATE TABLE IF NOT EXISTS broadcast_queues (
        queue_name TEXT PRIMARY KEY,
        paused     BOOLEAN NOT NULL DEFAULT FALSE,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
];

const JOB_COLUMNS: &str = "id, batch_id, data, state, attempt, max_attempts, failed_reason, \
                           last_error, return_value, run_at, created_at, updated_at";

#[derive(Debug)]
struct JobRow {
    id: Uuid,
    batch_id: Uuid,
    data: Json<JobData>,
    state: String,
    attempt: i32,
    max_attempts: i32,
    failed_reason: Option<String>,
    last_error: Option<String>,
    return_value: Option<Value>,
    run_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for JobRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            id: row.try_get("id")?,
            batch_id: row.try_get("batch_id")?,
            data: row.try_get("data")?,
            state: row.try_get("state")?,
            attempt: row.try_get("attempt")?,
            max_attempts: row.try_get("max_attempts")?,
            failed_reason: row.try_get("failed_reason")?,
            last_error: row.try_get("last_error")?,
            return_value: row.try_get("return_value")?,
            run_at: row.try_get("run_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<JobRow> for JobRecord {
    type Error = StoreError;

    fn try_from(row: JobRow) -> StoreResult<Self> {
        let state: JobState = row.state.parse().map_err(StoreError::serialization)?;
        Ok(Self {
            id: JobId(row.id),
            batch_id: row.batch_id,
            data: row.data.0,
            state,
            attempt: u32::try_from(row.attempt).unwrap_or(0),
            max_attempts: u32::try_from(row.max_attempts).unwrap_or(1),
            failed_reason: row.failed_reason,
            last_error: row.last_error,
            return_value: row.return_value,
            run_at: row.run_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn cutoff(older_than: Duration) -> DateTime<Utc> {
    Utc::now() - chrono::Duration::from_std(older_than).unwrap_or(chrono::Duration::zero())
}

/// Postgres-backed [`JobStore`] for one named queue
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
    queue_name: String,
}

impl PgJobStore {
    pub fn new(pool: PgPool, queue_name: impl Into<String>) -> Self {
        Self {
            pool,
            queue_name: queue_name.into(),
        }
    }

    /// Open a pool and make sure the schema exists
    #[instrument(skip(database_url))]
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        queue_name: &str,
    ) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::unavailable(format!("Failed to connect: {e}")))?;

        let store = Self::new(pool, queue_name);
        store.ensure_schema().await?;
        info!(queue = %store.queue_name, "✅ Connected Postgres job store");
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Create tables and indexes if they do not exist (idempotent)
    #[instrument(skip(self), fields(queue = %self.queue_name))]
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Job store schema ensured");
        Ok(())
    }

    async fn insert(
        tx: &mut Transaction<'_, Postgres>,
        queue: &str,
        record: &JobRecord,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO broadcast_jobs
                (id, queue_name, batch_id, data, state, attempt, max_attempts,
                 failed_reason, last_error, return_value, run_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(record.id.0)
        .bind(queue)
        .bind(record.batch_id)
        .bind(Json(&record.data))
        .bind(record.state.as_str())
        .bind(record.attempt as i32)
        .bind(record.max_attempts as i32)
        .bind(&record.failed_reason)
        .bind(&record.last_error)
        .bind(&record.return_value)
        .bind(record.run_at)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn write_back(tx: &mut Transaction<'_, Postgres>, record: &JobRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE broadcast_jobs
            SET state = $2, attempt = $3, failed_reason = $4, last_error = $5,
                return_value = $6, run_at = $7, updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(record.id.0)
        .bind(record.state.as_str())
        .bind(record.attempt as i32)
        .bind(&record.failed_reason)
        .bind(&record.last_error)
        .bind(&record.return_value)
        .bind(record.run_at)
        .bind(record.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Lock one row, run the transition guard, and persist the result
    async fn apply(&self, id: JobId, event: JobEvent) -> StoreResult<JobTransition> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM broadcast_jobs WHERE id = $1 AND queue_name = $2 FOR UPDATE"
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id.0)
            .bind(&self.queue_name)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::job_not_found(id))?;

        let mut record = JobRecord::try_from(row)?;
        let outcome = transition(&mut record, event, Utc::now())
            .map_err(|e| StoreError::invalid_transition(id, e))?;

        if outcome.is_applied() {
            Self::write_back(&mut tx, &record).await?;
        }
        tx.commit().await?;

        Ok(JobTransition { outcome, record })
    }

    async fn set_paused(&self, paused: bool) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO broadcast_queues (queue_name, paused, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (queue_name) DO UPDATE SET paused = EXCLUDED.paused, updated_at = now()
            "#,
        )
        .bind(&self.queue_name)
        .bind(paused)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn enqueue(&self, record: JobRecord) -> StoreResult<JobId> {
        let mut tx = self.pool.begin().await?;
        Self::insert(&mut tx, &self.queue_name, &record).await?;
        tx.commit().await?;
        Ok(record.id)
    }

    #[instrument(skip(self, records), fields(queue = %self.queue_name, count = records.len()))]
    async fn enqueue_batch(&self, records: Vec<JobRecord>) -> StoreResult<Vec<JobId>> {
        let mut tx = self.pool.begin().await?;
        for record in &records {
            Self::insert(&mut tx, &self.queue_name, record).await?;
        }
        tx.commit().await?;
        Ok(records.iter().map(|r| r.id).collect())
    }

    async fn claim_next(&self) -> StoreResult<Option<JobRecord>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let paused: Option<bool> =
            sqlx::query_scalar("SELECT paused FROM broadcast_queues WHERE queue_name = $1")
                .bind(&self.queue_name)
                .fetch_optional(&mut *tx)
                .await?;
        if paused.unwrap_or(false) {
            tx.rollback().await?;
            return Ok(None);
        }

        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS} FROM broadcast_jobs
            WHERE queue_name = $1
              AND (state = 'waiting' OR (state = 'delayed' AND run_at <= $2))
            ORDER BY run_at, seq
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#
        );
        let Some(row) = sqlx::query_as::<_, JobRow>(&sql)
            .bind(&self.queue_name)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await?
        else {
            tx.rollback().await?;
            return Ok(None);
        };

        let mut record = JobRecord::try_from(row)?;
        transition(&mut record, JobEvent::Claim, now)
            .map_err(|e| StoreError::invalid_transition(record.id, e))?;
        Self::write_back(&mut tx, &record).await?;
        tx.commit().await?;

        debug!(job_id = %record.id, queue = %self.queue_name, "Claimed job");
        Ok(Some(record))
    }

    async fn mark_completed(
        &self,
        id: JobId,
        result: Option<Value>,
    ) -> StoreResult<JobTransition> {
        self.apply(id, JobEvent::Complete(result)).await
    }

    async fn mark_failed(&self, id: JobId, reason: &str) -> StoreResult<JobTransition> {
        self.apply(id, JobEvent::Fail(reason.to_string())).await
    }

    async fn schedule_retry(
        &self,
        id: JobId,
        reason: &str,
        delay: Duration,
    ) -> StoreResult<JobRecord> {
        let event = JobEvent::Retry {
            reason: reason.to_string(),
            delay,
        };
        Ok(self.apply(id, event).await?.record)
    }

    #[instrument(skip(self), fields(queue = %self.queue_name))]
    async fn requeue_stalled(&self, stalled_after: Duration) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE broadcast_jobs
            SET state = 'waiting', failed_reason = NULL, run_at = $3, updated_at = $3
            WHERE queue_name = $1 AND state = 'active' AND updated_at <= $2
            "#,
        )
        .bind(&self.queue_name)
        .bind(cutoff(stalled_after))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn get(&self, id: JobId) -> StoreResult<Option<JobRecord>> {
        let sql =
            format!("SELECT {JOB_COLUMNS} FROM broadcast_jobs WHERE id = $1 AND queue_name = $2");
        sqlx::query_as::<_, JobRow>(&sql)
            .bind(id.0)
            .bind(&self.queue_name)
            .fetch_optional(&self.pool)
            .await?
            .map(JobRecord::try_from)
            .transpose()
    }

    async fn count_by_state(&self, state: JobState) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM broadcast_jobs WHERE queue_name = $1 AND state = $2",
        )
        .bind(&self.queue_name)
        .bind(state.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn list_by_state(
        &self,
        state: JobState,
        limit: Option<usize>,
    ) -> StoreResult<Vec<JobRecord>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM broadcast_jobs WHERE queue_name = $1 AND state = $2 \
             ORDER BY seq LIMIT $3"
        );
        let limit = limit.map_or(i64::MAX, |l| i64::try_from(l).unwrap_or(i64::MAX));
        sqlx::query_as::<_, JobRow>(&sql)
            .bind(&self.queue_name)
            .bind(state.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(JobRecord::try_from)
            .collect()
    }

    #[instrument(skip(self), fields(queue = %self.queue_name))]
    async fn remove_by_state(&self, state: JobState, older_than: Duration) -> StoreResult<u64> {
        let result = sqlx::query(
            "DELETE FROM broadcast_jobs WHERE queue_name = $1 AND state = $2 AND updated_at <= $3",
        )
        .bind(&self.queue_name)
        .bind(state.as_str())
        .bind(cutoff(older_than))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn pause(&self) -> StoreResult<()> {
        self.set_paused(true).await
    }

    async fn resume(&self) -> StoreResult<()> {
        self.set_paused(false).await
    }

    async fn is_paused(&self) -> StoreResult<bool> {
        let paused: Option<bool> =
            sqlx::query_scalar("SELECT paused FROM broadcast_queues WHERE queue_name = $1")
                .bind(&self.queue_name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(paused.unwrap_or(false))
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::unavailable(format!("Health check failed: {e}")))?;
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "postgres"
    }
}
