//! Postgres-backed job store.
//!
//! One row per job in the `jobs` table; payload and result are JSONB
//! documents. Every update is a single `UPDATE ... RETURNING` statement, so a
//! write is atomic per job without explicit transactions.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | JobStoreError |
//! |------------|----------------------|---------------|
//! | Database (unique violation) on insert | `23505` | `AlreadyExists` |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed / Io / other | N/A | `Storage` |
//! | Column decode failure | N/A | `Corrupt` |

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use vendorflow_core::{Job, JobStatus, JobUpdate, RequestId, VendorChannel};

use super::{JobStats, JobStore, JobStoreError, TransitionOutcome};

const SCHEMA: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        request_id      UUID PRIMARY KEY,
        status          TEXT NOT NULL,
        payload         JSONB NOT NULL,
        result          JSONB,
        error           TEXT,
        vendor_channel  TEXT,
        created_at      TIMESTAMPTZ NOT NULL,
        updated_at      TIMESTAMPTZ NOT NULL,
        deadline_at     TIMESTAMPTZ
    )
    "#,
    "CREATE INDEX IF NOT EXISTS jobs_status_idx ON jobs (status)",
    "CREATE INDEX IF NOT EXISTS jobs_created_at_idx ON jobs (created_at)",
    "CREATE INDEX IF NOT EXISTS jobs_deadline_idx ON jobs (deadline_at) WHERE status = 'processing'",
];

const JOB_COLUMNS: &str =
    "request_id, status, payload, result, error, vendor_channel, created_at, updated_at, deadline_at";

/// Postgres-backed job store.
///
/// `PgPool` is internally reference counted; cloning the store shares the pool.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStore {
    /// Create a store over an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect to `database_url` and make sure the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self, JobStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        let store = Self::new(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Create the `jobs` table and its indexes if missing (idempotent).
    pub async fn ensure_schema(&self) -> Result<(), JobStoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    async fn current_status(&self, request_id: RequestId) -> Result<Option<JobStatus>, JobStoreError> {
        let row = sqlx::query("SELECT status FROM jobs WHERE request_id = $1")
            .bind(request_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("current_status", e))?;

        row.map(|r| {
            let status: String = r.try_get("status").map_err(corrupt)?;
            status
                .parse::<JobStatus>()
                .map_err(|e| JobStoreError::Corrupt(e.to_string()))
        })
        .transpose()
    }
}

#[async_trait::async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, job), fields(request_id = %job.request_id), err)]
    async fn create_job(&self, job: Job) -> Result<(), JobStoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (request_id, status, payload, result, error, vendor_channel,
                              created_at, updated_at, deadline_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(job.request_id.as_uuid())
        .bind(job.status.as_str())
        .bind(&job.payload)
        .bind(&job.result)
        .bind(&job.error)
        .bind(job.vendor_channel.map(|c| c.as_str()))
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.deadline_at)
        .execute(&*self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23505") => {
                Err(JobStoreError::AlreadyExists(job.request_id))
            }
            Err(e) => Err(map_sqlx_error("create_job", e)),
        }
    }

    #[instrument(skip_all, fields(request_id = %request_id), err)]
    async fn get_job(&self, request_id: RequestId) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE request_id = $1"))
            .bind(request_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_job", e))?;

        row.as_ref().map(job_from_row).transpose()
    }

    #[instrument(
        skip_all,
        fields(request_id = %request_id, status = %update.status),
        err
    )]
    async fn apply_update(
        &self,
        request_id: RequestId,
        update: &JobUpdate,
    ) -> Result<TransitionOutcome, JobStoreError> {
        let expected: Option<Vec<String>> = update
            .expected
            .as_ref()
            .map(|states| states.iter().map(|s| s.as_str().to_string()).collect());

        // COALESCE keeps the stored value for every field the update leaves out.
        let row = sqlx::query(&format!(
            r#"
            UPDATE jobs SET
                status      = $2,
                updated_at  = GREATEST(updated_at, $3),
                result      = COALESCE($4, result),
                error       = COALESCE($5, error),
                deadline_at = COALESCE($6, deadline_at)
            WHERE request_id = $1
              AND ($7::text[] IS NULL OR status = ANY($7))
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(request_id.as_uuid())
        .bind(update.status.as_str())
        .bind(Utc::now())
        .bind(&update.result)
        .bind(&update.error)
        .bind(update.deadline_at)
        .bind(expected)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("apply_update", e))?;

        if let Some(row) = row {
            return Ok(TransitionOutcome::Applied(job_from_row(&row)?));
        }

        match self.current_status(request_id).await? {
            Some(current) => Ok(TransitionOutcome::Rejected { current }),
            None => Err(JobStoreError::NotFound(request_id)),
        }
    }

    #[instrument(skip(self), err)]
    async fn list_overdue(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Job>, JobStoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE status = 'processing' AND deadline_at < $1
            ORDER BY deadline_at ASC
            LIMIT $2
            "#
        ))
        .bind(now)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_overdue", e))?;

        rows.iter().map(job_from_row).collect()
    }

    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM jobs GROUP BY status")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("stats", e))?;

        let mut stats = JobStats::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(corrupt)?;
            let n: i64 = row.try_get("n").map_err(corrupt)?;
            let status = status
                .parse::<JobStatus>()
                .map_err(|e| JobStoreError::Corrupt(e.to_string()))?;
            stats.record(status, usize::try_from(n).unwrap_or(0));
        }
        Ok(stats)
    }
}

fn job_from_row(row: &PgRow) -> Result<Job, JobStoreError> {
    let request_id: Uuid = row.try_get("request_id").map_err(corrupt)?;
    let status: String = row.try_get("status").map_err(corrupt)?;
    let channel: Option<String> = row.try_get("vendor_channel").map_err(corrupt)?;

    Ok(Job {
        request_id: RequestId::from_uuid(request_id),
        status: status
            .parse::<JobStatus>()
            .map_err(|e| JobStoreError::Corrupt(e.to_string()))?,
        payload: row.try_get::<JsonValue, _>("payload").map_err(corrupt)?,
        result: row.try_get("result").map_err(corrupt)?,
        error: row.try_get("error").map_err(corrupt)?,
        vendor_channel: channel
            .map(|c| c.parse::<VendorChannel>())
            .transpose()
            .map_err(|e| JobStoreError::Corrupt(e.to_string()))?,
        created_at: row.try_get("created_at").map_err(corrupt)?,
        updated_at: row.try_get("updated_at").map_err(corrupt)?,
        deadline_at: row.try_get("deadline_at").map_err(corrupt)?,
    })
}

fn corrupt(err: sqlx::Error) -> JobStoreError {
    JobStoreError::Corrupt(err.to_string())
}

/// Map SQLx errors to `JobStoreError` (see module docs).
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            JobStoreError::Storage(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            JobStoreError::Storage(format!("connection pool closed in {}", operation))
        }
        other => JobStoreError::Storage(format!("{} failed: {}", operation, other)),
    }
}
