use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::job::{JobId, JobRow, JobStatus};
use crate::store::{JobStore, ReapOutcome, StatusCounts};

const JOB_COLUMNS: &str =
    "id, created_at, updated_at, scheduled_for, failed_attempts, status, message_type, message";

/// PostgreSQL-backed job store.
///
/// All state lives in the `quay_job` table. Claims lock candidate rows with
/// `FOR UPDATE SKIP LOCKED` so concurrent workers, in this process or any
/// other, never receive the same job and never block on each other.
#[derive(Clone, Debug)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    /// Create a store over an existing pool. Call [`migrate`](Self::migrate)
    /// once before first use if the schema is not managed elsewhere.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        debug!("quay_job schema up to date");
        Ok(())
    }

    fn row_to_job(row: &PgRow) -> Result<JobRow, StoreError> {
        let status: i16 = row.try_get("status")?;
        let status = JobStatus::try_from(status)
            .map_err(|raw| StoreError::corrupt(format!("invalid status value: {raw}")))?;
        let failed_attempts: i32 = row.try_get("failed_attempts")?;
        let failed_attempts = u32::try_from(failed_attempts).map_err(|_| {
            StoreError::corrupt(format!("negative failed_attempts: {failed_attempts}"))
        })?;

        Ok(JobRow {
            id: JobId(row.try_get::<Uuid, _>("id")?),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            scheduled_for: row.try_get("scheduled_for")?,
            failed_attempts,
            status,
            message_type: row.try_get("message_type")?,
            message: row.try_get("message")?,
        })
    }

    /// Move a claimed row that cannot be mapped into `Failed`. If even that
    /// fails the row stays `Running` for a stale sweep.
    async fn fail_unmappable(&self, row: &PgRow, err: &StoreError, now: DateTime<Utc>) {
        let id = match row.try_get::<Uuid, _>("id") {
            Ok(id) => JobId(id),
            Err(id_err) => {
                error!(error = %err, "claimed row has no readable id: {id_err}");
                return;
            }
        };
        error!(job_id = %id, error = %err, "claimed row could not be mapped; marking failed");
        if let Err(mark_err) = self.mark_failed(id, now).await {
            crate::telemetry::record_stranded_job(id.to_string(), "mark_failed", &mark_err);
        }
    }

    fn status_from_row(row: &PgRow) -> Result<JobStatus, StoreError> {
        let raw: i16 = row.try_get("status")?;
        JobStatus::try_from(raw)
            .map_err(|raw| StoreError::corrupt(format!("invalid status value: {raw}")))
    }
}

fn attempts_to_i32(max_attempts: u32) -> i32 {
    i32::try_from(max_attempts).unwrap_or(i32::MAX)
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn insert(&self, row: &JobRow) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO quay_job (
                id, created_at, updated_at, scheduled_for,
                failed_attempts, status, message_type, message
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(row.id.0)
        .bind(row.created_at)
        .bind(row.updated_at)
        .bind(row.scheduled_for)
        .bind(attempts_to_i32(row.failed_attempts))
        .bind(row.status.as_i16())
        .bind(&row.message_type)
        .bind(&row.message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn claim(
        &self,
        limit: usize,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobRow>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(&format!(
            r#"
            UPDATE quay_job
            SET status = 2,
                updated_at = $1
            WHERE id IN (
                SELECT id
                FROM quay_job
                WHERE status = 1
                  AND scheduled_for <= $1
                  AND failed_attempts < $2
                ORDER BY scheduled_for, id
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(now)
        .bind(attempts_to_i32(max_attempts))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        // Every returned row is already Running; a bad row is failed on its own.
        let mut jobs = Vec::with_capacity(rows.len());
        for row in &rows {
            match Self::row_to_job(row) {
                Ok(job) => jobs.push(job),
                Err(err) => self.fail_unmappable(row, &err, now).await,
            }
        }
        // RETURNING carries no ordering guarantee.
        jobs.sort_by(|a, b| a.scheduled_for.cmp(&b.scheduled_for).then(a.id.cmp(&b.id)));
        Ok(jobs)
    }

    async fn delete(&self, id: JobId) -> Result<bool, StoreError> {
        let res = sqlx::query("DELETE FROM quay_job WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn fail(
        &self,
        id: JobId,
        max_attempts: u32,
        retry_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Option<JobStatus>, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE quay_job
            SET failed_attempts = failed_attempts + 1,
                status = CASE WHEN failed_attempts + 1 < $2 THEN 1 ELSE 3 END,
                scheduled_for = CASE
                    WHEN failed_attempts + 1 < $2 THEN COALESCE($3, scheduled_for)
                    ELSE scheduled_for
                END,
                updated_at = $4
            WHERE id = $1
            RETURNING status
            "#,
        )
        .bind(id.0)
        .bind(attempts_to_i32(max_attempts))
        .bind(retry_at)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Self::status_from_row(&row)?)),
            None => {
                debug!(job_id = %id, "fail on missing job ignored");
                Ok(None)
            }
        }
    }

    async fn mark_failed(&self, id: JobId, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let res = sqlx::query("UPDATE quay_job SET status = 3, updated_at = $2 WHERE id = $1")
            .bind(id.0)
            .bind(now)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            warn!(job_id = %id, "mark_failed found no job");
        }
        Ok(res.rows_affected() > 0)
    }

    async fn clear(&self) -> Result<u64, StoreError> {
        let res = sqlx::query("DELETE FROM quay_job")
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRow>, StoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM quay_job WHERE id = $1"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn counts(&self) -> Result<StatusCounts, StoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM quay_job GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = StatusCounts::default();
        for row in &rows {
            let status = Self::status_from_row(row)?;
            let n: i64 = row.try_get("n")?;
            counts.add(status, n.max(0) as u64);
        }
        Ok(counts)
    }

    async fn requeue_stale(
        &self,
        stale_before: DateTime<Utc>,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<ReapOutcome, StoreError> {
        let rows = sqlx::query(
            r#"
            WITH stale AS (
                SELECT id
                FROM quay_job
                WHERE status = 2
                  AND updated_at < $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE quay_job j
            SET failed_attempts = j.failed_attempts + 1,
                status = CASE WHEN j.failed_attempts + 1 < $2 THEN 1 ELSE 3 END,
                updated_at = $3
            FROM stale
            WHERE j.id = stale.id
            RETURNING j.status
            "#,
        )
        .bind(stale_before)
        .bind(attempts_to_i32(max_attempts))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let mut outcome = ReapOutcome::default();
        for row in &rows {
            match Self::status_from_row(row)? {
                JobStatus::Failed => outcome.failed += 1,
                _ => outcome.requeued += 1,
            }
        }
        Ok(outcome)
    }
}
