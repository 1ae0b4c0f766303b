//! Repository for the `background_jobs` table (durable job queue).
//!
//! Claiming uses `SELECT ... FOR UPDATE SKIP LOCKED` and never hands out a
//! job whose project already has a `running` job, which serializes all
//! project-scoped work across worker processes. Claims take a short
//! transaction-scoped advisory lock so the "no running job" check and the
//! claim itself cannot interleave between two workers.

use quorum_core::jobs::JobStatus;
use quorum_core::types::DbId;
use sqlx::PgPool;

use crate::models::job::{BackgroundJob, NewJob};

/// Column list for `background_jobs` queries.
const COLUMNS: &str = "\
    id, job_name, queue, project_id, args, status, attempts, max_attempts, \
    last_error, worker_id, run_after, claimed_at, completed_at, created_at, updated_at";

/// Advisory lock key serializing job claims.
const CLAIM_LOCK_KEY: i64 = 0x5155_4f52_554d_0001;

/// Seconds of back-off per failed attempt before a job is retried.
const RETRY_BACKOFF_SECS: f64 = 5.0;

/// Provides enqueue, claim and completion for background jobs.
pub struct JobRepo;

impl JobRepo {
    /// Enqueue a job unless an identical one (same name, project and args) is
    /// already pending.
    ///
    /// Returns `None` when the job was deduplicated.
    pub async fn enqueue(pool: &PgPool, input: &NewJob) -> Result<Option<BackgroundJob>, sqlx::Error> {
        let query = format!(
            "INSERT INTO background_jobs (job_name, queue, queue_rank, project_id, args, max_attempts) \
             SELECT $1, $2, $3, $4, $5, $6 \
             WHERE NOT EXISTS ( \
                 SELECT 1 FROM background_jobs \
                 WHERE job_name = $1 AND project_id IS NOT DISTINCT FROM $4 \
                   AND args = $5 AND status = 'pending' \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, BackgroundJob>(&query)
            .bind(&input.job_name)
            .bind(input.queue.as_str())
            .bind(input.queue.rank())
            .bind(input.project_id)
            .bind(&input.args)
            .bind(input.max_attempts)
            .fetch_optional(pool)
            .await
    }

    /// Atomically claim the next runnable job for `worker_id`.
    ///
    /// Order: queue rank, then due time, then id.
    pub async fn claim_next(
        pool: &PgPool,
        worker_id: &str,
    ) -> Result<Option<BackgroundJob>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(CLAIM_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let query = format!(
            "UPDATE background_jobs \
             SET status = 'running', worker_id = $1, claimed_at = NOW(), \
                 attempts = attempts + 1 \
             WHERE id = ( \
                 SELECT j.id FROM background_jobs j \
                 WHERE j.status = 'pending' AND j.run_after <= NOW() \
                   AND (j.project_id IS NULL OR NOT EXISTS ( \
                       SELECT 1 FROM background_jobs r \
                       WHERE r.project_id = j.project_id AND r.status = 'running')) \
                 ORDER BY j.queue_rank, j.run_after, j.id \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        let job = sqlx::query_as::<_, BackgroundJob>(&query)
            .bind(worker_id)
            .fetch_optional(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(job)
    }

    pub async fn complete(pool: &PgPool, job_id: DbId) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE background_jobs SET status = 'completed', completed_at = NOW(), \
                 last_error = NULL \
             WHERE id = $1",
        )
        .bind(job_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Record a failure. The job returns to `pending` with a back-off while
    /// attempts remain, otherwise it is left `failed`.
    ///
    /// Returns the resulting status.
    pub async fn fail(
        pool: &PgPool,
        job_id: DbId,
        error: &str,
    ) -> Result<JobStatus, sqlx::Error> {
        let status: String = sqlx::query_scalar(
            "UPDATE background_jobs SET \
                 status = CASE WHEN attempts < max_attempts THEN 'pending' ELSE 'failed' END, \
                 run_after = CASE WHEN attempts < max_attempts \
                     THEN NOW() + make_interval(secs => attempts * $3) ELSE run_after END, \
                 completed_at = CASE WHEN attempts < max_attempts THEN NULL ELSE NOW() END, \
                 worker_id = NULL, claimed_at = NULL, last_error = $2 \
             WHERE id = $1 \
             RETURNING status",
        )
        .bind(job_id)
        .bind(error)
        .bind(RETRY_BACKOFF_SECS)
        .fetch_one(pool)
        .await?;
        status.parse().map_err(|e| sqlx::Error::Decode(Box::new(e)))
    }

    /// Mark a job `failed` without further attempts (its input can never
    /// succeed).
    pub async fn abandon(pool: &PgPool, job_id: DbId, error: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE background_jobs SET status = 'failed', completed_at = NOW(), \
                 worker_id = NULL, last_error = $2 \
             WHERE id = $1",
        )
        .bind(job_id)
        .bind(error)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Return `running` jobs claimed more than `older_than_secs` ago to
    /// `pending` (their worker is presumed dead). Returns the count.
    pub async fn requeue_stale(pool: &PgPool, older_than_secs: f64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE background_jobs SET status = 'pending', worker_id = NULL, claimed_at = NULL \
             WHERE status = 'running' AND claimed_at < NOW() - make_interval(secs => $1)",
        )
        .bind(older_than_secs)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<BackgroundJob>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM background_jobs WHERE id = $1");
        sqlx::query_as::<_, BackgroundJob>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Number of jobs waiting to run.
    pub async fn pending_count(pool: &PgPool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM background_jobs WHERE status = 'pending'")
            .fetch_one(pool)
            .await
    }
}
