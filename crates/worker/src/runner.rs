//! Job runners pulling from the durable `background_jobs` queue.
//!
//! Each runner claims one job at a time, dispatches it to the engine and
//! records the outcome. Project serialization across runners (and across
//! worker processes) comes from `JobRepo::claim_next`, which never hands out
//! a job for a project that already has one running.

use std::sync::Arc;
use std::time::Duration;

use quorum_db::models::job::BackgroundJob;
use quorum_db::repositories::JobRepo;
use quorum_db::DbPool;
use quorum_engine::Engine;
use tokio_util::sync::CancellationToken;

use crate::dispatch::dispatch;

pub struct JobRunner {
    pool: DbPool,
    engine: Arc<Engine>,
    worker_id: String,
    poll_interval: Duration,
}

impl JobRunner {
    pub fn new(pool: DbPool, engine: Arc<Engine>, worker_id: String, poll_interval: Duration) -> Self {
        Self {
            pool,
            engine,
            worker_id,
            poll_interval,
        }
    }

    /// Claim and run jobs until `cancel` is triggered. A job already
    /// executing when cancellation arrives runs to completion.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(worker_id = %self.worker_id, "Job runner started");

        loop {
            if cancel.is_cancelled() {
                break;
            }
            match JobRepo::claim_next(&self.pool, &self.worker_id).await {
                Ok(Some(job)) => self.execute(job).await,
                Ok(None) => {
                    if !self.idle(&cancel).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(worker_id = %self.worker_id, error = %e, "Failed to claim job");
                    if !self.idle(&cancel).await {
                        break;
                    }
                }
            }
        }

        tracing::info!(worker_id = %self.worker_id, "Job runner stopping");
    }

    /// Wait one poll interval. Returns `false` when cancelled meanwhile.
    async fn idle(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.poll_interval) => true,
        }
    }

    async fn execute(&self, job: BackgroundJob) {
        tracing::debug!(
            job_id = job.id,
            job_name = %job.job_name,
            project_id = job.project_id,
            attempt = job.attempts,
            "Job claimed"
        );

        match dispatch(&self.engine, &job.job_name, job.project_id, &job.args).await {
            Ok(summary) => {
                tracing::info!(job_id = job.id, job_name = %job.job_name, %summary, "Job completed");
                if let Err(e) = JobRepo::complete(&self.pool, job.id).await {
                    tracing::error!(job_id = job.id, error = %e, "Failed to mark job completed");
                }
            }
            Err(err) if err.is_retryable() => {
                tracing::error!(job_id = job.id, job_name = %job.job_name, error = %err, "Job failed");
                match JobRepo::fail(&self.pool, job.id, &err.to_string()).await {
                    Ok(status) => {
                        tracing::debug!(job_id = job.id, %status, "Job failure recorded");
                    }
                    Err(e) => {
                        tracing::error!(job_id = job.id, error = %e, "Failed to record job failure");
                    }
                }
            }
            Err(err) => {
                tracing::warn!(job_id = job.id, job_name = %job.job_name, error = %err, "Job rejected");
                if let Err(e) = JobRepo::abandon(&self.pool, job.id, &err.to_string()).await {
                    tracing::error!(job_id = job.id, error = %e, "Failed to record job failure");
                }
            }
        }
    }
}
