//! The job queue seam.
//!
//! Domain events (`task_created`, `annotator_joined`, `assignment_completed`)
//! and deferred allocation passes are handed to a [`JobQueue`] after the
//! triggering write commits; the worker executes them.

use std::sync::Mutex;

use async_trait::async_trait;
use quorum_core::jobs::{JobName, JobQueueName, DEFAULT_MAX_ATTEMPTS};
use quorum_core::types::DbId;
use quorum_db::models::job::NewJob;
use quorum_db::repositories::JobRepo;
use quorum_db::DbPool;

use crate::error::EngineResult;

/// A job to enqueue.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub job_name: JobName,
    pub queue: JobQueueName,
    pub project_id: Option<DbId>,
    pub args: serde_json::Value,
}

impl JobRequest {
    /// A job on its name's default queue with empty arguments.
    pub fn new(job_name: JobName) -> Self {
        Self {
            job_name,
            queue: job_name.default_queue(),
            project_id: None,
            args: serde_json::json!({}),
        }
    }

    pub fn for_project(mut self, project_id: DbId) -> Self {
        self.project_id = Some(project_id);
        self
    }

    pub fn with_args(mut self, args: serde_json::Value) -> Self {
        self.args = args;
        self
    }

    pub fn on_queue(mut self, queue: JobQueueName) -> Self {
        self.queue = queue;
        self
    }
}

/// Destination for background jobs.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job. Returns `false` when an identical job is already pending.
    async fn enqueue(&self, request: JobRequest) -> EngineResult<bool>;
}

// ---------------------------------------------------------------------------
// PostgreSQL
// ---------------------------------------------------------------------------

/// Durable queue on the `background_jobs` table.
pub struct PgJobQueue {
    pool: DbPool,
}

impl PgJobQueue {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, request: JobRequest) -> EngineResult<bool> {
        let job = JobRepo::enqueue(
            &self.pool,
            &NewJob {
                job_name: request.job_name.as_str().to_string(),
                queue: request.queue,
                project_id: request.project_id,
                args: request.args,
                max_attempts: DEFAULT_MAX_ATTEMPTS,
            },
        )
        .await?;
        if let Some(job) = &job {
            tracing::debug!(job_id = job.id, job_name = %job.job_name, "Job enqueued");
        }
        Ok(job.is_some())
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// In-process queue that records jobs for inspection.
#[derive(Default)]
pub struct MemoryJobQueue {
    pending: Mutex<Vec<JobRequest>>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs currently pending, in enqueue order.
    pub fn pending(&self) -> Vec<JobRequest> {
        self.pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Remove and return every pending job.
    pub fn drain(&self) -> Vec<JobRequest> {
        std::mem::take(&mut *self.pending.lock().unwrap_or_else(|p| p.into_inner()))
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, request: JobRequest) -> EngineResult<bool> {
        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        let duplicate = pending.iter().any(|p| {
            p.job_name == request.job_name
                && p.project_id == request.project_id
                && p.args == request.args
        });
        if duplicate {
            return Ok(false);
        }
        pending.push(request);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn memory_queue_deduplicates_pending() {
        let queue = MemoryJobQueue::new();
        let req = JobRequest::new(JobName::AssignProjectTasks).for_project(1);
        assert!(queue.enqueue(req.clone()).await.unwrap());
        assert!(!queue.enqueue(req).await.unwrap());
        assert_eq!(queue.pending().len(), 1);
    }

    #[tokio::test]
    async fn different_args_are_distinct_jobs() {
        let queue = MemoryJobQueue::new();
        let base = JobRequest::new(JobName::TaskCreated).for_project(1);
        queue.enqueue(base.clone().with_args(json!({"task_id": 1}))).await.unwrap();
        queue.enqueue(base.with_args(json!({"task_id": 2}))).await.unwrap();
        assert_eq!(queue.drain().len(), 2);
        assert!(queue.pending().is_empty());
    }

    #[test]
    fn request_uses_default_queue() {
        let req = JobRequest::new(JobName::AssignmentCompleted);
        assert_eq!(req.queue, JobQueueName::Critical);
    }
}
