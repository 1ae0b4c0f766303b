//! Durable background job models.

use quorum_core::jobs::{JobQueueName, JobStatus};
use quorum_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `background_jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BackgroundJob {
    pub id: DbId,
    /// Kept as text so a job written by a newer release still loads.
    pub job_name: String,
    #[sqlx(try_from = "String")]
    pub queue: JobQueueName,
    pub project_id: Option<DbId>,
    pub args: serde_json::Value,
    #[sqlx(try_from = "String")]
    pub status: JobStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub worker_id: Option<String>,
    pub run_after: Timestamp,
    pub claimed_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for enqueueing a job.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub job_name: String,
    pub queue: JobQueueName,
    pub project_id: Option<DbId>,
    pub args: serde_json::Value,
    pub max_attempts: i32,
}
