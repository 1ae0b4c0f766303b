//! Task assignment models.

use quorum_core::assignment::AssignmentStatus;
use quorum_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `task_assignments` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct TaskAssignment {
    pub id: DbId,
    pub task_id: DbId,
    pub project_id: DbId,
    pub annotator_id: DbId,
    #[sqlx(try_from = "String")]
    pub status: AssignmentStatus,
    pub is_honeypot: bool,
    pub honeypot_passed: Option<bool>,
    pub assigned_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for creating an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewAssignment {
    pub task_id: DbId,
    pub project_id: DbId,
    pub annotator_id: DbId,
    pub is_honeypot: bool,
}

/// Number of assignments in one status.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}
