//! Task models.

use quorum_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Complexity assumed for tasks imported without one.
pub const DEFAULT_COMPLEXITY: f64 = 50.0;

/// A row from the `tasks` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Task {
    pub id: DbId,
    pub project_id: DbId,
    pub data: serde_json::Value,
    pub priority: i32,
    pub complexity: f64,
    /// Probe tasks are never handed out by the allocator.
    pub is_probe: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for importing a task.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTask {
    pub data: serde_json::Value,
    pub priority: Option<i32>,
    pub complexity: Option<f64>,
}

/// A regular task with its live counters, as seen by the allocator.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct TaskLoad {
    pub id: DbId,
    pub priority: i32,
    pub complexity: f64,
    /// Non-expired assignments.
    pub live_assignments: i64,
    /// Non-cancelled annotations.
    pub annotation_count: i64,
}

/// Keyset cursor over `(priority DESC, id ASC)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskCursor {
    pub priority: i32,
    pub id: DbId,
}

impl TaskLoad {
    pub fn cursor(&self) -> TaskCursor {
        TaskCursor {
            priority: self.priority,
            id: self.id,
        }
    }
}

/// Coverage of a project's regular tasks against a target overlap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromRow, Serialize)]
pub struct TaskCoverage {
    pub total_tasks: i64,
    pub fully_assigned: i64,
    pub partially_assigned: i64,
    pub unassigned: i64,
}
