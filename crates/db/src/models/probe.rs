//! Honeypot probe models.

use quorum_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `honeypot_probes` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct HoneypotProbe {
    pub id: DbId,
    pub project_id: DbId,
    pub task_id: DbId,
    pub ground_truth: serde_json::Value,
    pub tolerance: f64,
    pub is_active: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for creating a probe together with its task.
#[derive(Debug, Clone, Deserialize)]
pub struct NewProbe {
    pub data: serde_json::Value,
    pub ground_truth: serde_json::Value,
    /// Falls back to the project's default tolerance.
    pub tolerance: Option<f64>,
    pub complexity: Option<f64>,
}
