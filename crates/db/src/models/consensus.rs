//! Task consensus models.

use quorum_core::consensus::{ConsensusStatus, ConsolidationMethod};
use quorum_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `task_consensus` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct TaskConsensus {
    pub id: DbId,
    pub task_id: DbId,
    pub project_id: DbId,
    #[sqlx(try_from = "String")]
    pub status: ConsensusStatus,
    pub consolidated_result: Option<serde_json::Value>,
    pub candidate_result: Option<serde_json::Value>,
    pub agreement_score: f64,
    /// Stored as text; see [`TaskConsensus::method`].
    #[sqlx(rename = "method")]
    #[serde(rename = "method")]
    pub method_name: Option<String>,
    pub annotation_count: i32,
    pub finalized_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TaskConsensus {
    /// Parsed consolidation method, if one was recorded.
    pub fn method(&self) -> Option<ConsolidationMethod> {
        self.method_name.as_deref().and_then(|m| m.parse().ok())
    }
}

/// Values written by a consolidation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsensusUpsert {
    pub task_id: DbId,
    pub project_id: DbId,
    pub status: ConsensusStatus,
    pub consolidated_result: Option<serde_json::Value>,
    pub candidate_result: Option<serde_json::Value>,
    pub agreement_score: f64,
    pub method: Option<ConsolidationMethod>,
    pub annotation_count: i32,
}
