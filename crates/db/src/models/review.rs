//! Expert review models.

use quorum_core::consensus::{ConsolidationMethod, ReviewDecision};
use quorum_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `expert_reviews` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct ExpertReview {
    pub id: DbId,
    pub task_id: DbId,
    pub reviewer_id: DbId,
    #[sqlx(try_from = "String")]
    pub decision: ReviewDecision,
    pub corrected_result: Option<serde_json::Value>,
    pub comment: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for an expert adjudication.
#[derive(Debug, Clone, Deserialize)]
pub struct NewExpertReview {
    pub task_id: DbId,
    pub reviewer_id: DbId,
    pub decision: ReviewDecision,
    pub corrected_result: Option<serde_json::Value>,
    pub comment: Option<String>,
}

/// What the review does to the task, decided before it is written.
#[derive(Debug, Clone, PartialEq)]
pub enum ReviewEffect {
    Finalize {
        result: serde_json::Value,
        method: ConsolidationMethod,
    },
    Reopen,
}
