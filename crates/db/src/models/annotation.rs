//! Annotation models.

use quorum_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `annotations` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct Annotation {
    pub id: DbId,
    pub task_id: DbId,
    pub project_id: DbId,
    pub annotator_id: DbId,
    pub assignment_id: Option<DbId>,
    pub result: serde_json::Value,
    pub is_cancelled: bool,
    pub is_ground_truth: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A non-cancelled annotation joined with its author's quality score.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct VoteRow {
    pub annotation_id: DbId,
    pub annotator_id: DbId,
    pub result: serde_json::Value,
    pub quality_score: Option<f64>,
}

/// The completed assignment and the annotation written by one submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmittedAnnotation {
    pub assignment: crate::models::assignment::TaskAssignment,
    pub annotation: Annotation,
}
