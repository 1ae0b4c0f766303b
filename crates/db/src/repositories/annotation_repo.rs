//! Repository for the `annotations` table.

use quorum_core::types::DbId;
use sqlx::PgPool;

use crate::models::annotation::{Annotation, SubmittedAnnotation, VoteRow};
use crate::models::assignment::TaskAssignment;

/// Column list for `annotations` queries.
pub(crate) const COLUMNS: &str = "\
    id, task_id, project_id, annotator_id, assignment_id, result, \
    is_cancelled, is_ground_truth, created_at, updated_at";

/// Column list for the assignment returned by a submission.
const ASSIGNMENT_COLUMNS: &str = "\
    id, task_id, project_id, annotator_id, status, is_honeypot, honeypot_passed, \
    assigned_at, started_at, completed_at, created_at, updated_at";

/// Provides annotation writes and consolidation reads.
pub struct AnnotationRepo;

impl AnnotationRepo {
    /// Complete an open assignment and store its annotation atomically.
    ///
    /// Returns `None` when the assignment is not open (already completed,
    /// expired, or missing).
    pub async fn submit(
        pool: &PgPool,
        assignment_id: DbId,
        result: &serde_json::Value,
    ) -> Result<Option<SubmittedAnnotation>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "UPDATE task_assignments SET status = 'completed', completed_at = NOW() \
             WHERE id = $1 AND status IN ('assigned', 'in_progress') \
             RETURNING {ASSIGNMENT_COLUMNS}"
        );
        let assignment = sqlx::query_as::<_, TaskAssignment>(&query)
            .bind(assignment_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(assignment) = assignment else {
            return Ok(None);
        };

        let query = format!(
            "INSERT INTO annotations (task_id, project_id, annotator_id, assignment_id, result) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {COLUMNS}"
        );
        let annotation = sqlx::query_as::<_, Annotation>(&query)
            .bind(assignment.task_id)
            .bind(assignment.project_id)
            .bind(assignment.annotator_id)
            .bind(assignment.id)
            .bind(result)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(SubmittedAnnotation {
            assignment,
            annotation,
        }))
    }

    /// Non-cancelled annotations of a task with their authors' quality,
    /// in annotation id order.
    pub async fn list_votes(pool: &PgPool, task_id: DbId) -> Result<Vec<VoteRow>, sqlx::Error> {
        sqlx::query_as::<_, VoteRow>(
            "SELECT an.id AS annotation_id, an.annotator_id, an.result, a.quality_score \
             FROM annotations an \
             JOIN annotators a ON a.id = an.annotator_id \
             WHERE an.task_id = $1 AND NOT an.is_cancelled \
             ORDER BY an.id",
        )
        .bind(task_id)
        .fetch_all(pool)
        .await
    }

    pub async fn list_for_task(
        pool: &PgPool,
        task_id: DbId,
    ) -> Result<Vec<Annotation>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM annotations WHERE task_id = $1 ORDER BY id");
        sqlx::query_as::<_, Annotation>(&query)
            .bind(task_id)
            .fetch_all(pool)
            .await
    }
}
