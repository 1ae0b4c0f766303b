//! Repository for the `task_consensus` table.

use quorum_core::consensus::ConsensusStatus;
use quorum_core::types::DbId;
use sqlx::PgPool;

use crate::models::assignment::StatusCount;
use crate::models::consensus::{ConsensusUpsert, TaskConsensus};

/// Column list for `task_consensus` queries.
pub(crate) const COLUMNS: &str = "\
    id, task_id, project_id, status, consolidated_result, candidate_result, \
    agreement_score, method, annotation_count, finalized_at, created_at, updated_at";

/// Provides consensus record reads and writes.
pub struct ConsensusRepo;

impl ConsensusRepo {
    pub async fn find_by_task(
        pool: &PgPool,
        task_id: DbId,
    ) -> Result<Option<TaskConsensus>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM task_consensus WHERE task_id = $1");
        sqlx::query_as::<_, TaskConsensus>(&query)
            .bind(task_id)
            .fetch_optional(pool)
            .await
    }

    /// Create or refresh the consensus record of a task.
    ///
    /// Settled records (`review_required`, `finalized`) are never
    /// overwritten; in that case `None` is returned.
    pub async fn upsert(
        pool: &PgPool,
        input: &ConsensusUpsert,
    ) -> Result<Option<TaskConsensus>, sqlx::Error> {
        let query = format!(
            "INSERT INTO task_consensus \
                 (task_id, project_id, status, consolidated_result, candidate_result, \
                  agreement_score, method, annotation_count) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (task_id) DO UPDATE SET \
                 status = EXCLUDED.status, \
                 consolidated_result = EXCLUDED.consolidated_result, \
                 candidate_result = EXCLUDED.candidate_result, \
                 agreement_score = EXCLUDED.agreement_score, \
                 method = EXCLUDED.method, \
                 annotation_count = EXCLUDED.annotation_count \
             WHERE task_consensus.status NOT IN ('review_required', 'finalized') \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TaskConsensus>(&query)
            .bind(input.task_id)
            .bind(input.project_id)
            .bind(input.status.as_str())
            .bind(&input.consolidated_result)
            .bind(&input.candidate_result)
            .bind(input.agreement_score)
            .bind(input.method.map(|m| m.as_str()))
            .bind(input.annotation_count)
            .fetch_optional(pool)
            .await
    }

    /// `consensus_reached -> finalized`. Returns `None` if the record is in
    /// any other status.
    pub async fn finalize_reached(
        pool: &PgPool,
        task_id: DbId,
    ) -> Result<Option<TaskConsensus>, sqlx::Error> {
        let query = format!(
            "UPDATE task_consensus SET status = 'finalized', finalized_at = NOW() \
             WHERE task_id = $1 AND status = 'consensus_reached' \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TaskConsensus>(&query)
            .bind(task_id)
            .fetch_optional(pool)
            .await
    }

    /// Records of a project in one status, oldest first.
    pub async fn list_by_status(
        pool: &PgPool,
        project_id: DbId,
        status: ConsensusStatus,
        limit: i64,
    ) -> Result<Vec<TaskConsensus>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM task_consensus \
             WHERE project_id = $1 AND status = $2 \
             ORDER BY task_id \
             LIMIT $3"
        );
        sqlx::query_as::<_, TaskConsensus>(&query)
            .bind(project_id)
            .bind(status.as_str())
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    pub async fn status_counts(
        pool: &PgPool,
        project_id: DbId,
    ) -> Result<Vec<StatusCount>, sqlx::Error> {
        sqlx::query_as::<_, StatusCount>(
            "SELECT status, COUNT(*) AS count FROM task_consensus \
             WHERE project_id = $1 GROUP BY status ORDER BY status",
        )
        .bind(project_id)
        .fetch_all(pool)
        .await
    }
}
