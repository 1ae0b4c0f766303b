//! Repository for the `expert_reviews` table.

use quorum_core::types::DbId;
use sqlx::PgPool;

use crate::models::consensus::TaskConsensus;
use crate::models::review::{ExpertReview, NewExpertReview, ReviewEffect};
use crate::repositories::consensus_repo::COLUMNS as CONSENSUS_COLUMNS;

/// Column list for `expert_reviews` queries.
const COLUMNS: &str =
    "id, task_id, reviewer_id, decision, corrected_result, comment, created_at, updated_at";

/// Provides the atomic expert adjudication write.
pub struct ExpertReviewRepo;

impl ExpertReviewRepo {
    /// Record a review and apply its effect to the task in one transaction.
    ///
    /// `Finalize` moves the consensus record to `finalized` with the given
    /// result. `Reopen` cancels every annotation, expires the completed
    /// assignments and resets the record to `pending`.
    ///
    /// Returns `None` (writing nothing) when the task is not in
    /// `review_required`.
    pub async fn apply(
        pool: &PgPool,
        input: &NewExpertReview,
        effect: &ReviewEffect,
    ) -> Result<Option<(ExpertReview, TaskConsensus)>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let consensus = match effect {
            ReviewEffect::Finalize { result, method } => {
                let query = format!(
                    "UPDATE task_consensus SET status = 'finalized', \
                         consolidated_result = $2, method = $3, finalized_at = NOW() \
                     WHERE task_id = $1 AND status = 'review_required' \
                     RETURNING {CONSENSUS_COLUMNS}"
                );
                sqlx::query_as::<_, TaskConsensus>(&query)
                    .bind(input.task_id)
                    .bind(result)
                    .bind(method.as_str())
                    .fetch_optional(&mut *tx)
                    .await?
            }
            ReviewEffect::Reopen => {
                let query = format!(
                    "UPDATE task_consensus SET status = 'pending', \
                         consolidated_result = NULL, candidate_result = NULL, \
                         agreement_score = 0, method = NULL, annotation_count = 0 \
                     WHERE task_id = $1 AND status = 'review_required' \
                     RETURNING {CONSENSUS_COLUMNS}"
                );
                let reopened = sqlx::query_as::<_, TaskConsensus>(&query)
                    .bind(input.task_id)
                    .fetch_optional(&mut *tx)
                    .await?;
                if reopened.is_some() {
                    sqlx::query(
                        "UPDATE annotations SET is_cancelled = TRUE \
                         WHERE task_id = $1 AND NOT is_cancelled",
                    )
                    .bind(input.task_id)
                    .execute(&mut *tx)
                    .await?;
                    sqlx::query(
                        "UPDATE task_assignments SET status = 'expired' \
                         WHERE task_id = $1 AND status = 'completed'",
                    )
                    .bind(input.task_id)
                    .execute(&mut *tx)
                    .await?;
                }
                reopened
            }
        };
        let Some(consensus) = consensus else {
            return Ok(None);
        };

        let query = format!(
            "INSERT INTO expert_reviews (task_id, reviewer_id, decision, corrected_result, comment) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {COLUMNS}"
        );
        let review = sqlx::query_as::<_, ExpertReview>(&query)
            .bind(input.task_id)
            .bind(input.reviewer_id)
            .bind(input.decision.as_str())
            .bind(&input.corrected_result)
            .bind(&input.comment)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some((review, consensus)))
    }

    pub async fn list_for_task(
        pool: &PgPool,
        task_id: DbId,
    ) -> Result<Vec<ExpertReview>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM expert_reviews WHERE task_id = $1 ORDER BY id");
        sqlx::query_as::<_, ExpertReview>(&query)
            .bind(task_id)
            .fetch_all(pool)
            .await
    }
}
