//! Repository for the `annotators` table.

use quorum_core::leaderboard::apply_streak_bonus;
use quorum_core::trust::{update_quality, TrustTier};
use quorum_core::types::DbId;
use sqlx::PgPool;

use crate::models::annotator::{Annotator, CreateAnnotator};

/// Column list for `annotators` queries.
const COLUMNS: &str =
    "id, display_name, trust_tier, quality_score, is_active, created_at, updated_at";

/// Provides CRUD and quality updates for annotators.
pub struct AnnotatorRepo;

impl AnnotatorRepo {
    pub async fn create(pool: &PgPool, input: &CreateAnnotator) -> Result<Annotator, sqlx::Error> {
        let query = format!(
            "INSERT INTO annotators (display_name, trust_tier, quality_score) \
             VALUES ($1, $2, $3) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Annotator>(&query)
            .bind(&input.display_name)
            .bind(input.trust_tier.unwrap_or(TrustTier::Novice).as_str())
            .bind(input.quality_score)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Annotator>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM annotators WHERE id = $1");
        sqlx::query_as::<_, Annotator>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Fold one agreement outcome into the annotator's quality score.
    ///
    /// The row is locked for the read-modify-write so concurrent feedback
    /// for the same annotator never loses an update. Returns the new score,
    /// or `None` if the annotator does not exist.
    pub async fn apply_quality_feedback(
        pool: &PgPool,
        annotator_id: DbId,
        passed: bool,
    ) -> Result<Option<f64>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let current: Option<Option<f64>> =
            sqlx::query_scalar("SELECT quality_score FROM annotators WHERE id = $1 FOR UPDATE")
                .bind(annotator_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(current) = current else {
            return Ok(None);
        };

        let next = update_quality(current, passed);
        sqlx::query("UPDATE annotators SET quality_score = $2 WHERE id = $1")
            .bind(annotator_id)
            .bind(next)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(next))
    }

    /// Grant one streak bonus, recording the probe total it was granted at.
    ///
    /// `seen_bonus_total` must match the stored `last_streak_bonus_total`;
    /// otherwise another pass already granted this streak and `None` is
    /// returned.
    pub async fn award_streak_bonus(
        pool: &PgPool,
        annotator_id: DbId,
        seen_bonus_total: i64,
        probe_total: i64,
    ) -> Result<Option<f64>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let marked = sqlx::query(
            "UPDATE trust_records SET last_streak_bonus_total = $3 \
             WHERE annotator_id = $1 AND last_streak_bonus_total = $2",
        )
        .bind(annotator_id)
        .bind(seen_bonus_total)
        .bind(probe_total)
        .execute(&mut *tx)
        .await?;
        if marked.rows_affected() == 0 {
            return Ok(None);
        }

        let current: Option<f64> =
            sqlx::query_scalar("SELECT quality_score FROM annotators WHERE id = $1 FOR UPDATE")
                .bind(annotator_id)
                .fetch_one(&mut *tx)
                .await?;
        let next = apply_streak_bonus(current);
        sqlx::query("UPDATE annotators SET quality_score = $2 WHERE id = $1")
            .bind(annotator_id)
            .bind(next)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(next))
    }
}
