//! Repository for the `trust_records` table and probe grading writes.

use quorum_core::honeypot::ProbeGrade;
use quorum_core::trust::{update_quality, TierChange, TrustPolicy, TrustStats, TrustTier};
use quorum_core::types::DbId;
use sqlx::PgPool;

use crate::models::trust::{ProbeOutcome, TrustRecord};

/// Column list for `trust_records` queries.
const COLUMNS: &str = "\
    id, annotator_id, total, passed, pass_rate, since_tier_change, \
    last_streak_bonus_total, created_at, updated_at";

/// Provides trust record reads and the atomic probe outcome write.
pub struct TrustRecordRepo;

impl TrustRecordRepo {
    pub async fn find_by_annotator(
        pool: &PgPool,
        annotator_id: DbId,
    ) -> Result<Option<TrustRecord>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM trust_records WHERE annotator_id = $1");
        sqlx::query_as::<_, TrustRecord>(&query)
            .bind(annotator_id)
            .fetch_optional(pool)
            .await
    }

    /// Write everything a graded probe submission changes, in one transaction:
    ///
    /// - the assignment becomes `completed` with `honeypot_passed` set
    /// - the submitted result is stored as an annotation
    /// - the trust record counters and pass rate are updated
    /// - the annotator's quality score and (per `policy`) tier are updated
    ///
    /// Annotator and trust rows are locked for the read-modify-write.
    /// Returns `None` when the assignment is no longer open.
    pub async fn record_probe_outcome(
        pool: &PgPool,
        assignment_id: DbId,
        result: &serde_json::Value,
        grade: ProbeGrade,
        policy: &TrustPolicy,
    ) -> Result<Option<ProbeOutcome>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let closed: Option<(DbId, DbId, DbId)> = sqlx::query_as(
            "UPDATE task_assignments \
             SET status = 'completed', completed_at = NOW(), \
                 is_honeypot = TRUE, honeypot_passed = $2 \
             WHERE id = $1 AND status IN ('assigned', 'in_progress') \
             RETURNING task_id, project_id, annotator_id",
        )
        .bind(assignment_id)
        .bind(grade.passed)
        .fetch_optional(&mut *tx)
        .await?;
        let Some((task_id, project_id, annotator_id)) = closed else {
            return Ok(None);
        };

        let annotation_id: DbId = sqlx::query_scalar(
            "INSERT INTO annotations (task_id, project_id, annotator_id, assignment_id, result) \
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(task_id)
        .bind(project_id)
        .bind(annotator_id)
        .bind(assignment_id)
        .bind(result)
        .fetch_one(&mut *tx)
        .await?;

        let (tier_name, quality): (String, Option<f64>) = sqlx::query_as(
            "SELECT trust_tier, quality_score FROM annotators WHERE id = $1 FOR UPDATE",
        )
        .bind(annotator_id)
        .fetch_one(&mut *tx)
        .await?;
        let tier: TrustTier = tier_name
            .parse()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

        let previous: Option<(i64, i64, i64)> = sqlx::query_as(
            "SELECT total, passed, since_tier_change FROM trust_records \
             WHERE annotator_id = $1 FOR UPDATE",
        )
        .bind(annotator_id)
        .fetch_optional(&mut *tx)
        .await?;
        let previous = previous
            .map(|(total, passed, since_tier_change)| TrustStats {
                total,
                passed,
                since_tier_change,
            })
            .unwrap_or_default();

        let mut stats = previous.record(grade.passed);
        let quality_score = update_quality(quality, grade.passed);
        let tier_change = policy.evaluate(tier, &stats);
        if tier_change != TierChange::Unchanged {
            stats.since_tier_change = 0;
        }
        let trust_tier = tier_change.resulting_tier(tier);

        sqlx::query(
            "INSERT INTO trust_records (annotator_id, total, passed, pass_rate, since_tier_change) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (annotator_id) DO UPDATE SET \
                 total = EXCLUDED.total, passed = EXCLUDED.passed, \
                 pass_rate = EXCLUDED.pass_rate, \
                 since_tier_change = EXCLUDED.since_tier_change",
        )
        .bind(annotator_id)
        .bind(stats.total)
        .bind(stats.passed)
        .bind(stats.pass_rate())
        .bind(stats.since_tier_change)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE annotators SET quality_score = $2, trust_tier = $3 WHERE id = $1")
            .bind(annotator_id)
            .bind(quality_score)
            .bind(trust_tier.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(ProbeOutcome {
            assignment_id,
            annotator_id,
            annotation_id,
            passed: grade.passed,
            similarity: grade.similarity,
            stats,
            quality_score,
            trust_tier,
            tier_change,
        }))
    }
}
