//! Trust record models.

use quorum_core::trust::{TierChange, TrustStats, TrustTier};
use quorum_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `trust_records` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct TrustRecord {
    pub id: DbId,
    pub annotator_id: DbId,
    pub total: i64,
    pub passed: i64,
    pub pass_rate: f64,
    pub since_tier_change: i64,
    /// `total` at the time the last streak bonus was granted.
    pub last_streak_bonus_total: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TrustRecord {
    pub fn stats(&self) -> TrustStats {
        TrustStats {
            total: self.total,
            passed: self.passed,
            since_tier_change: self.since_tier_change,
        }
    }
}

/// Everything written by one graded probe submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeOutcome {
    pub assignment_id: DbId,
    pub annotator_id: DbId,
    pub annotation_id: DbId,
    pub passed: bool,
    pub similarity: f64,
    pub stats: TrustStats,
    pub quality_score: f64,
    pub trust_tier: TrustTier,
    #[serde(skip)]
    pub tier_change: TierChange,
}
