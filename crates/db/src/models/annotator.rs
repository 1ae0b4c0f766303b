//! Annotator identity, project bindings and per-project load snapshots.

use quorum_core::assignment::ProjectRole;
use quorum_core::trust::TrustTier;
use quorum_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `annotators` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Annotator {
    pub id: DbId,
    pub display_name: String,
    #[sqlx(try_from = "String")]
    pub trust_tier: TrustTier,
    pub quality_score: Option<f64>,
    pub is_active: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for registering an annotator.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateAnnotator {
    pub display_name: String,
    pub trust_tier: Option<TrustTier>,
    pub quality_score: Option<f64>,
}

/// A row from the `project_assignments` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ProjectAssignment {
    pub id: DbId,
    pub project_id: DbId,
    pub annotator_id: DbId,
    #[sqlx(try_from = "String")]
    pub role: ProjectRole,
    pub is_active: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// An actively bound annotator together with their load in the project.
///
/// Computed by a single query; this is the input to overlap calculation,
/// scoring and the leaderboard.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct MemberLoad {
    pub annotator_id: DbId,
    pub display_name: String,
    #[sqlx(try_from = "String")]
    pub trust_tier: TrustTier,
    pub quality_score: Option<f64>,
    #[sqlx(try_from = "String")]
    pub role: ProjectRole,
    /// Assignments in `assigned` or `in_progress`, across every project.
    pub active_count: i64,
    /// At least one completion in the recent-activity window.
    pub completed_recently: bool,
    /// All completed assignments in the project.
    pub completed_total: i64,
}
