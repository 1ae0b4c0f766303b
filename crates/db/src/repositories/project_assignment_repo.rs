//! Repository for the `project_assignments` table (annotator ↔ project bindings).

use quorum_core::assignment::ProjectRole;
use quorum_core::types::DbId;
use sqlx::PgPool;

use crate::models::annotator::{MemberLoad, ProjectAssignment};

/// Column list for `project_assignments` queries.
const COLUMNS: &str = "id, project_id, annotator_id, role, is_active, created_at, updated_at";

/// Provides binding management and per-member load snapshots.
pub struct ProjectAssignmentRepo;

impl ProjectAssignmentRepo {
    /// Bind an annotator to a project.
    ///
    /// Returns `None` when an active binding already exists.
    pub async fn bind(
        pool: &PgPool,
        project_id: DbId,
        annotator_id: DbId,
        role: ProjectRole,
    ) -> Result<Option<ProjectAssignment>, sqlx::Error> {
        let query = format!(
            "INSERT INTO project_assignments (project_id, annotator_id, role) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (project_id, annotator_id) WHERE is_active DO NOTHING \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ProjectAssignment>(&query)
            .bind(project_id)
            .bind(annotator_id)
            .bind(role.as_str())
            .fetch_optional(pool)
            .await
    }

    /// Bind every active annotator not yet bound to the project.
    ///
    /// Returns the number of bindings created.
    pub async fn bind_all_active(pool: &PgPool, project_id: DbId) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO project_assignments (project_id, annotator_id, role) \
             SELECT $1, a.id, $2 FROM annotators a \
             WHERE a.is_active \
             ORDER BY a.id \
             ON CONFLICT (project_id, annotator_id) WHERE is_active DO NOTHING",
        )
        .bind(project_id)
        .bind(ProjectRole::Annotator.as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn find_active(
        pool: &PgPool,
        project_id: DbId,
        annotator_id: DbId,
    ) -> Result<Option<ProjectAssignment>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM project_assignments \
             WHERE project_id = $1 AND annotator_id = $2 AND is_active"
        );
        sqlx::query_as::<_, ProjectAssignment>(&query)
            .bind(project_id)
            .bind(annotator_id)
            .fetch_optional(pool)
            .await
    }

    /// Number of active bindings in a project, any role.
    pub async fn count_active(pool: &PgPool, project_id: DbId) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM project_assignments WHERE project_id = $1 AND is_active",
        )
        .bind(project_id)
        .fetch_one(pool)
        .await
    }

    /// Actively bound, active annotators of the project.
    ///
    /// `active_count` spans every project the annotator works in; the
    /// completion figures are for this project only.
    ///
    /// `recent_days` is the window for the "completed recently" flag.
    pub async fn list_members(
        pool: &PgPool,
        project_id: DbId,
        recent_days: i32,
    ) -> Result<Vec<MemberLoad>, sqlx::Error> {
        sqlx::query_as::<_, MemberLoad>(
            "SELECT a.id AS annotator_id, a.display_name, a.trust_tier, a.quality_score, pa.role, \
                    (SELECT COUNT(*) FROM task_assignments live \
                        WHERE live.annotator_id = a.id \
                          AND live.status IN ('assigned', 'in_progress')) AS active_count, \
                    COALESCE(BOOL_OR(ta.status = 'completed' \
                        AND ta.completed_at >= NOW() - make_interval(days => $2)), FALSE) \
                        AS completed_recently, \
                    COUNT(ta.id) FILTER (WHERE ta.status = 'completed') AS completed_total \
             FROM project_assignments pa \
             JOIN annotators a ON a.id = pa.annotator_id \
             LEFT JOIN task_assignments ta \
                 ON ta.project_id = pa.project_id AND ta.annotator_id = pa.annotator_id \
             WHERE pa.project_id = $1 AND pa.is_active AND a.is_active \
             GROUP BY a.id, a.display_name, a.trust_tier, a.quality_score, pa.role \
             ORDER BY a.id",
        )
        .bind(project_id)
        .bind(recent_days)
        .fetch_all(pool)
        .await
    }
}
