//! Repository for the `task_assignments` table.
//!
//! Inserts go through `ON CONFLICT ... DO NOTHING` against
//! `uq_task_assignments_live`, so a concurrent duplicate claim on the same
//! (task, annotator) pair is a silent no-op rather than an error.

use quorum_core::assignment::AssignmentStatus;
use quorum_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::assignment::{NewAssignment, StatusCount, TaskAssignment};

/// Column list for `task_assignments` queries.
const COLUMNS: &str = "\
    id, task_id, project_id, annotator_id, status, is_honeypot, honeypot_passed, \
    assigned_at, started_at, completed_at, created_at, updated_at";

const INSERT_LIVE: &str = "\
    INSERT INTO task_assignments (task_id, project_id, annotator_id, is_honeypot) \
    VALUES ($1, $2, $3, $4) \
    ON CONFLICT (task_id, annotator_id) WHERE status <> 'expired' DO NOTHING";

/// Provides assignment creation, transitions and maintenance queries.
pub struct TaskAssignmentRepo;

impl TaskAssignmentRepo {
    /// Create an `assigned` record. Returns `None` if a live one already exists.
    pub async fn create(
        pool: &PgPool,
        input: &NewAssignment,
    ) -> Result<Option<TaskAssignment>, sqlx::Error> {
        let query = format!("{INSERT_LIVE} RETURNING {COLUMNS}");
        sqlx::query_as::<_, TaskAssignment>(&query)
            .bind(input.task_id)
            .bind(input.project_id)
            .bind(input.annotator_id)
            .bind(input.is_honeypot)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_id(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<TaskAssignment>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM task_assignments WHERE id = $1");
        sqlx::query_as::<_, TaskAssignment>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// The non-expired assignment of an annotator on a task, if any.
    pub async fn find_live(
        pool: &PgPool,
        task_id: DbId,
        annotator_id: DbId,
    ) -> Result<Option<TaskAssignment>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM task_assignments \
             WHERE task_id = $1 AND annotator_id = $2 AND status <> 'expired'"
        );
        sqlx::query_as::<_, TaskAssignment>(&query)
            .bind(task_id)
            .bind(annotator_id)
            .fetch_optional(pool)
            .await
    }

    /// Annotators holding a non-expired assignment on a task.
    pub async fn live_annotator_ids(
        pool: &PgPool,
        task_id: DbId,
    ) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT annotator_id FROM task_assignments \
             WHERE task_id = $1 AND status <> 'expired' \
             ORDER BY annotator_id",
        )
        .bind(task_id)
        .fetch_all(pool)
        .await
    }

    /// Move an assignment from `from` to `to`, stamping `started_at` or
    /// `completed_at` as appropriate.
    ///
    /// Returns `None` when the row is no longer in `from` (lost a race).
    pub async fn transition(
        pool: &PgPool,
        id: DbId,
        from: AssignmentStatus,
        to: AssignmentStatus,
    ) -> Result<Option<TaskAssignment>, sqlx::Error> {
        let query = format!(
            "UPDATE task_assignments SET status = $3, \
                 started_at = CASE WHEN $3 = 'in_progress' THEN NOW() ELSE started_at END, \
                 completed_at = CASE WHEN $3 = 'completed' THEN NOW() ELSE completed_at END \
             WHERE id = $1 AND status = $2 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TaskAssignment>(&query)
            .bind(id)
            .bind(from.as_str())
            .bind(to.as_str())
            .fetch_optional(pool)
            .await
    }

    /// Hard-delete an assignment (manual unassign only).
    pub async fn delete(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM task_assignments WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Expire a never-started assignment and hand the task to `to_annotator`
    /// in one transaction.
    ///
    /// Returns `None` (and changes nothing) when the source is no longer
    /// `assigned` or the target already holds a live assignment on the task.
    pub async fn transfer(
        pool: &PgPool,
        id: DbId,
        to_annotator: DbId,
    ) -> Result<Option<TaskAssignment>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let source: Option<(DbId, DbId, bool)> = sqlx::query_as(
            "UPDATE task_assignments SET status = 'expired' \
             WHERE id = $1 AND status = 'assigned' \
             RETURNING task_id, project_id, is_honeypot",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some((task_id, project_id, is_honeypot)) = source else {
            return Ok(None);
        };

        let query = format!("{INSERT_LIVE} RETURNING {COLUMNS}");
        let created = sqlx::query_as::<_, TaskAssignment>(&query)
            .bind(task_id)
            .bind(project_id)
            .bind(to_annotator)
            .bind(is_honeypot)
            .fetch_optional(&mut *tx)
            .await?;

        if created.is_some() {
            tx.commit().await?;
        }
        Ok(created)
    }

    /// Never-started regular assignments older than `cutoff`, oldest first.
    pub async fn list_stale(
        pool: &PgPool,
        project_id: DbId,
        cutoff: Timestamp,
        limit: i64,
    ) -> Result<Vec<TaskAssignment>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM task_assignments \
             WHERE project_id = $1 AND status = 'assigned' AND NOT is_honeypot \
               AND assigned_at < $2 \
             ORDER BY assigned_at, id \
             LIMIT $3"
        );
        sqlx::query_as::<_, TaskAssignment>(&query)
            .bind(project_id)
            .bind(cutoff)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// An annotator's never-started regular assignments, newest first.
    pub async fn list_unstarted(
        pool: &PgPool,
        project_id: DbId,
        annotator_id: DbId,
        limit: i64,
    ) -> Result<Vec<TaskAssignment>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM task_assignments \
             WHERE project_id = $1 AND annotator_id = $2 \
               AND status = 'assigned' AND NOT is_honeypot \
             ORDER BY assigned_at DESC, id DESC \
             LIMIT $3"
        );
        sqlx::query_as::<_, TaskAssignment>(&query)
            .bind(project_id)
            .bind(annotator_id)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// The annotator's oldest open (assigned or in-progress) assignment.
    pub async fn oldest_open(
        pool: &PgPool,
        project_id: DbId,
        annotator_id: DbId,
    ) -> Result<Option<TaskAssignment>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM task_assignments \
             WHERE project_id = $1 AND annotator_id = $2 \
               AND status IN ('assigned', 'in_progress') \
             ORDER BY assigned_at, id \
             LIMIT 1"
        );
        sqlx::query_as::<_, TaskAssignment>(&query)
            .bind(project_id)
            .bind(annotator_id)
            .fetch_optional(pool)
            .await
    }

    /// Regular assignments created since the annotator's latest probe.
    ///
    /// `None` when the annotator has never been served a probe in the project.
    pub async fn tasks_since_last_probe(
        pool: &PgPool,
        project_id: DbId,
        annotator_id: DbId,
    ) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT CASE WHEN lp.last_id IS NULL THEN NULL ELSE ( \
                 SELECT COUNT(*) FROM task_assignments r \
                 WHERE r.project_id = $1 AND r.annotator_id = $2 \
                   AND NOT r.is_honeypot AND r.id > lp.last_id \
             ) END \
             FROM (SELECT MAX(id) AS last_id FROM task_assignments \
                   WHERE project_id = $1 AND annotator_id = $2 AND is_honeypot) lp",
        )
        .bind(project_id)
        .bind(annotator_id)
        .fetch_one(pool)
        .await
    }

    /// Latest graded probe outcomes of an annotator, newest first.
    pub async fn recent_probe_outcomes(
        pool: &PgPool,
        annotator_id: DbId,
        limit: i64,
    ) -> Result<Vec<bool>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT honeypot_passed FROM task_assignments \
             WHERE annotator_id = $1 AND is_honeypot AND honeypot_passed IS NOT NULL \
             ORDER BY completed_at DESC NULLS LAST, id DESC \
             LIMIT $2",
        )
        .bind(annotator_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Assignment counts per status for a project.
    pub async fn status_counts(
        pool: &PgPool,
        project_id: DbId,
    ) -> Result<Vec<StatusCount>, sqlx::Error> {
        sqlx::query_as::<_, StatusCount>(
            "SELECT status, COUNT(*) AS count FROM task_assignments \
             WHERE project_id = $1 GROUP BY status ORDER BY status",
        )
        .bind(project_id)
        .fetch_all(pool)
        .await
    }
}
