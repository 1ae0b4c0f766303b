//! Repository for the `tasks` table.
//!
//! Assignment and annotation counts are computed on read, never stored.

use quorum_core::types::DbId;
use sqlx::PgPool;

use crate::models::task::{NewTask, Task, TaskCoverage, TaskCursor, TaskLoad, DEFAULT_COMPLEXITY};

/// Column list for `tasks` queries.
const COLUMNS: &str = "id, project_id, data, priority, complexity, is_probe, created_at, updated_at";

/// Select list producing a [`TaskLoad`] from alias `t`.
const LOAD_COLUMNS: &str = "\
    t.id, t.priority, t.complexity, \
    (SELECT COUNT(*) FROM task_assignments ta \
        WHERE ta.task_id = t.id AND ta.status <> 'expired') AS live_assignments, \
    (SELECT COUNT(*) FROM annotations an \
        WHERE an.task_id = t.id AND NOT an.is_cancelled) AS annotation_count";

/// Provides task import and allocator-facing reads.
pub struct TaskRepo;

impl TaskRepo {
    /// Insert a batch of regular tasks in one transaction, returning their IDs
    /// in input order.
    pub async fn insert_many(
        pool: &PgPool,
        project_id: DbId,
        tasks: &[NewTask],
    ) -> Result<Vec<DbId>, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let mut ids = Vec::with_capacity(tasks.len());

        for task in tasks {
            let id: DbId = sqlx::query_scalar(
                "INSERT INTO tasks (project_id, data, priority, complexity) \
                 VALUES ($1, $2, $3, $4) RETURNING id",
            )
            .bind(project_id)
            .bind(&task.data)
            .bind(task.priority.unwrap_or(0))
            .bind(task.complexity.unwrap_or(DEFAULT_COMPLEXITY))
            .fetch_one(&mut *tx)
            .await?;
            ids.push(id);
        }

        tx.commit().await?;
        Ok(ids)
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Task>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM tasks WHERE id = $1");
        sqlx::query_as::<_, Task>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_load(pool: &PgPool, id: DbId) -> Result<Option<TaskLoad>, sqlx::Error> {
        let query = format!("SELECT {LOAD_COLUMNS} FROM tasks t WHERE t.id = $1");
        sqlx::query_as::<_, TaskLoad>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// One keyset page of regular tasks in `(priority DESC, id ASC)` order.
    pub async fn list_regular_page(
        pool: &PgPool,
        project_id: DbId,
        after: Option<TaskCursor>,
        limit: i64,
    ) -> Result<Vec<TaskLoad>, sqlx::Error> {
        let query = format!(
            "SELECT {LOAD_COLUMNS} FROM tasks t \
             WHERE t.project_id = $1 AND NOT t.is_probe \
               AND ($2::INTEGER IS NULL OR t.priority < $2 \
                    OR (t.priority = $2 AND t.id > $3::BIGINT)) \
             ORDER BY t.priority DESC, t.id ASC \
             LIMIT $4"
        );
        sqlx::query_as::<_, TaskLoad>(&query)
            .bind(project_id)
            .bind(after.map(|c| c.priority))
            .bind(after.map(|c| c.id))
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Regular tasks with fewer than `overlap` live assignments that
    /// `annotator_id` has never been assigned, in allocation order.
    pub async fn list_open_for_annotator(
        pool: &PgPool,
        project_id: DbId,
        annotator_id: DbId,
        overlap: i64,
        limit: i64,
    ) -> Result<Vec<TaskLoad>, sqlx::Error> {
        let query = format!(
            "SELECT * FROM ( \
                 SELECT {LOAD_COLUMNS} FROM tasks t \
                 WHERE t.project_id = $1 AND NOT t.is_probe \
                   AND NOT EXISTS (SELECT 1 FROM task_assignments mine \
                       WHERE mine.task_id = t.id AND mine.annotator_id = $2 \
                         AND mine.status <> 'expired') \
             ) open_tasks \
             WHERE live_assignments < $3 \
             ORDER BY priority DESC, id ASC \
             LIMIT $4"
        );
        sqlx::query_as::<_, TaskLoad>(&query)
            .bind(project_id)
            .bind(annotator_id)
            .bind(overlap)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Coverage of the project's regular tasks against `overlap`.
    pub async fn coverage(
        pool: &PgPool,
        project_id: DbId,
        overlap: i64,
    ) -> Result<TaskCoverage, sqlx::Error> {
        sqlx::query_as::<_, TaskCoverage>(
            "SELECT COUNT(*) AS total_tasks, \
                    COUNT(*) FILTER (WHERE live >= $2) AS fully_assigned, \
                    COUNT(*) FILTER (WHERE live > 0 AND live < $2) AS partially_assigned, \
                    COUNT(*) FILTER (WHERE live = 0) AS unassigned \
             FROM ( \
                 SELECT (SELECT COUNT(*) FROM task_assignments ta \
                         WHERE ta.task_id = t.id AND ta.status <> 'expired') AS live \
                 FROM tasks t \
                 WHERE t.project_id = $1 AND NOT t.is_probe \
             ) counts",
        )
        .bind(project_id)
        .bind(overlap)
        .fetch_one(pool)
        .await
    }
}
