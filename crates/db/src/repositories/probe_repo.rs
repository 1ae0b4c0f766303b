//! Repository for the `honeypot_probes` table.

use quorum_core::types::DbId;
use sqlx::PgPool;

use crate::models::probe::{HoneypotProbe, NewProbe};
use crate::models::task::{Task, DEFAULT_COMPLEXITY};

/// Column list for `honeypot_probes` queries.
const COLUMNS: &str =
    "id, project_id, task_id, ground_truth, tolerance, is_active, created_at, updated_at";

const TASK_COLUMNS: &str =
    "id, project_id, data, priority, complexity, is_probe, created_at, updated_at";

/// Provides probe creation and selection.
pub struct ProbeRepo;

impl ProbeRepo {
    /// Create a probe task and its ground truth in one transaction.
    pub async fn create(
        pool: &PgPool,
        project_id: DbId,
        input: &NewProbe,
        tolerance: f64,
    ) -> Result<(Task, HoneypotProbe), sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "INSERT INTO tasks (project_id, data, complexity, is_probe) \
             VALUES ($1, $2, $3, TRUE) \
             RETURNING {TASK_COLUMNS}"
        );
        let task = sqlx::query_as::<_, Task>(&query)
            .bind(project_id)
            .bind(&input.data)
            .bind(input.complexity.unwrap_or(DEFAULT_COMPLEXITY))
            .fetch_one(&mut *tx)
            .await?;

        let query = format!(
            "INSERT INTO honeypot_probes (project_id, task_id, ground_truth, tolerance) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        let probe = sqlx::query_as::<_, HoneypotProbe>(&query)
            .bind(project_id)
            .bind(task.id)
            .bind(&input.ground_truth)
            .bind(tolerance)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok((task, probe))
    }

    pub async fn find_by_task(
        pool: &PgPool,
        task_id: DbId,
    ) -> Result<Option<HoneypotProbe>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM honeypot_probes WHERE task_id = $1");
        sqlx::query_as::<_, HoneypotProbe>(&query)
            .bind(task_id)
            .fetch_optional(pool)
            .await
    }

    /// The first active probe the annotator has never been assigned, in any
    /// status.
    pub async fn find_unseen(
        pool: &PgPool,
        project_id: DbId,
        annotator_id: DbId,
    ) -> Result<Option<HoneypotProbe>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM honeypot_probes p \
             WHERE p.project_id = $1 AND p.is_active \
               AND NOT EXISTS (SELECT 1 FROM task_assignments ta \
                   WHERE ta.task_id = p.task_id AND ta.annotator_id = $2) \
             ORDER BY p.id \
             LIMIT 1"
        );
        sqlx::query_as::<_, HoneypotProbe>(&query)
            .bind(project_id)
            .bind(annotator_id)
            .fetch_optional(pool)
            .await
    }

    /// Stop serving a probe. Returns `true` if it was active.
    pub async fn deactivate(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE honeypot_probes SET is_active = FALSE WHERE id = $1 AND is_active")
                .bind(id)
                .execute(pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}
