//! Repository for the `project_assignment_settings` table.
//!
//! The configuration is stored as one JSONB document per project and decoded
//! into the typed [`AssignmentConfig`]. Fields missing from the document take
//! their defaults, so older documents keep loading after new fields appear.

use quorum_core::config::AssignmentConfig;
use quorum_core::types::DbId;
use sqlx::PgPool;

/// Provides load/save for per-project assignment configuration.
pub struct SettingsRepo;

impl SettingsRepo {
    /// Load a project's configuration, `None` when the project never saved one.
    pub async fn load(
        pool: &PgPool,
        project_id: DbId,
    ) -> Result<Option<AssignmentConfig>, sqlx::Error> {
        let raw: Option<serde_json::Value> = sqlx::query_scalar(
            "SELECT config FROM project_assignment_settings WHERE project_id = $1",
        )
        .bind(project_id)
        .fetch_optional(pool)
        .await?;

        raw.map(|value| {
            serde_json::from_value::<AssignmentConfig>(value)
                .map_err(|e| sqlx::Error::Decode(Box::new(e)))
        })
        .transpose()
    }

    /// Insert or replace a project's configuration.
    pub async fn save(
        pool: &PgPool,
        project_id: DbId,
        config: &AssignmentConfig,
    ) -> Result<(), sqlx::Error> {
        let document =
            serde_json::to_value(config).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
        sqlx::query(
            "INSERT INTO project_assignment_settings (project_id, config) \
             VALUES ($1, $2) \
             ON CONFLICT (project_id) DO UPDATE SET config = EXCLUDED.config",
        )
        .bind(project_id)
        .bind(document)
        .execute(pool)
        .await?;
        Ok(())
    }
}
