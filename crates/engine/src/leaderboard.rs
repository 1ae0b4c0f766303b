use quorum_core::leaderboard::{rank_entries, LeaderboardEntry};
use quorum_core::types::DbId;

use crate::engine::Engine;
use crate::error::EngineResult;

impl Engine {
    /// Rank a project's active members by quality, then completed work.
    pub async fn leaderboard(
        &self,
        project_id: DbId,
        limit: usize,
    ) -> EngineResult<Vec<LeaderboardEntry>> {
        self.ensure_project(project_id).await?;
        let entries = self
            .store
            .list_members(project_id)
            .await?
            .into_iter()
            .map(|m| LeaderboardEntry {
                rank: 0,
                annotator_id: m.annotator_id,
                display_name: m.display_name,
                trust_tier: m.trust_tier,
                quality_score: m.quality_score,
                completed_assignments: m.completed_total,
            })
            .collect();
        Ok(rank_entries(entries, limit))
    }
}
