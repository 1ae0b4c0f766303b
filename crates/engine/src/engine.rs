//! The [`Engine`] handle and the per-pass project snapshot.

use std::sync::{Arc, Mutex};

use quorum_core::assignment::ProjectRole;
use quorum_core::config::AssignmentConfig;
use quorum_core::overlap::{calculate_optimal_overlap, effective_overlap, OverlapCalculation};
use quorum_core::types::DbId;
use quorum_db::models::annotator::MemberLoad;
use quorum_events::{EventBus, PlatformEvent};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{EngineError, EngineResult};
use crate::locks::ProjectLocks;
use crate::queue::{JobQueue, JobRequest};
use crate::store::AssignmentStore;

/// Assignment, consensus and quality-control engine.
///
/// Cheap to share behind an `Arc`; every operation takes `&self`.
pub struct Engine {
    pub(crate) store: Arc<dyn AssignmentStore>,
    pub(crate) queue: Arc<dyn JobQueue>,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) locks: ProjectLocks,
    rng: Mutex<StdRng>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn AssignmentStore>,
        queue: Arc<dyn JobQueue>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            queue,
            bus,
            locks: ProjectLocks::new(),
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Replace the injection RNG with a seeded one (reproducible runs).
    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    pub fn store(&self) -> &Arc<dyn AssignmentStore> {
        &self.store
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Uniform sample in `0..1`.
    pub(crate) fn roll(&self) -> f64 {
        self.rng
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .random::<f64>()
    }

    pub(crate) fn publish(&self, event: PlatformEvent) {
        self.bus.publish(event);
    }

    /// Enqueue a follow-up job. The triggering write has already committed,
    /// so a queue failure is logged rather than surfaced.
    pub(crate) async fn enqueue(&self, request: JobRequest) {
        let job_name = request.job_name;
        match self.queue.enqueue(request).await {
            Ok(true) => tracing::debug!(%job_name, "Follow-up job enqueued"),
            Ok(false) => tracing::debug!(%job_name, "Identical job already pending"),
            Err(e) => tracing::error!(%job_name, error = %e, "Failed to enqueue follow-up job"),
        }
    }

    pub(crate) async fn ensure_project(&self, project_id: DbId) -> EngineResult<()> {
        if self.store.project_exists(project_id).await? {
            Ok(())
        } else {
            Err(EngineError::not_found("project", project_id))
        }
    }

    /// Load the configuration, members and overlap of a project.
    pub(crate) async fn load_context(&self, project_id: DbId) -> EngineResult<ProjectContext> {
        self.ensure_project(project_id).await?;
        let config = self.store.load_config(project_id).await?;
        let members = self.store.list_members(project_id).await?;
        Ok(ProjectContext::new(project_id, config, members))
    }
}

/// Snapshot of one project taken at the start of a pass.
///
/// Loads are tallied in memory as the pass creates or moves assignments,
/// so later decisions in the same pass see earlier ones.
#[derive(Debug, Clone)]
pub(crate) struct ProjectContext {
    pub project_id: DbId,
    pub config: AssignmentConfig,
    /// Every active member, any role.
    pub members: Vec<MemberLoad>,
    pub overlap: OverlapCalculation,
    pub effective_overlap: i64,
}

impl ProjectContext {
    pub fn new(project_id: DbId, config: AssignmentConfig, members: Vec<MemberLoad>) -> Self {
        let mut ctx = Self {
            project_id,
            config,
            members,
            overlap: calculate_optimal_overlap(0, 0),
            effective_overlap: 0,
        };
        ctx.recalculate_overlap();
        ctx
    }

    pub fn recalculate_overlap(&mut self) {
        let total = self.annotators().count() as i64;
        let available = self.annotators().filter(|m| self.has_capacity(m)).count() as i64;
        self.overlap = calculate_optimal_overlap(total, available);
        self.effective_overlap = effective_overlap(&self.overlap, self.config.required_overlap);
    }

    /// Members that take annotation work (reviewers do not).
    pub fn annotators(&self) -> impl Iterator<Item = &MemberLoad> {
        self.members
            .iter()
            .filter(|m| m.role == ProjectRole::Annotator)
    }

    pub fn member(&self, annotator_id: DbId) -> Option<&MemberLoad> {
        self.members.iter().find(|m| m.annotator_id == annotator_id)
    }

    pub fn has_capacity(&self, member: &MemberLoad) -> bool {
        self.config
            .capacity
            .has_capacity(member.trust_tier, member.active_count)
    }

    pub fn remaining_capacity(&self, member: &MemberLoad) -> i64 {
        self.config
            .capacity
            .remaining(member.trust_tier, member.active_count)
    }

    pub fn any_capacity(&self) -> bool {
        self.annotators().any(|m| self.has_capacity(m))
    }

    /// Adjust a member's tallied active count.
    pub fn adjust_load(&mut self, annotator_id: DbId, delta: i64) {
        if let Some(m) = self
            .members
            .iter_mut()
            .find(|m| m.annotator_id == annotator_id)
        {
            m.active_count = (m.active_count + delta).max(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use quorum_core::trust::TrustTier;

    use super::*;

    fn member(id: DbId, role: ProjectRole, active: i64) -> MemberLoad {
        MemberLoad {
            annotator_id: id,
            display_name: format!("m{id}"),
            trust_tier: TrustTier::Novice,
            quality_score: None,
            role,
            active_count: active,
            completed_recently: false,
            completed_total: 0,
        }
    }

    #[test]
    fn reviewers_do_not_count_towards_overlap() {
        let ctx = ProjectContext::new(
            1,
            AssignmentConfig::default(),
            vec![
                member(1, ProjectRole::Annotator, 0),
                member(2, ProjectRole::Reviewer, 0),
            ],
        );
        assert_eq!(ctx.overlap.total, 1);
        assert_eq!(ctx.effective_overlap, 1);
    }

    #[test]
    fn saturated_members_keep_overlap() {
        let ctx = ProjectContext::new(
            1,
            AssignmentConfig::default(),
            (1..=3).map(|i| member(i, ProjectRole::Annotator, 5)).collect(),
        );
        assert_eq!(ctx.overlap.available, 0);
        assert_eq!(ctx.effective_overlap, 3);
        assert!(!ctx.any_capacity());
    }

    #[test]
    fn override_wins_over_calculation() {
        let config = AssignmentConfig {
            required_overlap: Some(1),
            ..AssignmentConfig::default()
        };
        let ctx = ProjectContext::new(
            1,
            config,
            (1..=3).map(|i| member(i, ProjectRole::Annotator, 0)).collect(),
        );
        assert_eq!(ctx.overlap.overlap, 3);
        assert_eq!(ctx.effective_overlap, 1);
    }

    #[test]
    fn adjust_load_tracks_pass_assignments() {
        let mut ctx = ProjectContext::new(
            1,
            AssignmentConfig::default(),
            vec![member(1, ProjectRole::Annotator, 4)],
        );
        assert!(ctx.any_capacity());
        ctx.adjust_load(1, 1);
        assert!(!ctx.any_capacity());
        assert_eq!(ctx.remaining_capacity(&ctx.members[0]), 0);
    }
}
