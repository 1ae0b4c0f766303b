use async_trait::async_trait;
use quorum_core::assignment::{AssignmentStatus, ProjectRole};
use quorum_core::config::AssignmentConfig;
use quorum_core::consensus::ConsensusStatus;
use quorum_core::honeypot::ProbeGrade;
use quorum_core::scoring::RECENT_ACTIVITY_DAYS;
use quorum_core::trust::TrustPolicy;
use quorum_core::types::{DbId, Timestamp};
use quorum_db::models::annotation::{SubmittedAnnotation, VoteRow};
use quorum_db::models::annotator::{Annotator, MemberLoad, ProjectAssignment};
use quorum_db::models::assignment::{NewAssignment, StatusCount, TaskAssignment};
use quorum_db::models::consensus::{ConsensusUpsert, TaskConsensus};
use quorum_db::models::probe::{HoneypotProbe, NewProbe};
use quorum_db::models::review::{ExpertReview, NewExpertReview, ReviewEffect};
use quorum_db::models::task::{NewTask, Task, TaskCoverage, TaskCursor, TaskLoad};
use quorum_db::models::trust::{ProbeOutcome, TrustRecord};
use quorum_db::repositories::{
    AnnotationRepo, AnnotatorRepo, ConsensusRepo, ExpertReviewRepo, ProbeRepo,
    ProjectAssignmentRepo, ProjectRepo, SettingsRepo, TaskAssignmentRepo, TaskRepo,
    TrustRecordRepo,
};
use quorum_db::DbPool;

use super::AssignmentStore;
use crate::error::EngineResult;

/// [`AssignmentStore`] backed by PostgreSQL.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl AssignmentStore for PgStore {
    async fn project_exists(&self, project_id: DbId) -> EngineResult<bool> {
        Ok(ProjectRepo::find_by_id(&self.pool, project_id)
            .await?
            .is_some())
    }

    async fn load_config(&self, project_id: DbId) -> EngineResult<AssignmentConfig> {
        Ok(SettingsRepo::load(&self.pool, project_id)
            .await?
            .unwrap_or_default())
    }

    async fn save_config(&self, project_id: DbId, config: &AssignmentConfig) -> EngineResult<()> {
        SettingsRepo::save(&self.pool, project_id, config).await?;
        Ok(())
    }

    async fn find_annotator(&self, annotator_id: DbId) -> EngineResult<Option<Annotator>> {
        Ok(AnnotatorRepo::find_by_id(&self.pool, annotator_id).await?)
    }

    async fn list_members(&self, project_id: DbId) -> EngineResult<Vec<MemberLoad>> {
        Ok(
            ProjectAssignmentRepo::list_members(&self.pool, project_id, RECENT_ACTIVITY_DAYS as i32)
                .await?,
        )
    }

    async fn find_binding(
        &self,
        project_id: DbId,
        annotator_id: DbId,
    ) -> EngineResult<Option<ProjectAssignment>> {
        Ok(ProjectAssignmentRepo::find_active(&self.pool, project_id, annotator_id).await?)
    }

    async fn bind_annotator(
        &self,
        project_id: DbId,
        annotator_id: DbId,
        role: ProjectRole,
    ) -> EngineResult<Option<ProjectAssignment>> {
        Ok(ProjectAssignmentRepo::bind(&self.pool, project_id, annotator_id, role).await?)
    }

    async fn bind_all_active(&self, project_id: DbId) -> EngineResult<u64> {
        Ok(ProjectAssignmentRepo::bind_all_active(&self.pool, project_id).await?)
    }

    async fn insert_tasks(&self, project_id: DbId, tasks: &[NewTask]) -> EngineResult<Vec<DbId>> {
        Ok(TaskRepo::insert_many(&self.pool, project_id, tasks).await?)
    }

    async fn find_task(&self, task_id: DbId) -> EngineResult<Option<Task>> {
        Ok(TaskRepo::find_by_id(&self.pool, task_id).await?)
    }

    async fn task_load(&self, task_id: DbId) -> EngineResult<Option<TaskLoad>> {
        Ok(TaskRepo::find_load(&self.pool, task_id).await?)
    }

    async fn list_task_page(
        &self,
        project_id: DbId,
        after: Option<TaskCursor>,
        limit: i64,
    ) -> EngineResult<Vec<TaskLoad>> {
        Ok(TaskRepo::list_regular_page(&self.pool, project_id, after, limit).await?)
    }

    async fn list_open_tasks_for(
        &self,
        project_id: DbId,
        annotator_id: DbId,
        overlap: i64,
        limit: i64,
    ) -> EngineResult<Vec<TaskLoad>> {
        Ok(
            TaskRepo::list_open_for_annotator(&self.pool, project_id, annotator_id, overlap, limit)
                .await?,
        )
    }

    async fn task_coverage(&self, project_id: DbId, overlap: i64) -> EngineResult<TaskCoverage> {
        Ok(TaskRepo::coverage(&self.pool, project_id, overlap).await?)
    }

    async fn create_assignment(
        &self,
        input: &NewAssignment,
    ) -> EngineResult<Option<TaskAssignment>> {
        Ok(TaskAssignmentRepo::create(&self.pool, input).await?)
    }

    async fn find_assignment(&self, assignment_id: DbId) -> EngineResult<Option<TaskAssignment>> {
        Ok(TaskAssignmentRepo::find_by_id(&self.pool, assignment_id).await?)
    }

    async fn find_live_assignment(
        &self,
        task_id: DbId,
        annotator_id: DbId,
    ) -> EngineResult<Option<TaskAssignment>> {
        Ok(TaskAssignmentRepo::find_live(&self.pool, task_id, annotator_id).await?)
    }

    async fn live_annotators(&self, task_id: DbId) -> EngineResult<Vec<DbId>> {
        Ok(TaskAssignmentRepo::live_annotator_ids(&self.pool, task_id).await?)
    }

    async fn transition_assignment(
        &self,
        assignment_id: DbId,
        from: AssignmentStatus,
        to: AssignmentStatus,
    ) -> EngineResult<Option<TaskAssignment>> {
        Ok(TaskAssignmentRepo::transition(&self.pool, assignment_id, from, to).await?)
    }

    async fn transfer_assignment(
        &self,
        assignment_id: DbId,
        to_annotator: DbId,
    ) -> EngineResult<Option<TaskAssignment>> {
        Ok(TaskAssignmentRepo::transfer(&self.pool, assignment_id, to_annotator).await?)
    }

    async fn delete_assignment(&self, assignment_id: DbId) -> EngineResult<bool> {
        Ok(TaskAssignmentRepo::delete(&self.pool, assignment_id).await?)
    }

    async fn list_stale_assignments(
        &self,
        project_id: DbId,
        cutoff: Timestamp,
        limit: i64,
    ) -> EngineResult<Vec<TaskAssignment>> {
        Ok(TaskAssignmentRepo::list_stale(&self.pool, project_id, cutoff, limit).await?)
    }

    async fn list_unstarted(
        &self,
        project_id: DbId,
        annotator_id: DbId,
        limit: i64,
    ) -> EngineResult<Vec<TaskAssignment>> {
        Ok(TaskAssignmentRepo::list_unstarted(&self.pool, project_id, annotator_id, limit).await?)
    }

    async fn oldest_open_assignment(
        &self,
        project_id: DbId,
        annotator_id: DbId,
    ) -> EngineResult<Option<TaskAssignment>> {
        Ok(TaskAssignmentRepo::oldest_open(&self.pool, project_id, annotator_id).await?)
    }

    async fn tasks_since_last_probe(
        &self,
        project_id: DbId,
        annotator_id: DbId,
    ) -> EngineResult<Option<i64>> {
        Ok(TaskAssignmentRepo::tasks_since_last_probe(&self.pool, project_id, annotator_id).await?)
    }

    async fn assignment_status_counts(&self, project_id: DbId) -> EngineResult<Vec<StatusCount>> {
        Ok(TaskAssignmentRepo::status_counts(&self.pool, project_id).await?)
    }

    async fn submit_annotation(
        &self,
        assignment_id: DbId,
        result: &serde_json::Value,
    ) -> EngineResult<Option<SubmittedAnnotation>> {
        Ok(AnnotationRepo::submit(&self.pool, assignment_id, result).await?)
    }

    async fn list_votes(&self, task_id: DbId) -> EngineResult<Vec<VoteRow>> {
        Ok(AnnotationRepo::list_votes(&self.pool, task_id).await?)
    }

    async fn create_probe(
        &self,
        project_id: DbId,
        input: &NewProbe,
        tolerance: f64,
    ) -> EngineResult<(Task, HoneypotProbe)> {
        Ok(ProbeRepo::create(&self.pool, project_id, input, tolerance).await?)
    }

    async fn find_probe_by_task(&self, task_id: DbId) -> EngineResult<Option<HoneypotProbe>> {
        Ok(ProbeRepo::find_by_task(&self.pool, task_id).await?)
    }

    async fn find_unseen_probe(
        &self,
        project_id: DbId,
        annotator_id: DbId,
    ) -> EngineResult<Option<HoneypotProbe>> {
        Ok(ProbeRepo::find_unseen(&self.pool, project_id, annotator_id).await?)
    }

    async fn record_probe_outcome(
        &self,
        assignment_id: DbId,
        result: &serde_json::Value,
        grade: ProbeGrade,
        policy: &TrustPolicy,
    ) -> EngineResult<Option<ProbeOutcome>> {
        Ok(
            TrustRecordRepo::record_probe_outcome(&self.pool, assignment_id, result, grade, policy)
                .await?,
        )
    }

    async fn find_trust_record(&self, annotator_id: DbId) -> EngineResult<Option<TrustRecord>> {
        Ok(TrustRecordRepo::find_by_annotator(&self.pool, annotator_id).await?)
    }

    async fn recent_probe_outcomes(
        &self,
        annotator_id: DbId,
        limit: i64,
    ) -> EngineResult<Vec<bool>> {
        Ok(TaskAssignmentRepo::recent_probe_outcomes(&self.pool, annotator_id, limit).await?)
    }

    async fn apply_quality_feedback(
        &self,
        annotator_id: DbId,
        passed: bool,
    ) -> EngineResult<Option<f64>> {
        Ok(AnnotatorRepo::apply_quality_feedback(&self.pool, annotator_id, passed).await?)
    }

    async fn award_streak_bonus(
        &self,
        annotator_id: DbId,
        seen_bonus_total: i64,
        probe_total: i64,
    ) -> EngineResult<Option<f64>> {
        Ok(
            AnnotatorRepo::award_streak_bonus(&self.pool, annotator_id, seen_bonus_total, probe_total)
                .await?,
        )
    }

    async fn find_consensus(&self, task_id: DbId) -> EngineResult<Option<TaskConsensus>> {
        Ok(ConsensusRepo::find_by_task(&self.pool, task_id).await?)
    }

    async fn upsert_consensus(
        &self,
        input: &ConsensusUpsert,
    ) -> EngineResult<Option<TaskConsensus>> {
        Ok(ConsensusRepo::upsert(&self.pool, input).await?)
    }

    async fn finalize_reached(&self, task_id: DbId) -> EngineResult<Option<TaskConsensus>> {
        Ok(ConsensusRepo::finalize_reached(&self.pool, task_id).await?)
    }

    async fn list_consensus(
        &self,
        project_id: DbId,
        status: ConsensusStatus,
        limit: i64,
    ) -> EngineResult<Vec<TaskConsensus>> {
        Ok(ConsensusRepo::list_by_status(&self.pool, project_id, status, limit).await?)
    }

    async fn consensus_status_counts(&self, project_id: DbId) -> EngineResult<Vec<StatusCount>> {
        Ok(ConsensusRepo::status_counts(&self.pool, project_id).await?)
    }

    async fn apply_expert_review(
        &self,
        input: &NewExpertReview,
        effect: &ReviewEffect,
    ) -> EngineResult<Option<(ExpertReview, TaskConsensus)>> {
        Ok(ExpertReviewRepo::apply(&self.pool, input, effect).await?)
    }
}
