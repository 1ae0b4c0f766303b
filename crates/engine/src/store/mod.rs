//! Persistence seam of the engine.
//!
//! [`AssignmentStore`] is everything the allocator, the consensus engine and
//! the honeypot controller read or write. [`PgStore`] delegates to the
//! `quorum-db` repositories; [`MemoryStore`] keeps the same semantics in
//! process memory for tests and embedded use.
//!
//! Every write that must be atomic (submission, probe grading, transfer,
//! expert review) is a single store call so both backends can honour it.

mod memory;
mod postgres;

use async_trait::async_trait;
use quorum_core::assignment::{AssignmentStatus, ProjectRole};
use quorum_core::config::AssignmentConfig;
use quorum_core::consensus::ConsensusStatus;
use quorum_core::honeypot::ProbeGrade;
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

use crate::error::EngineResult;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait AssignmentStore: Send + Sync {
    // -- projects -----------------------------------------------------------

    async fn project_exists(&self, project_id: DbId) -> EngineResult<bool>;

    /// Stored configuration, or the defaults when none was saved.
    async fn load_config(&self, project_id: DbId) -> EngineResult<AssignmentConfig>;

    async fn save_config(&self, project_id: DbId, config: &AssignmentConfig) -> EngineResult<()>;

    // -- annotators and bindings -------------------------------------------

    async fn find_annotator(&self, annotator_id: DbId) -> EngineResult<Option<Annotator>>;

    /// Active members with their current load, ordered by annotator id.
    async fn list_members(&self, project_id: DbId) -> EngineResult<Vec<MemberLoad>>;

    async fn find_binding(
        &self,
        project_id: DbId,
        annotator_id: DbId,
    ) -> EngineResult<Option<ProjectAssignment>>;

    /// `None` when an active binding already exists.
    async fn bind_annotator(
        &self,
        project_id: DbId,
        annotator_id: DbId,
        role: ProjectRole,
    ) -> EngineResult<Option<ProjectAssignment>>;

    async fn bind_all_active(&self, project_id: DbId) -> EngineResult<u64>;

    // -- tasks --------------------------------------------------------------

    async fn insert_tasks(&self, project_id: DbId, tasks: &[NewTask]) -> EngineResult<Vec<DbId>>;

    async fn find_task(&self, task_id: DbId) -> EngineResult<Option<Task>>;

    async fn task_load(&self, task_id: DbId) -> EngineResult<Option<TaskLoad>>;

    /// Keyset page of regular tasks, `(priority DESC, id ASC)`.
    async fn list_task_page(
        &self,
        project_id: DbId,
        after: Option<TaskCursor>,
        limit: i64,
    ) -> EngineResult<Vec<TaskLoad>>;

    /// Under-covered regular tasks the annotator holds no live claim on.
    async fn list_open_tasks_for(
        &self,
        project_id: DbId,
        annotator_id: DbId,
        overlap: i64,
        limit: i64,
    ) -> EngineResult<Vec<TaskLoad>>;

    async fn task_coverage(&self, project_id: DbId, overlap: i64) -> EngineResult<TaskCoverage>;

    // -- assignments --------------------------------------------------------

    /// `None` when the pair already has a live assignment.
    async fn create_assignment(&self, input: &NewAssignment)
        -> EngineResult<Option<TaskAssignment>>;

    async fn find_assignment(&self, assignment_id: DbId) -> EngineResult<Option<TaskAssignment>>;

    async fn find_live_assignment(
        &self,
        task_id: DbId,
        annotator_id: DbId,
    ) -> EngineResult<Option<TaskAssignment>>;

    async fn live_annotators(&self, task_id: DbId) -> EngineResult<Vec<DbId>>;

    /// Compare-and-set status change. `None` when the row is not in `from`.
    async fn transition_assignment(
        &self,
        assignment_id: DbId,
        from: AssignmentStatus,
        to: AssignmentStatus,
    ) -> EngineResult<Option<TaskAssignment>>;

    /// Atomically expire an `assigned` record and recreate it for another annotator.
    async fn transfer_assignment(
        &self,
        assignment_id: DbId,
        to_annotator: DbId,
    ) -> EngineResult<Option<TaskAssignment>>;

    async fn delete_assignment(&self, assignment_id: DbId) -> EngineResult<bool>;

    async fn list_stale_assignments(
        &self,
        project_id: DbId,
        cutoff: Timestamp,
        limit: i64,
    ) -> EngineResult<Vec<TaskAssignment>>;

    async fn list_unstarted(
        &self,
        project_id: DbId,
        annotator_id: DbId,
        limit: i64,
    ) -> EngineResult<Vec<TaskAssignment>>;

    async fn oldest_open_assignment(
        &self,
        project_id: DbId,
        annotator_id: DbId,
    ) -> EngineResult<Option<TaskAssignment>>;

    async fn tasks_since_last_probe(
        &self,
        project_id: DbId,
        annotator_id: DbId,
    ) -> EngineResult<Option<i64>>;

    async fn assignment_status_counts(&self, project_id: DbId) -> EngineResult<Vec<StatusCount>>;

    // -- annotations --------------------------------------------------------

    /// Complete an open assignment and store its annotation atomically.
    async fn submit_annotation(
        &self,
        assignment_id: DbId,
        result: &serde_json::Value,
    ) -> EngineResult<Option<SubmittedAnnotation>>;

    /// Non-cancelled annotations of a task in id order.
    async fn list_votes(&self, task_id: DbId) -> EngineResult<Vec<VoteRow>>;

    // -- honeypots and trust ------------------------------------------------

    async fn create_probe(
        &self,
        project_id: DbId,
        input: &NewProbe,
        tolerance: f64,
    ) -> EngineResult<(Task, HoneypotProbe)>;

    async fn find_probe_by_task(&self, task_id: DbId) -> EngineResult<Option<HoneypotProbe>>;

    /// Lowest-id active probe the annotator was never assigned.
    async fn find_unseen_probe(
        &self,
        project_id: DbId,
        annotator_id: DbId,
    ) -> EngineResult<Option<HoneypotProbe>>;

    /// Complete a probe assignment and fold the grade into trust and quality.
    async fn record_probe_outcome(
        &self,
        assignment_id: DbId,
        result: &serde_json::Value,
        grade: ProbeGrade,
        policy: &TrustPolicy,
    ) -> EngineResult<Option<ProbeOutcome>>;

    async fn find_trust_record(&self, annotator_id: DbId) -> EngineResult<Option<TrustRecord>>;

    /// Graded probe outcomes, newest first.
    async fn recent_probe_outcomes(&self, annotator_id: DbId, limit: i64)
        -> EngineResult<Vec<bool>>;

    async fn apply_quality_feedback(
        &self,
        annotator_id: DbId,
        passed: bool,
    ) -> EngineResult<Option<f64>>;

    /// `None` when `seen_bonus_total` is stale (bonus already granted).
    async fn award_streak_bonus(
        &self,
        annotator_id: DbId,
        seen_bonus_total: i64,
        probe_total: i64,
    ) -> EngineResult<Option<f64>>;

    // -- consensus ----------------------------------------------------------

    async fn find_consensus(&self, task_id: DbId) -> EngineResult<Option<TaskConsensus>>;

    /// Never overwrites `review_required` or `finalized`; returns `None` then.
    async fn upsert_consensus(&self, input: &ConsensusUpsert)
        -> EngineResult<Option<TaskConsensus>>;

    /// `consensus_reached -> finalized`.
    async fn finalize_reached(&self, task_id: DbId) -> EngineResult<Option<TaskConsensus>>;

    async fn list_consensus(
        &self,
        project_id: DbId,
        status: ConsensusStatus,
        limit: i64,
    ) -> EngineResult<Vec<TaskConsensus>>;

    async fn consensus_status_counts(&self, project_id: DbId) -> EngineResult<Vec<StatusCount>>;

    /// Record an expert decision and its effect atomically.
    async fn apply_expert_review(
        &self,
        input: &NewExpertReview,
        effect: &ReviewEffect,
    ) -> EngineResult<Option<(ExpertReview, TaskConsensus)>>;
}
