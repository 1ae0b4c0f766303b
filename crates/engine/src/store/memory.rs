use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use quorum_core::assignment::{AssignmentStatus, ProjectRole};
use quorum_core::config::AssignmentConfig;
use quorum_core::consensus::ConsensusStatus;
use quorum_core::honeypot::ProbeGrade;
use quorum_core::leaderboard::apply_streak_bonus;
use quorum_core::scoring::RECENT_ACTIVITY_DAYS;
use quorum_core::trust::{update_quality, TierChange, TrustPolicy, TrustTier};
use quorum_core::types::{DbId, Timestamp};
use quorum_db::models::annotation::{Annotation, SubmittedAnnotation, VoteRow};
use quorum_db::models::annotator::{Annotator, CreateAnnotator, MemberLoad, ProjectAssignment};
use quorum_db::models::assignment::{NewAssignment, StatusCount, TaskAssignment};
use quorum_db::models::consensus::{ConsensusUpsert, TaskConsensus};
use quorum_db::models::probe::{HoneypotProbe, NewProbe};
use quorum_db::models::project::Project;
use quorum_db::models::review::{ExpertReview, NewExpertReview, ReviewEffect};
use quorum_db::models::task::{
    NewTask, Task, TaskCoverage, TaskCursor, TaskLoad, DEFAULT_COMPLEXITY,
};
use quorum_db::models::trust::{ProbeOutcome, TrustRecord};

use super::AssignmentStore;
use crate::error::{EngineError, EngineResult};

/// In-process [`AssignmentStore`].
///
/// All state sits behind one mutex, so every call is atomic the way the
/// corresponding PostgreSQL transaction is.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    next_id: DbId,
    projects: BTreeMap<DbId, Project>,
    configs: HashMap<DbId, AssignmentConfig>,
    annotators: BTreeMap<DbId, Annotator>,
    bindings: BTreeMap<DbId, ProjectAssignment>,
    tasks: BTreeMap<DbId, Task>,
    assignments: BTreeMap<DbId, TaskAssignment>,
    annotations: BTreeMap<DbId, Annotation>,
    probes: BTreeMap<DbId, HoneypotProbe>,
    /// Keyed by annotator id.
    trust: BTreeMap<DbId, TrustRecord>,
    /// Keyed by task id.
    consensus: BTreeMap<DbId, TaskConsensus>,
    reviews: Vec<ExpertReview>,
}

impl State {
    fn next_id(&mut self) -> DbId {
        self.next_id += 1;
        self.next_id
    }

    fn live_count(&self, task_id: DbId) -> i64 {
        self.assignments
            .values()
            .filter(|a| a.task_id == task_id && a.status.is_live())
            .count() as i64
    }

    fn annotation_count(&self, task_id: DbId) -> i64 {
        self.annotations
            .values()
            .filter(|a| a.task_id == task_id && !a.is_cancelled)
            .count() as i64
    }

    fn load_of(&self, task: &Task) -> TaskLoad {
        TaskLoad {
            id: task.id,
            priority: task.priority,
            complexity: task.complexity,
            live_assignments: self.live_count(task.id),
            annotation_count: self.annotation_count(task.id),
        }
    }

    fn has_live(&self, task_id: DbId, annotator_id: DbId) -> bool {
        self.assignments
            .values()
            .any(|a| a.task_id == task_id && a.annotator_id == annotator_id && a.status.is_live())
    }

    /// Regular tasks of a project in allocation order.
    fn regular_tasks(&self, project_id: DbId) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self
            .tasks
            .values()
            .filter(|t| t.project_id == project_id && !t.is_probe)
            .collect();
        tasks.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        tasks
    }

    fn insert_live(&mut self, input: &NewAssignment) -> Option<TaskAssignment> {
        if self.has_live(input.task_id, input.annotator_id) {
            return None;
        }
        let now = Utc::now();
        let assignment = TaskAssignment {
            id: self.next_id(),
            task_id: input.task_id,
            project_id: input.project_id,
            annotator_id: input.annotator_id,
            status: AssignmentStatus::Assigned,
            is_honeypot: input.is_honeypot,
            honeypot_passed: None,
            assigned_at: now,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        self.assignments.insert(assignment.id, assignment.clone());
        Some(assignment)
    }

    /// Complete an open assignment, returning it.
    fn complete_open(&mut self, assignment_id: DbId) -> Option<TaskAssignment> {
        let assignment = self.assignments.get_mut(&assignment_id)?;
        if !assignment.status.is_active() {
            return None;
        }
        let now = Utc::now();
        assignment.status = AssignmentStatus::Completed;
        assignment.completed_at = Some(now);
        assignment.updated_at = now;
        Some(assignment.clone())
    }

    fn insert_annotation(&mut self, assignment: &TaskAssignment, result: &serde_json::Value) -> Annotation {
        let now = Utc::now();
        let annotation = Annotation {
            id: self.next_id(),
            task_id: assignment.task_id,
            project_id: assignment.project_id,
            annotator_id: assignment.annotator_id,
            assignment_id: Some(assignment.id),
            result: result.clone(),
            is_cancelled: false,
            is_ground_truth: false,
            created_at: now,
            updated_at: now,
        };
        self.annotations.insert(annotation.id, annotation.clone());
        annotation
    }

    fn status_counts<I>(statuses: I) -> Vec<StatusCount>
    where
        I: Iterator<Item = String>,
    {
        let mut counts: BTreeMap<String, i64> = BTreeMap::new();
        for status in statuses {
            *counts.entry(status).or_default() += 1;
        }
        counts
            .into_iter()
            .map(|(status, count)| StatusCount { status, count })
            .collect()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Create an active project.
    pub fn create_project(&self, name: &str) -> Project {
        let mut state = self.state();
        let now = Utc::now();
        let project = Project {
            id: state.next_id(),
            name: name.to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        state.projects.insert(project.id, project.clone());
        project
    }

    /// Create an active annotator (novice without history unless given).
    pub fn create_annotator(&self, input: &CreateAnnotator) -> Annotator {
        let mut state = self.state();
        let now = Utc::now();
        let annotator = Annotator {
            id: state.next_id(),
            display_name: input.display_name.clone(),
            trust_tier: input.trust_tier.unwrap_or(TrustTier::Novice),
            quality_score: input.quality_score,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        state.annotators.insert(annotator.id, annotator.clone());
        annotator
    }

    /// Move an assignment's `assigned_at` into the past.
    pub fn backdate_assignment(&self, assignment_id: DbId, age: Duration) -> bool {
        let mut state = self.state();
        match state.assignments.get_mut(&assignment_id) {
            Some(a) => {
                a.assigned_at = Utc::now() - age;
                true
            }
            None => false,
        }
    }

    /// Every assignment of a task, including expired ones.
    pub fn assignments_for_task(&self, task_id: DbId) -> Vec<TaskAssignment> {
        self.state()
            .assignments
            .values()
            .filter(|a| a.task_id == task_id)
            .cloned()
            .collect()
    }

    /// Every annotation of a task, including cancelled ones.
    pub fn annotations_for_task(&self, task_id: DbId) -> Vec<Annotation> {
        self.state()
            .annotations
            .values()
            .filter(|a| a.task_id == task_id)
            .cloned()
            .collect()
    }

    pub fn reviews_for_task(&self, task_id: DbId) -> Vec<ExpertReview> {
        self.state()
            .reviews
            .iter()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AssignmentStore for MemoryStore {
    async fn project_exists(&self, project_id: DbId) -> EngineResult<bool> {
        Ok(self.state().projects.contains_key(&project_id))
    }

    async fn load_config(&self, project_id: DbId) -> EngineResult<AssignmentConfig> {
        Ok(self
            .state()
            .configs
            .get(&project_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_config(&self, project_id: DbId, config: &AssignmentConfig) -> EngineResult<()> {
        self.state().configs.insert(project_id, config.clone());
        Ok(())
    }

    async fn find_annotator(&self, annotator_id: DbId) -> EngineResult<Option<Annotator>> {
        Ok(self.state().annotators.get(&annotator_id).cloned())
    }

    async fn list_members(&self, project_id: DbId) -> EngineResult<Vec<MemberLoad>> {
        let state = self.state();
        let recent = Utc::now() - Duration::days(RECENT_ACTIVITY_DAYS);
        let mut members: Vec<MemberLoad> = state
            .bindings
            .values()
            .filter(|b| b.project_id == project_id && b.is_active)
            .filter_map(|b| {
                let annotator = state.annotators.get(&b.annotator_id)?;
                if !annotator.is_active {
                    return None;
                }
                let mine: Vec<&TaskAssignment> = state
                    .assignments
                    .values()
                    .filter(|a| a.project_id == project_id && a.annotator_id == annotator.id)
                    .collect();
                Some(MemberLoad {
                    annotator_id: annotator.id,
                    display_name: annotator.display_name.clone(),
                    trust_tier: annotator.trust_tier,
                    quality_score: annotator.quality_score,
                    role: b.role,
                    active_count: state
                        .assignments
                        .values()
                        .filter(|a| a.annotator_id == annotator.id && a.status.is_active())
                        .count() as i64,
                    completed_recently: mine.iter().any(|a| {
                        a.status == AssignmentStatus::Completed
                            && a.completed_at.is_some_and(|at| at >= recent)
                    }),
                    completed_total: mine
                        .iter()
                        .filter(|a| a.status == AssignmentStatus::Completed)
                        .count() as i64,
                })
            })
            .collect();
        members.sort_by_key(|m| m.annotator_id);
        Ok(members)
    }

    async fn find_binding(
        &self,
        project_id: DbId,
        annotator_id: DbId,
    ) -> EngineResult<Option<ProjectAssignment>> {
        Ok(self
            .state()
            .bindings
            .values()
            .find(|b| b.project_id == project_id && b.annotator_id == annotator_id && b.is_active)
            .cloned())
    }

    async fn bind_annotator(
        &self,
        project_id: DbId,
        annotator_id: DbId,
        role: ProjectRole,
    ) -> EngineResult<Option<ProjectAssignment>> {
        let mut state = self.state();
        if !state.annotators.contains_key(&annotator_id) {
            return Err(EngineError::not_found("annotator", annotator_id));
        }
        let exists = state
            .bindings
            .values()
            .any(|b| b.project_id == project_id && b.annotator_id == annotator_id && b.is_active);
        if exists {
            return Ok(None);
        }
        let now = Utc::now();
        let binding = ProjectAssignment {
            id: state.next_id(),
            project_id,
            annotator_id,
            role,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        state.bindings.insert(binding.id, binding.clone());
        Ok(Some(binding))
    }

    async fn bind_all_active(&self, project_id: DbId) -> EngineResult<u64> {
        let candidates: Vec<DbId> = {
            let state = self.state();
            state
                .annotators
                .values()
                .filter(|a| a.is_active)
                .map(|a| a.id)
                .collect()
        };
        let mut created = 0;
        for annotator_id in candidates {
            if self
                .bind_annotator(project_id, annotator_id, ProjectRole::Annotator)
                .await?
                .is_some()
            {
                created += 1;
            }
        }
        Ok(created)
    }

    async fn insert_tasks(&self, project_id: DbId, tasks: &[NewTask]) -> EngineResult<Vec<DbId>> {
        let mut state = self.state();
        let now = Utc::now();
        let mut ids = Vec::with_capacity(tasks.len());
        for input in tasks {
            let task = Task {
                id: state.next_id(),
                project_id,
                data: input.data.clone(),
                priority: input.priority.unwrap_or(0),
                complexity: input.complexity.unwrap_or(DEFAULT_COMPLEXITY),
                is_probe: false,
                created_at: now,
                updated_at: now,
            };
            ids.push(task.id);
            state.tasks.insert(task.id, task);
        }
        Ok(ids)
    }

    async fn find_task(&self, task_id: DbId) -> EngineResult<Option<Task>> {
        Ok(self.state().tasks.get(&task_id).cloned())
    }

    async fn task_load(&self, task_id: DbId) -> EngineResult<Option<TaskLoad>> {
        let state = self.state();
        Ok(state.tasks.get(&task_id).map(|t| state.load_of(t)))
    }

    async fn list_task_page(
        &self,
        project_id: DbId,
        after: Option<TaskCursor>,
        limit: i64,
    ) -> EngineResult<Vec<TaskLoad>> {
        let state = self.state();
        Ok(state
            .regular_tasks(project_id)
            .into_iter()
            .filter(|t| match after {
                None => true,
                Some(c) => t.priority < c.priority || (t.priority == c.priority && t.id > c.id),
            })
            .take(limit.max(0) as usize)
            .map(|t| state.load_of(t))
            .collect())
    }

    async fn list_open_tasks_for(
        &self,
        project_id: DbId,
        annotator_id: DbId,
        overlap: i64,
        limit: i64,
    ) -> EngineResult<Vec<TaskLoad>> {
        let state = self.state();
        Ok(state
            .regular_tasks(project_id)
            .into_iter()
            .filter(|t| !state.has_live(t.id, annotator_id))
            .map(|t| state.load_of(t))
            .filter(|l| l.live_assignments < overlap)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn task_coverage(&self, project_id: DbId, overlap: i64) -> EngineResult<TaskCoverage> {
        let state = self.state();
        let mut coverage = TaskCoverage::default();
        for task in state.regular_tasks(project_id) {
            let live = state.live_count(task.id);
            coverage.total_tasks += 1;
            if live >= overlap {
                coverage.fully_assigned += 1;
            } else if live > 0 {
                coverage.partially_assigned += 1;
            }
            if live == 0 {
                coverage.unassigned += 1;
            }
        }
        Ok(coverage)
    }

    async fn create_assignment(
        &self,
        input: &NewAssignment,
    ) -> EngineResult<Option<TaskAssignment>> {
        Ok(self.state().insert_live(input))
    }

    async fn find_assignment(&self, assignment_id: DbId) -> EngineResult<Option<TaskAssignment>> {
        Ok(self.state().assignments.get(&assignment_id).cloned())
    }

    async fn find_live_assignment(
        &self,
        task_id: DbId,
        annotator_id: DbId,
    ) -> EngineResult<Option<TaskAssignment>> {
        Ok(self
            .state()
            .assignments
            .values()
            .find(|a| a.task_id == task_id && a.annotator_id == annotator_id && a.status.is_live())
            .cloned())
    }

    async fn live_annotators(&self, task_id: DbId) -> EngineResult<Vec<DbId>> {
        let mut ids: Vec<DbId> = self
            .state()
            .assignments
            .values()
            .filter(|a| a.task_id == task_id && a.status.is_live())
            .map(|a| a.annotator_id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn transition_assignment(
        &self,
        assignment_id: DbId,
        from: AssignmentStatus,
        to: AssignmentStatus,
    ) -> EngineResult<Option<TaskAssignment>> {
        let mut state = self.state();
        let Some(assignment) = state.assignments.get_mut(&assignment_id) else {
            return Ok(None);
        };
        if assignment.status != from {
            return Ok(None);
        }
        let now = Utc::now();
        assignment.status = to;
        assignment.updated_at = now;
        match to {
            AssignmentStatus::InProgress => assignment.started_at = Some(now),
            AssignmentStatus::Completed => assignment.completed_at = Some(now),
            _ => {}
        }
        Ok(Some(assignment.clone()))
    }

    async fn transfer_assignment(
        &self,
        assignment_id: DbId,
        to_annotator: DbId,
    ) -> EngineResult<Option<TaskAssignment>> {
        let mut state = self.state();
        let Some(source) = state.assignments.get(&assignment_id).cloned() else {
            return Ok(None);
        };
        if source.status != AssignmentStatus::Assigned
            || state.has_live(source.task_id, to_annotator)
        {
            return Ok(None);
        }
        if let Some(a) = state.assignments.get_mut(&assignment_id) {
            a.status = AssignmentStatus::Expired;
            a.updated_at = Utc::now();
        }
        Ok(state.insert_live(&NewAssignment {
            task_id: source.task_id,
            project_id: source.project_id,
            annotator_id: to_annotator,
            is_honeypot: source.is_honeypot,
        }))
    }

    async fn delete_assignment(&self, assignment_id: DbId) -> EngineResult<bool> {
        Ok(self.state().assignments.remove(&assignment_id).is_some())
    }

    async fn list_stale_assignments(
        &self,
        project_id: DbId,
        cutoff: Timestamp,
        limit: i64,
    ) -> EngineResult<Vec<TaskAssignment>> {
        let state = self.state();
        let mut stale: Vec<TaskAssignment> = state
            .assignments
            .values()
            .filter(|a| {
                a.project_id == project_id
                    && a.status == AssignmentStatus::Assigned
                    && !a.is_honeypot
                    && a.assigned_at < cutoff
            })
            .cloned()
            .collect();
        stale.sort_by(|a, b| a.assigned_at.cmp(&b.assigned_at).then(a.id.cmp(&b.id)));
        stale.truncate(limit.max(0) as usize);
        Ok(stale)
    }

    async fn list_unstarted(
        &self,
        project_id: DbId,
        annotator_id: DbId,
        limit: i64,
    ) -> EngineResult<Vec<TaskAssignment>> {
        let state = self.state();
        let mut unstarted: Vec<TaskAssignment> = state
            .assignments
            .values()
            .filter(|a| {
                a.project_id == project_id
                    && a.annotator_id == annotator_id
                    && a.status == AssignmentStatus::Assigned
                    && !a.is_honeypot
            })
            .cloned()
            .collect();
        unstarted.sort_by(|a, b| b.assigned_at.cmp(&a.assigned_at).then(b.id.cmp(&a.id)));
        unstarted.truncate(limit.max(0) as usize);
        Ok(unstarted)
    }

    async fn oldest_open_assignment(
        &self,
        project_id: DbId,
        annotator_id: DbId,
    ) -> EngineResult<Option<TaskAssignment>> {
        Ok(self
            .state()
            .assignments
            .values()
            .filter(|a| {
                a.project_id == project_id && a.annotator_id == annotator_id && a.status.is_active()
            })
            .min_by(|a, b| a.assigned_at.cmp(&b.assigned_at).then(a.id.cmp(&b.id)))
            .cloned())
    }

    async fn tasks_since_last_probe(
        &self,
        project_id: DbId,
        annotator_id: DbId,
    ) -> EngineResult<Option<i64>> {
        let state = self.state();
        let mine = || {
            state
                .assignments
                .values()
                .filter(move |a| a.project_id == project_id && a.annotator_id == annotator_id)
        };
        let Some(last_probe) = mine().filter(|a| a.is_honeypot).map(|a| a.id).max() else {
            return Ok(None);
        };
        Ok(Some(
            mine()
                .filter(|a| !a.is_honeypot && a.id > last_probe)
                .count() as i64,
        ))
    }

    async fn assignment_status_counts(&self, project_id: DbId) -> EngineResult<Vec<StatusCount>> {
        let state = self.state();
        Ok(State::status_counts(
            state
                .assignments
                .values()
                .filter(|a| a.project_id == project_id)
                .map(|a| a.status.to_string()),
        ))
    }

    async fn submit_annotation(
        &self,
        assignment_id: DbId,
        result: &serde_json::Value,
    ) -> EngineResult<Option<SubmittedAnnotation>> {
        let mut state = self.state();
        let Some(assignment) = state.complete_open(assignment_id) else {
            return Ok(None);
        };
        let annotation = state.insert_annotation(&assignment, result);
        Ok(Some(SubmittedAnnotation {
            assignment,
            annotation,
        }))
    }

    async fn list_votes(&self, task_id: DbId) -> EngineResult<Vec<VoteRow>> {
        let state = self.state();
        Ok(state
            .annotations
            .values()
            .filter(|a| a.task_id == task_id && !a.is_cancelled)
            .map(|a| VoteRow {
                annotation_id: a.id,
                annotator_id: a.annotator_id,
                result: a.result.clone(),
                quality_score: state
                    .annotators
                    .get(&a.annotator_id)
                    .and_then(|ann| ann.quality_score),
            })
            .collect())
    }

    async fn create_probe(
        &self,
        project_id: DbId,
        input: &NewProbe,
        tolerance: f64,
    ) -> EngineResult<(Task, HoneypotProbe)> {
        let mut state = self.state();
        let now = Utc::now();
        let task = Task {
            id: state.next_id(),
            project_id,
            data: input.data.clone(),
            priority: 0,
            complexity: input.complexity.unwrap_or(DEFAULT_COMPLEXITY),
            is_probe: true,
            created_at: now,
            updated_at: now,
        };
        let probe = HoneypotProbe {
            id: state.next_id(),
            project_id,
            task_id: task.id,
            ground_truth: input.ground_truth.clone(),
            tolerance,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        state.tasks.insert(task.id, task.clone());
        state.probes.insert(probe.id, probe.clone());
        Ok((task, probe))
    }

    async fn find_probe_by_task(&self, task_id: DbId) -> EngineResult<Option<HoneypotProbe>> {
        Ok(self
            .state()
            .probes
            .values()
            .find(|p| p.task_id == task_id)
            .cloned())
    }

    async fn find_unseen_probe(
        &self,
        project_id: DbId,
        annotator_id: DbId,
    ) -> EngineResult<Option<HoneypotProbe>> {
        let state = self.state();
        Ok(state
            .probes
            .values()
            .filter(|p| p.project_id == project_id && p.is_active)
            .find(|p| {
                !state
                    .assignments
                    .values()
                    .any(|a| a.task_id == p.task_id && a.annotator_id == annotator_id)
            })
            .cloned())
    }

    async fn record_probe_outcome(
        &self,
        assignment_id: DbId,
        result: &serde_json::Value,
        grade: ProbeGrade,
        policy: &TrustPolicy,
    ) -> EngineResult<Option<ProbeOutcome>> {
        let mut state = self.state();
        let Some(annotator_id) = state
            .assignments
            .get(&assignment_id)
            .filter(|a| a.status.is_active())
            .map(|a| a.annotator_id)
        else {
            return Ok(None);
        };
        let Some((tier, quality)) = state
            .annotators
            .get(&annotator_id)
            .map(|a| (a.trust_tier, a.quality_score))
        else {
            return Err(EngineError::not_found("annotator", annotator_id));
        };

        let Some(assignment) = state.complete_open(assignment_id) else {
            return Ok(None);
        };
        if let Some(a) = state.assignments.get_mut(&assignment_id) {
            a.is_honeypot = true;
            a.honeypot_passed = Some(grade.passed);
        }
        let annotation = state.insert_annotation(&assignment, result);

        let previous = state
            .trust
            .get(&annotator_id)
            .map(TrustRecord::stats)
            .unwrap_or_default();

        let mut stats = previous.record(grade.passed);
        let quality_score = update_quality(quality, grade.passed);
        let tier_change = policy.evaluate(tier, &stats);
        if tier_change != TierChange::Unchanged {
            stats.since_tier_change = 0;
        }
        let trust_tier = tier_change.resulting_tier(tier);

        let now = Utc::now();
        let record_id = match state.trust.get(&annotator_id) {
            Some(r) => r.id,
            None => state.next_id(),
        };
        let record = state.trust.entry(annotator_id).or_insert_with(|| TrustRecord {
            id: record_id,
            annotator_id,
            total: 0,
            passed: 0,
            pass_rate: 0.0,
            since_tier_change: 0,
            last_streak_bonus_total: 0,
            created_at: now,
            updated_at: now,
        });
        record.total = stats.total;
        record.passed = stats.passed;
        record.pass_rate = stats.pass_rate();
        record.since_tier_change = stats.since_tier_change;
        record.updated_at = now;

        if let Some(a) = state.annotators.get_mut(&annotator_id) {
            a.quality_score = Some(quality_score);
            a.trust_tier = trust_tier;
            a.updated_at = now;
        }

        Ok(Some(ProbeOutcome {
            assignment_id,
            annotator_id,
            annotation_id: annotation.id,
            passed: grade.passed,
            similarity: grade.similarity,
            stats,
            quality_score,
            trust_tier,
            tier_change,
        }))
    }

    async fn find_trust_record(&self, annotator_id: DbId) -> EngineResult<Option<TrustRecord>> {
        Ok(self.state().trust.get(&annotator_id).cloned())
    }

    async fn recent_probe_outcomes(
        &self,
        annotator_id: DbId,
        limit: i64,
    ) -> EngineResult<Vec<bool>> {
        let state = self.state();
        let mut graded: Vec<&TaskAssignment> = state
            .assignments
            .values()
            .filter(|a| {
                a.annotator_id == annotator_id && a.is_honeypot && a.honeypot_passed.is_some()
            })
            .collect();
        graded.sort_by(|a, b| b.completed_at.cmp(&a.completed_at).then(b.id.cmp(&a.id)));
        Ok(graded
            .into_iter()
            .take(limit.max(0) as usize)
            .filter_map(|a| a.honeypot_passed)
            .collect())
    }

    async fn apply_quality_feedback(
        &self,
        annotator_id: DbId,
        passed: bool,
    ) -> EngineResult<Option<f64>> {
        let mut state = self.state();
        Ok(state.annotators.get_mut(&annotator_id).map(|a| {
            let next = update_quality(a.quality_score, passed);
            a.quality_score = Some(next);
            a.updated_at = Utc::now();
            next
        }))
    }

    async fn award_streak_bonus(
        &self,
        annotator_id: DbId,
        seen_bonus_total: i64,
        probe_total: i64,
    ) -> EngineResult<Option<f64>> {
        let mut state = self.state();
        match state.trust.get_mut(&annotator_id) {
            Some(r) if r.last_streak_bonus_total == seen_bonus_total => {
                r.last_streak_bonus_total = probe_total;
            }
            _ => return Ok(None),
        }
        Ok(state.annotators.get_mut(&annotator_id).map(|a| {
            let next = apply_streak_bonus(a.quality_score);
            a.quality_score = Some(next);
            next
        }))
    }

    async fn find_consensus(&self, task_id: DbId) -> EngineResult<Option<TaskConsensus>> {
        Ok(self.state().consensus.get(&task_id).cloned())
    }

    async fn upsert_consensus(
        &self,
        input: &ConsensusUpsert,
    ) -> EngineResult<Option<TaskConsensus>> {
        let mut state = self.state();
        let now = Utc::now();
        let existing = state.consensus.get(&input.task_id).cloned();
        if existing.as_ref().is_some_and(|c| c.status.is_settled()) {
            return Ok(None);
        }
        let (id, created_at) = match &existing {
            Some(c) => (c.id, c.created_at),
            None => (state.next_id(), now),
        };
        let record = TaskConsensus {
            id,
            task_id: input.task_id,
            project_id: input.project_id,
            status: input.status,
            consolidated_result: input.consolidated_result.clone(),
            candidate_result: input.candidate_result.clone(),
            agreement_score: input.agreement_score,
            method_name: input.method.map(|m| m.as_str().to_string()),
            annotation_count: input.annotation_count,
            finalized_at: None,
            created_at,
            updated_at: now,
        };
        state.consensus.insert(input.task_id, record.clone());
        Ok(Some(record))
    }

    async fn finalize_reached(&self, task_id: DbId) -> EngineResult<Option<TaskConsensus>> {
        let mut state = self.state();
        Ok(match state.consensus.get_mut(&task_id) {
            Some(c) if c.status == ConsensusStatus::ConsensusReached => {
                let now = Utc::now();
                c.status = ConsensusStatus::Finalized;
                c.finalized_at = Some(now);
                c.updated_at = now;
                Some(c.clone())
            }
            _ => None,
        })
    }

    async fn list_consensus(
        &self,
        project_id: DbId,
        status: ConsensusStatus,
        limit: i64,
    ) -> EngineResult<Vec<TaskConsensus>> {
        Ok(self
            .state()
            .consensus
            .values()
            .filter(|c| c.project_id == project_id && c.status == status)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn consensus_status_counts(&self, project_id: DbId) -> EngineResult<Vec<StatusCount>> {
        let state = self.state();
        Ok(State::status_counts(
            state
                .consensus
                .values()
                .filter(|c| c.project_id == project_id)
                .map(|c| c.status.to_string()),
        ))
    }

    async fn apply_expert_review(
        &self,
        input: &NewExpertReview,
        effect: &ReviewEffect,
    ) -> EngineResult<Option<(ExpertReview, TaskConsensus)>> {
        let mut state = self.state();
        let now = Utc::now();
        let consensus = match state.consensus.get_mut(&input.task_id) {
            Some(c) if c.status == ConsensusStatus::ReviewRequired => {
                match effect {
                    ReviewEffect::Finalize { result, method } => {
                        c.status = ConsensusStatus::Finalized;
                        c.consolidated_result = Some(result.clone());
                        c.method_name = Some(method.as_str().to_string());
                        c.finalized_at = Some(now);
                    }
                    ReviewEffect::Reopen => {
                        c.status = ConsensusStatus::Pending;
                        c.consolidated_result = None;
                        c.candidate_result = None;
                        c.agreement_score = 0.0;
                        c.method_name = None;
                        c.annotation_count = 0;
                    }
                }
                c.updated_at = now;
                c.clone()
            }
            _ => return Ok(None),
        };

        if *effect == ReviewEffect::Reopen {
            for annotation in state.annotations.values_mut() {
                if annotation.task_id == input.task_id {
                    annotation.is_cancelled = true;
                }
            }
            for assignment in state.assignments.values_mut() {
                if assignment.task_id == input.task_id
                    && assignment.status == AssignmentStatus::Completed
                {
                    assignment.status = AssignmentStatus::Expired;
                    assignment.updated_at = now;
                }
            }
        }

        let review = ExpertReview {
            id: state.next_id(),
            task_id: input.task_id,
            reviewer_id: input.reviewer_id,
            decision: input.decision,
            corrected_result: input.corrected_result.clone(),
            comment: input.comment.clone(),
            created_at: now,
            updated_at: now,
        };
        state.reviews.push(review.clone());
        Ok(Some((review, consensus)))
    }
}
