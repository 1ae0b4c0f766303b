//! Assignment allocation.
//!
//! A pass walks every regular task of a project in `(priority DESC, id ASC)`
//! keyset batches, tops each task up to the effective overlap with the best
//! scoring eligible annotators, and consolidates tasks that already carry
//! enough annotations. Capacity shortfall is a counter, never an error.

use quorum_core::overlap::{needed_annotators, OverlapCalculation};
use quorum_core::scoring::{score, ScoreInput, ScoringWeights};
use quorum_core::types::DbId;
use quorum_db::models::assignment::{NewAssignment, TaskAssignment};
use quorum_db::models::task::TaskLoad;
use quorum_events::{names, PlatformEvent};
use serde::Serialize;

use crate::engine::{Engine, ProjectContext};
use crate::error::{EngineError, EngineResult};

/// A candidate annotator with its suitability score for one task.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RankedCandidate {
    pub annotator_id: DbId,
    pub score: f64,
}

/// A task that failed during a pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskError {
    pub task_id: DbId,
    pub message: String,
}

/// Counters reported by an allocation pass.
///
/// `fully_assigned`, `partially_assigned` and `pending_capacity` classify
/// each examined task by its live assignment count after the pass:
/// at overlap, between one and overlap, and none at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AllocationSummary {
    pub project_id: DbId,
    pub overlap: i64,
    pub tasks_examined: i64,
    pub fully_assigned: i64,
    pub partially_assigned: i64,
    pub pending_capacity: i64,
    pub newly_assigned: i64,
    /// Consensus records written during the pass.
    pub consolidated: i64,
    pub bindings_created: u64,
    pub errors: Vec<TaskError>,
}

/// Rank eligible annotators for `task`, best first.
///
/// Reviewers, the `exclude`d annotators (live claim on the task) and members
/// at their ceiling are dropped. Ties go to the lower annotator id.
pub(crate) fn rank_candidates(
    ctx: &ProjectContext,
    task: &TaskLoad,
    exclude: &[DbId],
) -> Vec<RankedCandidate> {
    let weights = ScoringWeights::for_strategy(ctx.config.assignment_strategy);
    let mut ranked: Vec<RankedCandidate> = ctx
        .annotators()
        .filter(|m| !exclude.contains(&m.annotator_id))
        .filter(|m| ctx.has_capacity(m))
        .map(|m| {
            let input = ScoreInput {
                tier: m.trust_tier,
                active_count: m.active_count,
                ceiling: ctx.config.capacity.ceiling(m.trust_tier),
                quality_score: m.quality_score,
                completed_recently: m.completed_recently,
                task_complexity: task.complexity,
            };
            RankedCandidate {
                annotator_id: m.annotator_id,
                score: score(&input, &weights),
            }
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.annotator_id.cmp(&b.annotator_id))
    });
    ranked
}

pub(crate) fn assignment_created_event(assignment: &TaskAssignment) -> PlatformEvent {
    PlatformEvent::new(names::ASSIGNMENT_CREATED)
        .with_source("task_assignment", assignment.id)
        .with_project(assignment.project_id)
        .with_actor(assignment.annotator_id)
        .with_payload(serde_json::json!({
            "assignment_id": assignment.id,
            "task_id": assignment.task_id,
            "event_type": names::ASSIGNMENT_CREATED,
        }))
}

impl Engine {
    /// Calculate the overlap of a project from its current members.
    pub async fn calculate_overlap(&self, project_id: DbId) -> EngineResult<OverlapCalculation> {
        Ok(self.load_context(project_id).await?.overlap)
    }

    /// Create up to `needed` assignments for one task. Returns the count created.
    pub async fn allocate(&self, project_id: DbId, task_id: DbId, needed: i64) -> EngineResult<i64> {
        let _guard = self.locks.acquire(project_id).await;
        let mut ctx = self.load_context(project_id).await?;
        let task = self.regular_task(project_id, task_id).await?;
        let exclude = self.store.live_annotators(task.id).await?;
        self.allocate_in(&mut ctx, &task, needed, &exclude).await
    }

    /// Top a task up to the project's effective overlap.
    pub async fn fill_task(&self, project_id: DbId, task_id: DbId) -> EngineResult<i64> {
        let _guard = self.locks.acquire(project_id).await;
        let mut ctx = self.load_context(project_id).await?;
        let task = self.regular_task(project_id, task_id).await?;
        let needed = needed_annotators(ctx.effective_overlap, task.live_assignments);
        if needed == 0 {
            return Ok(0);
        }
        let exclude = self.store.live_annotators(task.id).await?;
        self.allocate_in(&mut ctx, &task, needed, &exclude).await
    }

    /// Allocate every regular task of a project.
    pub async fn assign_project_tasks(&self, project_id: DbId) -> EngineResult<AllocationSummary> {
        let _guard = self.locks.acquire(project_id).await;
        self.assign_project_tasks_locked(project_id).await
    }

    pub(crate) async fn regular_task(&self, project_id: DbId, task_id: DbId) -> EngineResult<TaskLoad> {
        let task = self
            .store
            .find_task(task_id)
            .await?
            .filter(|t| t.project_id == project_id)
            .ok_or_else(|| EngineError::not_found("task", task_id))?;
        if task.is_probe {
            return Err(EngineError::validation(format!(
                "Task {task_id} is a probe and is not allocated"
            )));
        }
        self.store
            .task_load(task_id)
            .await?
            .ok_or_else(|| EngineError::not_found("task", task_id))
    }

    /// The allocation pass; the caller holds the project lock.
    pub(crate) async fn assign_project_tasks_locked(
        &self,
        project_id: DbId,
    ) -> EngineResult<AllocationSummary> {
        let mut ctx = self.load_context(project_id).await?;
        let mut summary = AllocationSummary {
            project_id,
            ..AllocationSummary::default()
        };

        if ctx.annotators().next().is_none() {
            summary.bindings_created = self.store.bind_all_active(project_id).await?;
            if summary.bindings_created > 0 {
                tracing::info!(
                    project_id,
                    bindings = summary.bindings_created,
                    "Bound all active annotators to project without members"
                );
                ctx = self.load_context(project_id).await?;
            }
        }
        summary.overlap = ctx.effective_overlap;

        let batch_size = ctx.config.allocation_batch_size;
        let mut cursor = None;
        loop {
            let page = self
                .store
                .list_task_page(project_id, cursor, batch_size)
                .await?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = Some(last.cursor());

            for task in &page {
                summary.tasks_examined += 1;
                match self.process_task(&mut ctx, task).await {
                    Ok((created, consolidated)) => {
                        summary.newly_assigned += created;
                        if consolidated {
                            summary.consolidated += 1;
                        }
                        let live = task.live_assignments + created;
                        if live >= ctx.effective_overlap {
                            summary.fully_assigned += 1;
                        } else if live > 0 {
                            summary.partially_assigned += 1;
                        } else {
                            summary.pending_capacity += 1;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(project_id, task_id = task.id, error = %e, "Task allocation failed");
                        summary.errors.push(TaskError {
                            task_id: task.id,
                            message: e.to_string(),
                        });
                    }
                }
            }

            if (page.len() as i64) < batch_size {
                break;
            }
        }

        tracing::info!(
            project_id,
            overlap = summary.overlap,
            tasks = summary.tasks_examined,
            newly_assigned = summary.newly_assigned,
            fully_assigned = summary.fully_assigned,
            partially_assigned = summary.partially_assigned,
            pending_capacity = summary.pending_capacity,
            consolidated = summary.consolidated,
            errors = summary.errors.len(),
            "Allocation pass complete"
        );
        Ok(summary)
    }

    /// Allocate one task of a pass and consolidate it when fully annotated.
    async fn process_task(
        &self,
        ctx: &mut ProjectContext,
        task: &TaskLoad,
    ) -> EngineResult<(i64, bool)> {
        let needed = needed_annotators(ctx.effective_overlap, task.live_assignments);
        let created = if needed > 0 {
            let exclude = self.store.live_annotators(task.id).await?;
            self.allocate_in(ctx, task, needed, &exclude).await?
        } else {
            0
        };

        let consolidated = if task.annotation_count >= ctx.effective_overlap {
            self.consolidate_with(ctx, task.id).await?.written
        } else {
            false
        };
        Ok((created, consolidated))
    }

    /// Create assignments for the top `needed` candidates of `task`.
    pub(crate) async fn allocate_in(
        &self,
        ctx: &mut ProjectContext,
        task: &TaskLoad,
        needed: i64,
        exclude: &[DbId],
    ) -> EngineResult<i64> {
        if needed <= 0 {
            return Ok(0);
        }
        let mut created = 0;
        for candidate in rank_candidates(ctx, task, exclude) {
            if created >= needed {
                break;
            }
            let input = NewAssignment {
                task_id: task.id,
                project_id: ctx.project_id,
                annotator_id: candidate.annotator_id,
                is_honeypot: false,
            };
            match self.store.create_assignment(&input).await? {
                Some(assignment) => {
                    created += 1;
                    ctx.adjust_load(candidate.annotator_id, 1);
                    tracing::debug!(
                        task_id = task.id,
                        annotator_id = candidate.annotator_id,
                        score = candidate.score,
                        "Assignment created"
                    );
                    self.publish(assignment_created_event(&assignment));
                }
                None => {
                    tracing::debug!(
                        task_id = task.id,
                        annotator_id = candidate.annotator_id,
                        "Live assignment already exists"
                    );
                }
            }
        }
        if created < needed {
            tracing::debug!(
                task_id = task.id,
                needed,
                created,
                "Pending capacity"
            );
        }
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use quorum_core::assignment::{AssignmentStrategy, ProjectRole};
    use quorum_core::config::AssignmentConfig;
    use quorum_core::trust::TrustTier;
    use quorum_db::models::annotator::MemberLoad;

    use super::*;

    fn member(id: DbId, tier: TrustTier, quality: Option<f64>, active: i64) -> MemberLoad {
        MemberLoad {
            annotator_id: id,
            display_name: format!("m{id}"),
            trust_tier: tier,
            quality_score: quality,
            role: ProjectRole::Annotator,
            active_count: active,
            completed_recently: false,
            completed_total: 0,
        }
    }

    fn task() -> TaskLoad {
        TaskLoad {
            id: 1,
            priority: 0,
            complexity: 50.0,
            live_assignments: 0,
            annotation_count: 0,
        }
    }

    #[test]
    fn full_novice_is_not_a_candidate() {
        let ctx = ProjectContext::new(
            1,
            AssignmentConfig::default(),
            vec![
                member(1, TrustTier::Novice, None, 5),
                member(2, TrustTier::Novice, None, 4),
            ],
        );
        let ranked = rank_candidates(&ctx, &task(), &[]);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].annotator_id, 2);
    }

    #[test]
    fn excluded_annotators_are_skipped() {
        let ctx = ProjectContext::new(
            1,
            AssignmentConfig::default(),
            vec![member(1, TrustTier::Novice, None, 0), member(2, TrustTier::Novice, None, 0)],
        );
        let ranked = rank_candidates(&ctx, &task(), &[1]);
        assert_eq!(ranked.iter().map(|c| c.annotator_id).collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn equal_scores_break_ties_by_id() {
        let ctx = ProjectContext::new(
            1,
            AssignmentConfig::default(),
            vec![
                member(7, TrustTier::Novice, None, 0),
                member(3, TrustTier::Novice, None, 0),
                member(5, TrustTier::Novice, None, 0),
            ],
        );
        let ids: Vec<DbId> = rank_candidates(&ctx, &task(), &[])
            .iter()
            .map(|c| c.annotator_id)
            .collect();
        assert_eq!(ids, vec![3, 5, 7]);
    }

    #[test]
    fn quality_first_prefers_strong_annotators() {
        let config = AssignmentConfig {
            assignment_strategy: AssignmentStrategy::QualityFirst,
            ..AssignmentConfig::default()
        };
        let ctx = ProjectContext::new(
            1,
            config,
            vec![
                member(1, TrustTier::Novice, Some(40.0), 0),
                member(2, TrustTier::Expert, Some(95.0), 3),
            ],
        );
        assert_eq!(rank_candidates(&ctx, &task(), &[])[0].annotator_id, 2);
    }

    #[test]
    fn lighter_load_ranks_higher() {
        let ctx = ProjectContext::new(
            1,
            AssignmentConfig::default(),
            vec![member(1, TrustTier::Novice, None, 4), member(2, TrustTier::Novice, None, 1)],
        );
        assert_eq!(rank_candidates(&ctx, &task(), &[])[0].annotator_id, 2);
    }
}
