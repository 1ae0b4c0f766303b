//! Idempotent maintenance passes.
//!
//! Each pass takes the project lock, works from a fresh [`ProjectContext`]
//! and reports what it changed. Running a pass twice in a row changes
//! nothing the second time.

use chrono::{Duration, Utc};
use quorum_core::assignment::{AssignmentStatus, ProjectRole};
use quorum_core::consensus::ConsensusStatus;
use quorum_core::leaderboard::{qualifies_for_bonus, STREAK_LENGTH};
use quorum_core::overlap::needed_annotators;
use quorum_core::types::DbId;
use quorum_db::models::assignment::NewAssignment;
use serde::Serialize;

use crate::allocator::{assignment_created_event, AllocationSummary};
use crate::engine::{Engine, ProjectContext};
use crate::error::{EngineError, EngineResult};

/// Page size for maintenance scans.
const SCAN_BATCH_SIZE: i64 = 200;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StaleSummary {
    pub project_id: DbId,
    pub threshold_hours: i64,
    pub expired: i64,
    pub replaced: i64,
    /// Expired assignments no other annotator could take over yet.
    pub unreplaced: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BalanceSummary {
    pub project_id: DbId,
    pub average_load: f64,
    pub underloaded: i64,
    /// Open tasks newly given to under-loaded annotators.
    pub assigned_open: i64,
    /// Never-started assignments moved from busy annotators.
    pub transferred: i64,
}

/// Result of manually moving one annotator off a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskReassignment {
    pub task_id: DbId,
    pub from_annotator_id: DbId,
    pub expired_assignment_id: DbId,
    /// The named recipient, when one was given.
    pub to_annotator_id: Option<DbId>,
    pub replacements: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FinalizeSummary {
    pub project_id: DbId,
    pub finalized: i64,
    pub failed: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StreakSummary {
    pub project_id: DbId,
    pub awarded: i64,
}

impl Engine {
    /// Re-run allocation when at least one annotator has spare capacity.
    ///
    /// Returns `None` (doing nothing) when everyone is at their ceiling.
    pub async fn reassign_when_capacity_available(
        &self,
        project_id: DbId,
    ) -> EngineResult<Option<AllocationSummary>> {
        let _guard = self.locks.acquire(project_id).await;
        let ctx = self.load_context(project_id).await?;
        if ctx.annotators().next().is_some() && !ctx.any_capacity() {
            tracing::debug!(project_id, "No annotator has spare capacity; skipping");
            return Ok(None);
        }
        self.assign_project_tasks_locked(project_id).await.map(Some)
    }

    /// Expire never-started assignments older than `hours` and hand each
    /// task to a different eligible annotator.
    ///
    /// `hours` defaults to the project's `stale_assignment_hours`.
    pub async fn reassign_stale_tasks(
        &self,
        project_id: DbId,
        hours: Option<i64>,
    ) -> EngineResult<StaleSummary> {
        let _guard = self.locks.acquire(project_id).await;
        let mut ctx = self.load_context(project_id).await?;
        let hours = hours.unwrap_or(ctx.config.stale_assignment_hours);
        if hours < 1 {
            return Err(EngineError::validation(format!(
                "hours must be at least 1, got {hours}"
            )));
        }
        let cutoff = Utc::now() - Duration::hours(hours);
        let mut summary = StaleSummary {
            project_id,
            threshold_hours: hours,
            ..StaleSummary::default()
        };

        loop {
            let stale = self
                .store
                .list_stale_assignments(project_id, cutoff, SCAN_BATCH_SIZE)
                .await?;
            let batch_len = stale.len() as i64;

            for assignment in stale {
                let expired = self
                    .store
                    .transition_assignment(
                        assignment.id,
                        AssignmentStatus::Assigned,
                        AssignmentStatus::Expired,
                    )
                    .await?;
                if expired.is_none() {
                    continue;
                }
                summary.expired += 1;
                ctx.adjust_load(assignment.annotator_id, -1);

                let replaced = self
                    .replace_expired(&mut ctx, assignment.task_id, assignment.annotator_id)
                    .await?;
                if replaced > 0 {
                    summary.replaced += 1;
                } else {
                    summary.unreplaced += 1;
                }
                tracing::debug!(
                    assignment_id = assignment.id,
                    task_id = assignment.task_id,
                    annotator_id = assignment.annotator_id,
                    replaced,
                    "Stale assignment expired"
                );
            }

            if batch_len < SCAN_BATCH_SIZE {
                break;
            }
        }

        tracing::info!(
            project_id,
            hours,
            expired = summary.expired,
            replaced = summary.replaced,
            unreplaced = summary.unreplaced,
            "Stale assignment pass complete"
        );
        Ok(summary)
    }

    /// Expire `from_annotator`'s live assignment on a task.
    ///
    /// With `to_annotator` the task goes to that annotator (who must be a
    /// member with spare capacity); otherwise the allocator picks a
    /// replacement other than `from_annotator`. Submitted work cannot be
    /// moved.
    pub async fn reassign_task(
        &self,
        project_id: DbId,
        task_id: DbId,
        from_annotator: DbId,
        to_annotator: Option<DbId>,
    ) -> EngineResult<TaskReassignment> {
        let _guard = self.locks.acquire(project_id).await;
        let mut ctx = self.load_context(project_id).await?;
        self.regular_task(project_id, task_id).await?;
        let current = self
            .store
            .find_live_assignment(task_id, from_annotator)
            .await?
            .ok_or_else(|| {
                EngineError::validation(format!(
                    "Annotator {from_annotator} holds no live assignment on task {task_id}"
                ))
            })?;
        if current.status == AssignmentStatus::Completed {
            return Err(EngineError::conflict(format!(
                "Assignment {} has been submitted and cannot be reassigned",
                current.id
            )));
        }
        let mut result = TaskReassignment {
            task_id,
            from_annotator_id: from_annotator,
            expired_assignment_id: current.id,
            to_annotator_id: to_annotator,
            replacements: 0,
        };
        let changed_concurrently =
            || EngineError::conflict(format!("Assignment {} changed concurrently", current.id));

        let Some(to) = to_annotator else {
            self.store
                .transition_assignment(current.id, current.status, AssignmentStatus::Expired)
                .await?
                .ok_or_else(changed_concurrently)?;
            ctx.adjust_load(from_annotator, -1);
            result.replacements = self.replace_expired(&mut ctx, task_id, from_annotator).await?;
            tracing::info!(task_id, from = from_annotator, replacements = result.replacements, "Task reassigned");
            return Ok(result);
        };

        if to == from_annotator {
            return Err(EngineError::validation(
                "The target annotator already holds this assignment",
            ));
        }
        let target = ctx
            .member(to)
            .filter(|m| m.role == ProjectRole::Annotator)
            .ok_or_else(|| {
                EngineError::validation(format!(
                    "Annotator {to} is not an active annotator of project {project_id}"
                ))
            })?;
        if !ctx.has_capacity(target) {
            return Err(EngineError::conflict(format!("Annotator {to} is at capacity")));
        }
        if self.store.find_live_assignment(task_id, to).await?.is_some() {
            return Err(EngineError::conflict(format!(
                "Annotator {to} already holds an assignment on task {task_id}"
            )));
        }

        let created = if current.status == AssignmentStatus::Assigned {
            self.store.transfer_assignment(current.id, to).await?
        } else {
            self.store
                .transition_assignment(current.id, current.status, AssignmentStatus::Expired)
                .await?
                .ok_or_else(changed_concurrently)?;
            self.store
                .create_assignment(&NewAssignment {
                    task_id,
                    project_id,
                    annotator_id: to,
                    is_honeypot: current.is_honeypot,
                })
                .await?
        };
        let created = created.ok_or_else(changed_concurrently)?;
        result.replacements = 1;
        tracing::info!(task_id, from = from_annotator, to, "Task reassigned");
        self.publish(assignment_created_event(&created));
        Ok(result)
    }

    /// Top a task back up after an expiry, never choosing `previous`.
    pub(crate) async fn replace_expired(
        &self,
        ctx: &mut ProjectContext,
        task_id: DbId,
        previous: DbId,
    ) -> EngineResult<i64> {
        let Some(task) = self.store.task_load(task_id).await? else {
            return Ok(0);
        };
        let needed = needed_annotators(ctx.effective_overlap, task.live_assignments);
        if needed == 0 {
            return Ok(0);
        }
        let mut exclude = self.store.live_annotators(task_id).await?;
        exclude.push(previous);
        self.allocate_in(ctx, &task, needed, &exclude).await
    }

    /// Give under-loaded annotators more work.
    ///
    /// Annotators whose active count is below `balance_low_ratio` times the
    /// average receive up to `balance_batch_size` tasks: first tasks still
    /// short of annotators, then never-started assignments moved from
    /// annotators above the average.
    pub async fn balance_workload(&self, project_id: DbId) -> EngineResult<BalanceSummary> {
        let _guard = self.locks.acquire(project_id).await;
        let mut ctx = self.load_context(project_id).await?;
        let mut summary = BalanceSummary {
            project_id,
            ..BalanceSummary::default()
        };

        let loads: Vec<i64> = ctx.annotators().map(|m| m.active_count).collect();
        if loads.is_empty() {
            return Ok(summary);
        }
        let average = loads.iter().sum::<i64>() as f64 / loads.len() as f64;
        summary.average_load = average;
        let threshold = average * ctx.config.balance_low_ratio;

        let mut underloaded: Vec<(DbId, i64)> = ctx
            .annotators()
            .filter(|m| (m.active_count as f64) < threshold && ctx.has_capacity(m))
            .map(|m| (m.annotator_id, m.active_count))
            .collect();
        underloaded.sort_by_key(|&(id, load)| (load, id));
        summary.underloaded = underloaded.len() as i64;

        for (annotator_id, _) in underloaded {
            let Some(member) = ctx.member(annotator_id) else {
                continue;
            };
            let mut budget = ctx
                .config
                .balance_batch_size
                .min(ctx.remaining_capacity(member));
            if budget <= 0 {
                continue;
            }

            let open = self
                .store
                .list_open_tasks_for(project_id, annotator_id, ctx.effective_overlap, budget)
                .await?;
            for task in open {
                if budget == 0 {
                    break;
                }
                let input = NewAssignment {
                    task_id: task.id,
                    project_id,
                    annotator_id,
                    is_honeypot: false,
                };
                if let Some(assignment) = self.store.create_assignment(&input).await? {
                    budget -= 1;
                    summary.assigned_open += 1;
                    ctx.adjust_load(annotator_id, 1);
                    self.publish(assignment_created_event(&assignment));
                }
            }

            if budget > 0 {
                let moved = self
                    .transfer_from_busy(&mut ctx, annotator_id, average, budget)
                    .await?;
                summary.transferred += moved;
            }
        }

        tracing::info!(
            project_id,
            average_load = summary.average_load,
            underloaded = summary.underloaded,
            assigned_open = summary.assigned_open,
            transferred = summary.transferred,
            "Workload balance pass complete"
        );
        Ok(summary)
    }

    /// Move up to `budget` never-started assignments to `recipient` from
    /// annotators whose load is above `average`, busiest first.
    async fn transfer_from_busy(
        &self,
        ctx: &mut ProjectContext,
        recipient: DbId,
        average: f64,
        budget: i64,
    ) -> EngineResult<i64> {
        let mut donors: Vec<(DbId, i64)> = ctx
            .annotators()
            .filter(|m| m.annotator_id != recipient && m.active_count as f64 > average)
            .map(|m| (m.annotator_id, m.active_count))
            .collect();
        donors.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        let mut moved = 0;
        for (donor, _) in donors {
            if moved >= budget {
                break;
            }
            let unstarted = self
                .store
                .list_unstarted(ctx.project_id, donor, budget - moved)
                .await?;
            for assignment in unstarted {
                let donor_load = ctx.member(donor).map_or(0, |m| m.active_count);
                if moved >= budget || donor_load as f64 <= average {
                    break;
                }
                if let Some(created) = self
                    .store
                    .transfer_assignment(assignment.id, recipient)
                    .await?
                {
                    moved += 1;
                    ctx.adjust_load(donor, -1);
                    ctx.adjust_load(recipient, 1);
                    tracing::debug!(
                        task_id = assignment.task_id,
                        from = donor,
                        to = recipient,
                        "Assignment transferred"
                    );
                    self.publish(assignment_created_event(&created));
                }
            }
        }
        Ok(moved)
    }

    /// Finalize every `consensus_reached` task of a project.
    pub async fn finalize_reached(&self, project_id: DbId) -> EngineResult<FinalizeSummary> {
        self.ensure_project(project_id).await?;
        let mut summary = FinalizeSummary {
            project_id,
            ..FinalizeSummary::default()
        };
        loop {
            let reached = self
                .store
                .list_consensus(project_id, ConsensusStatus::ConsensusReached, SCAN_BATCH_SIZE)
                .await?;
            let batch_len = reached.len() as i64;
            let mut progressed = false;
            for record in reached {
                match self.finalize_consensus(record.task_id).await {
                    Ok(_) => {
                        summary.finalized += 1;
                        progressed = true;
                    }
                    Err(e) => {
                        summary.failed += 1;
                        tracing::warn!(project_id, task_id = record.task_id, error = %e, "Finalize failed");
                    }
                }
            }
            if !progressed || batch_len < SCAN_BATCH_SIZE {
                break;
            }
        }
        if summary.finalized > 0 || summary.failed > 0 {
            tracing::info!(
                project_id,
                finalized = summary.finalized,
                failed = summary.failed,
                "Finalize pass complete"
            );
        }
        Ok(summary)
    }

    /// Grant streak bonuses to members whose latest probes all passed.
    pub async fn award_streak_bonuses(&self, project_id: DbId) -> EngineResult<StreakSummary> {
        self.ensure_project(project_id).await?;
        let members = self.store.list_members(project_id).await?;
        let mut summary = StreakSummary {
            project_id,
            ..StreakSummary::default()
        };

        for member in members {
            let Some(record) = self.store.find_trust_record(member.annotator_id).await? else {
                continue;
            };
            let outcomes = self
                .store
                .recent_probe_outcomes(member.annotator_id, STREAK_LENGTH as i64)
                .await?;
            if !qualifies_for_bonus(&outcomes, record.total, record.last_streak_bonus_total) {
                continue;
            }
            if let Some(quality) = self
                .store
                .award_streak_bonus(member.annotator_id, record.last_streak_bonus_total, record.total)
                .await?
            {
                summary.awarded += 1;
                tracing::info!(
                    project_id,
                    annotator_id = member.annotator_id,
                    quality,
                    "Streak bonus awarded"
                );
            }
        }
        Ok(summary)
    }
}
