//! Annotator-facing operations: fetching, starting, submitting and
//! dropping work.

use quorum_core::assignment::{AssignmentStatus, ProjectRole};
use quorum_core::jobs::JobName;
use quorum_core::types::DbId;
use quorum_db::models::assignment::{NewAssignment, TaskAssignment};
use quorum_db::models::trust::ProbeOutcome;
use serde::Serialize;

use crate::allocator::assignment_created_event;
use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::queue::JobRequest;

/// A task handed to an annotator. Probes and regular tasks look the same.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServedTask {
    pub assignment_id: DbId,
    pub task_id: DbId,
    pub status: AssignmentStatus,
    pub data: serde_json::Value,
}

/// Result of a submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionOutcome {
    pub assignment_id: DbId,
    pub task_id: DbId,
    pub annotation_id: DbId,
    /// Set when the task was a probe. Never shown to the annotator.
    #[serde(skip)]
    pub probe: Option<ProbeOutcome>,
}

fn ensure_owner(assignment: &TaskAssignment, annotator_id: DbId) -> EngineResult<()> {
    if assignment.annotator_id == annotator_id {
        Ok(())
    } else {
        Err(EngineError::validation(format!(
            "Assignment {} does not belong to annotator {annotator_id}",
            assignment.id
        )))
    }
}

impl Engine {
    /// The next piece of work for an annotator.
    ///
    /// Serves a probe when injection fires, otherwise the oldest open
    /// assignment, otherwise claims one new task that still needs
    /// annotators. `None` means there is nothing to do (or no capacity).
    pub async fn next_task(
        &self,
        project_id: DbId,
        annotator_id: DbId,
    ) -> EngineResult<Option<ServedTask>> {
        let ctx = self.load_context(project_id).await?;
        let member = ctx.member(annotator_id).ok_or_else(|| {
            EngineError::validation(format!(
                "Annotator {annotator_id} is not an active member of project {project_id}"
            ))
        })?;
        if member.role != ProjectRole::Annotator {
            return Err(EngineError::validation(format!(
                "Annotator {annotator_id} reviews project {project_id} and takes no annotation work"
            )));
        }
        let has_capacity = ctx.has_capacity(member);

        if has_capacity && self.should_inject(project_id, annotator_id).await?.should_inject() {
            if let Some(probe) = self.store.find_unseen_probe(project_id, annotator_id).await? {
                let input = NewAssignment {
                    task_id: probe.task_id,
                    project_id,
                    annotator_id,
                    is_honeypot: true,
                };
                if let Some(assignment) = self.store.create_assignment(&input).await? {
                    tracing::debug!(project_id, annotator_id, probe_id = probe.id, "Probe served");
                    return self.serve(assignment).await.map(Some);
                }
            }
        }

        if let Some(open) = self
            .store
            .oldest_open_assignment(project_id, annotator_id)
            .await?
        {
            return self.serve(open).await.map(Some);
        }
        if !has_capacity {
            return Ok(None);
        }
        self.claim_new_task(project_id, annotator_id).await
    }

    /// Claim the first open task for the annotator under the project lock.
    async fn claim_new_task(
        &self,
        project_id: DbId,
        annotator_id: DbId,
    ) -> EngineResult<Option<ServedTask>> {
        let _guard = self.locks.acquire(project_id).await;
        let ctx = self.load_context(project_id).await?;
        let Some(member) = ctx.member(annotator_id) else {
            return Ok(None);
        };
        if !ctx.has_capacity(member) {
            return Ok(None);
        }

        let open = self
            .store
            .list_open_tasks_for(project_id, annotator_id, ctx.effective_overlap, 1)
            .await?;
        for task in open {
            let input = NewAssignment {
                task_id: task.id,
                project_id,
                annotator_id,
                is_honeypot: false,
            };
            if let Some(assignment) = self.store.create_assignment(&input).await? {
                self.publish(assignment_created_event(&assignment));
                return self.serve(assignment).await.map(Some);
            }
        }
        Ok(None)
    }

    async fn serve(&self, assignment: TaskAssignment) -> EngineResult<ServedTask> {
        let task = self
            .store
            .find_task(assignment.task_id)
            .await?
            .ok_or_else(|| EngineError::not_found("task", assignment.task_id))?;
        Ok(ServedTask {
            assignment_id: assignment.id,
            task_id: task.id,
            status: assignment.status,
            data: task.data,
        })
    }

    /// `assigned -> in_progress`. Starting an in-progress assignment is a no-op.
    pub async fn start_assignment(
        &self,
        assignment_id: DbId,
        annotator_id: DbId,
    ) -> EngineResult<TaskAssignment> {
        let assignment = self
            .store
            .find_assignment(assignment_id)
            .await?
            .ok_or_else(|| EngineError::not_found("task_assignment", assignment_id))?;
        ensure_owner(&assignment, annotator_id)?;
        if assignment.status == AssignmentStatus::InProgress {
            return Ok(assignment);
        }
        assignment
            .status
            .validate_transition(AssignmentStatus::InProgress)?;
        self.store
            .transition_assignment(
                assignment_id,
                AssignmentStatus::Assigned,
                AssignmentStatus::InProgress,
            )
            .await?
            .ok_or_else(|| {
                EngineError::conflict(format!("Assignment {assignment_id} changed concurrently"))
            })
    }

    /// Submit a result for an open assignment.
    ///
    /// Probe submissions are graded in the same write. Regular submissions
    /// enqueue `assignment_completed` so consolidation runs in the worker.
    pub async fn submit_annotation(
        &self,
        assignment_id: DbId,
        annotator_id: DbId,
        result: serde_json::Value,
    ) -> EngineResult<SubmissionOutcome> {
        let assignment = self
            .store
            .find_assignment(assignment_id)
            .await?
            .ok_or_else(|| EngineError::not_found("task_assignment", assignment_id))?;
        ensure_owner(&assignment, annotator_id)?;
        if !assignment.status.is_active() {
            return Err(EngineError::conflict(format!(
                "Assignment {assignment_id} is {}; only open assignments accept submissions",
                assignment.status
            )));
        }

        if assignment.is_honeypot {
            match self.store.find_probe_by_task(assignment.task_id).await? {
                Some(probe) => {
                    let outcome = self.grade_probe(&assignment, &probe, &result).await?;
                    return Ok(SubmissionOutcome {
                        assignment_id,
                        task_id: assignment.task_id,
                        annotation_id: outcome.annotation_id,
                        probe: Some(outcome),
                    });
                }
                None => tracing::warn!(
                    assignment_id,
                    task_id = assignment.task_id,
                    "Honeypot assignment without a probe; storing as a regular annotation"
                ),
            }
        }

        let submitted = self
            .store
            .submit_annotation(assignment_id, &result)
            .await?
            .ok_or_else(|| {
                EngineError::conflict(format!("Assignment {assignment_id} is no longer open"))
            })?;
        tracing::debug!(
            assignment_id,
            task_id = assignment.task_id,
            annotation_id = submitted.annotation.id,
            "Annotation submitted"
        );
        self.enqueue(
            JobRequest::new(JobName::AssignmentCompleted)
                .for_project(assignment.project_id)
                .with_args(serde_json::json!({ "task_id": assignment.task_id })),
        )
        .await;

        Ok(SubmissionOutcome {
            assignment_id,
            task_id: assignment.task_id,
            annotation_id: submitted.annotation.id,
            probe: None,
        })
    }

    /// Remove an unsubmitted assignment and let the task be re-allocated.
    /// Quality-check assignments stay until answered.
    pub async fn unassign(&self, assignment_id: DbId) -> EngineResult<TaskAssignment> {
        let assignment = self
            .store
            .find_assignment(assignment_id)
            .await?
            .ok_or_else(|| EngineError::not_found("task_assignment", assignment_id))?;
        if assignment.status == AssignmentStatus::Completed {
            return Err(EngineError::conflict(format!(
                "Assignment {assignment_id} has been submitted and cannot be unassigned"
            )));
        }
        if assignment.is_honeypot {
            return Err(EngineError::conflict(format!(
                "Assignment {assignment_id} is a quality check and cannot be unassigned"
            )));
        }
        if !self.store.delete_assignment(assignment_id).await? {
            return Err(EngineError::not_found("task_assignment", assignment_id));
        }
        tracing::info!(
            assignment_id,
            task_id = assignment.task_id,
            annotator_id = assignment.annotator_id,
            "Assignment removed"
        );
        self.enqueue(JobRequest::new(JobName::ReassignCapacity).for_project(assignment.project_id))
            .await;
        Ok(assignment)
    }
}
