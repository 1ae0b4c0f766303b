//! Domain-event entry points.
//!
//! Writes that change who can work on what (`import_tasks`, `join_project`,
//! submissions) commit first and then enqueue a job; the worker calls the
//! matching `on_*` handler. Handlers are idempotent so at-least-once
//! delivery is harmless.

use quorum_core::assignment::ProjectRole;
use quorum_core::jobs::JobName;
use quorum_core::types::DbId;
use quorum_db::models::annotator::ProjectAssignment;
use quorum_db::models::consensus::TaskConsensus;
use quorum_db::models::task::NewTask;
use serde::Serialize;

use crate::allocator::AllocationSummary;
use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::queue::JobRequest;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportSummary {
    pub project_id: DbId,
    pub task_ids: Vec<DbId>,
    /// Whether an allocation job was enqueued.
    pub allocation_enqueued: bool,
}

impl Engine {
    /// Insert a batch of tasks in one write and defer their allocation.
    ///
    /// A single task enqueues `task_created`; a batch enqueues one
    /// `assign_project_tasks` pass. Nothing is enqueued when the project
    /// has `auto_assign` off.
    pub async fn import_tasks(
        &self,
        project_id: DbId,
        tasks: Vec<NewTask>,
    ) -> EngineResult<ImportSummary> {
        self.ensure_project(project_id).await?;
        if tasks.is_empty() {
            return Err(EngineError::validation("No tasks to import"));
        }
        if let Some(bad) = tasks
            .iter()
            .filter_map(|t| t.complexity)
            .find(|c| !(0.0..=100.0).contains(c))
        {
            return Err(EngineError::validation(format!(
                "complexity must be between 0 and 100, got {bad}"
            )));
        }

        let config = self.store.load_config(project_id).await?;
        let task_ids = self.store.insert_tasks(project_id, &tasks).await?;
        tracing::info!(project_id, count = task_ids.len(), "Tasks imported");

        let allocation_enqueued = config.auto_assign;
        if allocation_enqueued {
            let request = match task_ids.as_slice() {
                [task_id] => JobRequest::new(JobName::TaskCreated)
                    .with_args(serde_json::json!({ "task_id": task_id })),
                _ => JobRequest::new(JobName::AssignProjectTasks),
            };
            self.enqueue(request.for_project(project_id)).await;
        }

        Ok(ImportSummary {
            project_id,
            task_ids,
            allocation_enqueued,
        })
    }

    /// Bind an annotator to a project.
    ///
    /// Returns `None` when the annotator is already an active member. A new
    /// annotator-role binding enqueues `annotator_joined`.
    pub async fn join_project(
        &self,
        project_id: DbId,
        annotator_id: DbId,
        role: ProjectRole,
    ) -> EngineResult<Option<ProjectAssignment>> {
        self.ensure_project(project_id).await?;
        let annotator = self
            .store
            .find_annotator(annotator_id)
            .await?
            .ok_or_else(|| EngineError::not_found("annotator", annotator_id))?;
        if !annotator.is_active {
            return Err(EngineError::validation(format!(
                "Annotator {annotator_id} is deactivated"
            )));
        }

        let binding = self
            .store
            .bind_annotator(project_id, annotator_id, role)
            .await?;
        if binding.is_some() {
            tracing::info!(project_id, annotator_id, %role, "Annotator joined project");
            let config = self.store.load_config(project_id).await?;
            if role == ProjectRole::Annotator && config.auto_assign {
                self.enqueue(
                    JobRequest::new(JobName::AnnotatorJoined)
                        .for_project(project_id)
                        .with_args(serde_json::json!({ "annotator_id": annotator_id })),
                )
                .await;
            }
        }
        Ok(binding)
    }

    /// `task_created`: top the new task up to the overlap.
    pub async fn on_task_created(&self, project_id: DbId, task_id: DbId) -> EngineResult<i64> {
        let created = self.fill_task(project_id, task_id).await?;
        tracing::debug!(project_id, task_id, created, "Handled task_created");
        Ok(created)
    }

    /// `annotator_joined`: new capacity may unblock pending tasks.
    pub async fn on_annotator_joined(
        &self,
        project_id: DbId,
        annotator_id: DbId,
    ) -> EngineResult<Option<AllocationSummary>> {
        tracing::debug!(project_id, annotator_id, "Handling annotator_joined");
        self.reassign_when_capacity_available(project_id).await
    }

    /// `assignment_completed`: consolidate the task, then schedule a
    /// capacity pass for the slot the submission freed.
    pub async fn on_assignment_completed(
        &self,
        project_id: DbId,
        task_id: DbId,
    ) -> EngineResult<TaskConsensus> {
        let consensus = self.consolidate(task_id).await?;
        self.enqueue(JobRequest::new(JobName::ReassignCapacity).for_project(project_id))
            .await;
        Ok(consensus)
    }
}
