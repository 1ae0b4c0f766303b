//! Operator-facing operations: bindings, strategy, status, configuration
//! and manual reassignment.
//!
//! Inputs arrive loosely typed (role and action names as strings, config as
//! JSON) and are parsed here so every caller gets the same validation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use quorum_core::assignment::{AssignmentStrategy, ProjectRole, ReassignAction};
use quorum_core::config::{AssignmentConfig, AssignmentConfigUpdate};
use quorum_core::jobs::JobName;
use quorum_core::overlap::OverlapCalculation;
use quorum_core::types::DbId;
use quorum_db::models::assignment::StatusCount;
use quorum_db::models::task::TaskCoverage;
use serde::{Deserialize, Serialize};

use crate::allocator::AllocationSummary;
use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::maintenance::{BalanceSummary, StaleSummary, TaskReassignment};
use crate::queue::JobRequest;

/// Outcome of binding a list of annotators to a project.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BindingSummary {
    pub project_id: DbId,
    pub role: ProjectRole,
    pub bound: Vec<DbId>,
    pub already_bound: Vec<DbId>,
    /// Ids with no matching annotator.
    pub missing: Vec<DbId>,
}

/// Snapshot of a project's assignment state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssignmentStatusReport {
    pub project_id: DbId,
    pub overlap: OverlapCalculation,
    pub required_overlap: Option<i64>,
    pub effective_overlap: i64,
    pub annotators: i64,
    pub reviewers: i64,
    pub coverage: TaskCoverage,
    pub assignments: BTreeMap<String, i64>,
    pub consensus: BTreeMap<String, i64>,
    pub config: AssignmentConfig,
}

/// Parameters of [`AssignmentApi::reassign`]. Each action reads the fields
/// it needs and ignores the rest.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReassignParams {
    /// `stale`: threshold override in hours.
    pub hours: Option<i64>,
    /// `task`: the task to move.
    pub task_id: Option<DbId>,
    /// `task`: the annotator giving the task up.
    pub annotator_id: Option<DbId>,
    /// `task`: optional recipient; the allocator chooses when absent.
    pub to_annotator_id: Option<DbId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReassignOutcome {
    Stale(StaleSummary),
    /// `summary` is absent when no annotator had capacity.
    Capacity { summary: Option<AllocationSummary> },
    Balance(BalanceSummary),
    Task(TaskReassignment),
}

fn counts_by_status(rows: Vec<StatusCount>) -> BTreeMap<String, i64> {
    rows.into_iter().map(|r| (r.status, r.count)).collect()
}

/// Operator entry points over a shared [`Engine`].
#[derive(Clone)]
pub struct AssignmentApi {
    engine: Arc<Engine>,
}

impl AssignmentApi {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Bind specific annotators to a project with the given role.
    ///
    /// Unknown ids are reported rather than failing the whole call. New
    /// annotator bindings trigger a capacity re-run.
    pub async fn assign_specific_annotators(
        &self,
        project_id: DbId,
        annotator_ids: &[DbId],
        role: &str,
    ) -> EngineResult<BindingSummary> {
        let role: ProjectRole = role.parse()?;
        if annotator_ids.is_empty() {
            return Err(EngineError::validation("annotator_ids must not be empty"));
        }
        self.engine.ensure_project(project_id).await?;

        let store = self.engine.store();
        let mut summary = BindingSummary {
            project_id,
            role,
            bound: Vec::new(),
            already_bound: Vec::new(),
            missing: Vec::new(),
        };
        let unique: BTreeSet<DbId> = annotator_ids.iter().copied().collect();
        for annotator_id in unique {
            if store.find_annotator(annotator_id).await?.is_none() {
                summary.missing.push(annotator_id);
                continue;
            }
            match store.bind_annotator(project_id, annotator_id, role).await? {
                Some(_) => summary.bound.push(annotator_id),
                None => summary.already_bound.push(annotator_id),
            }
        }

        tracing::info!(
            project_id,
            %role,
            bound = summary.bound.len(),
            already_bound = summary.already_bound.len(),
            missing = summary.missing.len(),
            "Annotators bound",
        );
        if role == ProjectRole::Annotator && !summary.bound.is_empty() {
            self.engine
                .enqueue(JobRequest::new(JobName::ReassignCapacity).for_project(project_id))
                .await;
        }
        Ok(summary)
    }

    /// Optionally switch the scoring strategy, then run a full allocation pass.
    pub async fn auto_assign(
        &self,
        project_id: DbId,
        strategy: Option<&str>,
    ) -> EngineResult<AllocationSummary> {
        if let Some(name) = strategy {
            let strategy: AssignmentStrategy = name.parse()?;
            self.engine.ensure_project(project_id).await?;
            let store = self.engine.store();
            let mut config = store.load_config(project_id).await?;
            if config.assignment_strategy != strategy {
                config.assignment_strategy = strategy;
                store.save_config(project_id, &config).await?;
                tracing::info!(project_id, %strategy, "Assignment strategy changed");
            }
        }
        self.engine.assign_project_tasks(project_id).await
    }

    pub async fn get_assignment_status(
        &self,
        project_id: DbId,
    ) -> EngineResult<AssignmentStatusReport> {
        let ctx = self.engine.load_context(project_id).await?;
        let store = self.engine.store();
        let coverage = store
            .task_coverage(project_id, ctx.effective_overlap)
            .await?;
        let assignments = counts_by_status(store.assignment_status_counts(project_id).await?);
        let consensus = counts_by_status(store.consensus_status_counts(project_id).await?);
        let reviewers = ctx
            .members
            .iter()
            .filter(|m| m.role == ProjectRole::Reviewer)
            .count() as i64;

        Ok(AssignmentStatusReport {
            project_id,
            overlap: ctx.overlap,
            required_overlap: ctx.config.required_overlap,
            effective_overlap: ctx.effective_overlap,
            annotators: ctx.annotators().count() as i64,
            reviewers,
            coverage,
            assignments,
            consensus,
            config: ctx.config,
        })
    }

    pub async fn get_assignment_config(&self, project_id: DbId) -> EngineResult<AssignmentConfig> {
        self.engine.ensure_project(project_id).await?;
        self.engine.store().load_config(project_id).await
    }

    /// Merge a partial JSON update into the stored configuration.
    ///
    /// Unknown fields and out-of-range values are rejected and nothing is
    /// saved.
    pub async fn set_assignment_config(
        &self,
        project_id: DbId,
        fields: serde_json::Value,
    ) -> EngineResult<AssignmentConfig> {
        let update: AssignmentConfigUpdate = serde_json::from_value(fields)
            .map_err(|e| EngineError::validation(format!("Invalid assignment config: {e}")))?;
        self.engine.ensure_project(project_id).await?;

        let store = self.engine.store();
        let current = store.load_config(project_id).await?;
        let next = current.apply(&update)?;
        store.save_config(project_id, &next).await?;
        tracing::info!(project_id, "Assignment config updated");
        Ok(next)
    }

    /// Run one manual reassignment action: `stale`, `capacity`, `balance`
    /// or `task`.
    pub async fn reassign(
        &self,
        project_id: DbId,
        action: &str,
        params: ReassignParams,
    ) -> EngineResult<ReassignOutcome> {
        let action: ReassignAction = action.parse()?;
        let outcome = match action {
            ReassignAction::Stale => ReassignOutcome::Stale(
                self.engine
                    .reassign_stale_tasks(project_id, params.hours)
                    .await?,
            ),
            ReassignAction::Capacity => ReassignOutcome::Capacity {
                summary: self
                    .engine
                    .reassign_when_capacity_available(project_id)
                    .await?,
            },
            ReassignAction::Balance => {
                ReassignOutcome::Balance(self.engine.balance_workload(project_id).await?)
            }
            ReassignAction::Task => {
                let (Some(task_id), Some(annotator_id)) = (params.task_id, params.annotator_id)
                else {
                    return Err(EngineError::validation(
                        "The task action requires task_id and annotator_id",
                    ));
                };
                ReassignOutcome::Task(
                    self.engine
                        .reassign_task(project_id, task_id, annotator_id, params.to_annotator_id)
                        .await?,
                )
            }
        };
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use quorum_core::error::CoreError;
    use quorum_db::models::annotator::CreateAnnotator;
    use quorum_events::EventBus;
    use serde_json::json;

    use super::*;
    use crate::queue::MemoryJobQueue;
    use crate::store::MemoryStore;

    fn annotator(name: &str) -> CreateAnnotator {
        CreateAnnotator {
            display_name: name.to_string(),
            trust_tier: None,
            quality_score: None,
        }
    }

    fn setup() -> (AssignmentApi, Arc<MemoryStore>, Arc<MemoryJobQueue>) {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryJobQueue::new());
        let engine = Engine::new(store.clone(), queue.clone(), Arc::new(EventBus::default()));
        (AssignmentApi::new(Arc::new(engine)), store, queue)
    }

    #[tokio::test]
    async fn binding_reports_each_id() {
        let (api, store, queue) = setup();
        let project = store.create_project("p");
        let a = store.create_annotator(&annotator("a"));

        let first = api
            .assign_specific_annotators(project.id, &[a.id, 999, a.id], "annotator")
            .await
            .unwrap();
        assert_eq!(first.bound, vec![a.id]);
        assert_eq!(first.missing, vec![999]);
        assert_eq!(queue.drain().len(), 1);

        let second = api
            .assign_specific_annotators(project.id, &[a.id], "annotator")
            .await
            .unwrap();
        assert_eq!(second.already_bound, vec![a.id]);
        assert!(queue.pending().is_empty());
    }

    #[tokio::test]
    async fn invalid_role_rejected() {
        let (api, store, _) = setup();
        let project = store.create_project("p");
        let err = api
            .assign_specific_annotators(project.id, &[1], "owner")
            .await
            .unwrap_err();
        assert_matches!(err, EngineError::Core(CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn config_update_validated_before_save() {
        let (api, store, _) = setup();
        let project = store.create_project("p");

        let err = api
            .set_assignment_config(project.id, json!({"required_overlap": 4}))
            .await
            .unwrap_err();
        assert!(err.is_client_error());
        let err = api
            .set_assignment_config(project.id, json!({"overlap": 2}))
            .await
            .unwrap_err();
        assert!(err.is_client_error());
        assert_eq!(api.get_assignment_config(project.id).await.unwrap().required_overlap, None);

        let saved = api
            .set_assignment_config(project.id, json!({"required_overlap": 2}))
            .await
            .unwrap();
        assert_eq!(saved.required_overlap, Some(2));
        assert_eq!(api.get_assignment_config(project.id).await.unwrap(), saved);
    }

    #[tokio::test]
    async fn auto_assign_persists_strategy() {
        let (api, store, _) = setup();
        let project = store.create_project("p");
        api.auto_assign(project.id, Some("quality_first")).await.unwrap();
        let config = api.get_assignment_config(project.id).await.unwrap();
        assert_eq!(config.assignment_strategy, AssignmentStrategy::QualityFirst);

        let err = api.auto_assign(project.id, Some("random")).await.unwrap_err();
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn unknown_reassign_action_rejected() {
        let (api, store, _) = setup();
        let project = store.create_project("p");
        let err = api
            .reassign(project.id, "shuffle", ReassignParams::default())
            .await
            .unwrap_err();
        assert!(err.is_client_error());

        let err = api
            .reassign(project.id, "task", ReassignParams::default())
            .await
            .unwrap_err();
        assert_matches!(err, EngineError::Core(CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn status_of_unknown_project_is_not_found() {
        let (api, _, _) = setup();
        let err = api.get_assignment_status(42).await.unwrap_err();
        assert_matches!(err, EngineError::Core(CoreError::NotFound { .. }));
    }
}
