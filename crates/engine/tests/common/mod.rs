//! Shared fixtures for the engine integration tests.
//!
//! Every test gets its own [`Harness`]: an [`Engine`] over a fresh
//! [`MemoryStore`], a [`MemoryJobQueue`] that records enqueued jobs and a
//! seeded RNG so probe injection is reproducible.

#![allow(dead_code)]

use std::sync::Arc;

use quorum_core::assignment::ProjectRole;
use quorum_core::trust::TrustTier;
use quorum_core::types::DbId;
use quorum_db::models::annotator::{Annotator, CreateAnnotator, MemberLoad};
use quorum_db::models::assignment::TaskAssignment;
use quorum_db::models::task::NewTask;
use quorum_engine::{AssignmentApi, AssignmentStore, Engine, MemoryJobQueue, MemoryStore};
use quorum_events::EventBus;
use serde_json::json;

pub struct Harness {
    pub engine: Arc<Engine>,
    pub store: Arc<MemoryStore>,
    pub queue: Arc<MemoryJobQueue>,
    pub bus: Arc<EventBus>,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryJobQueue::new());
        let bus = Arc::new(EventBus::default());
        let engine = Engine::new(store.clone(), queue.clone(), bus.clone()).with_seed(7);
        Self {
            engine: Arc::new(engine),
            store,
            queue,
            bus,
        }
    }

    pub fn api(&self) -> AssignmentApi {
        AssignmentApi::new(self.engine.clone())
    }

    pub fn project(&self) -> DbId {
        self.store.create_project("sentiment").id
    }

    /// An unbound novice annotator without history.
    pub fn annotator(&self, name: &str) -> DbId {
        self.annotator_with(name, None, None)
    }

    pub fn annotator_with(&self, name: &str, tier: Option<TrustTier>, quality: Option<f64>) -> DbId {
        self.store
            .create_annotator(&CreateAnnotator {
                display_name: name.to_string(),
                trust_tier: tier,
                quality_score: quality,
            })
            .id
    }

    /// Create an annotator and bind it to `project_id` with the annotator role.
    pub async fn member(&self, project_id: DbId, name: &str) -> DbId {
        let id = self.annotator(name);
        self.engine
            .join_project(project_id, id, ProjectRole::Annotator)
            .await
            .unwrap();
        id
    }

    pub async fn members(&self, project_id: DbId, n: usize) -> Vec<DbId> {
        let mut ids = Vec::with_capacity(n);
        for i in 0..n {
            ids.push(self.member(project_id, &format!("annotator-{i}")).await);
        }
        ids
    }

    /// Insert regular tasks without enqueueing allocation.
    pub async fn tasks(&self, project_id: DbId, n: usize) -> Vec<DbId> {
        let batch: Vec<NewTask> = (0..n)
            .map(|i| NewTask {
                data: json!({"text": format!("item {i}")}),
                ..NewTask::default()
            })
            .collect();
        self.store.insert_tasks(project_id, &batch).await.unwrap()
    }

    pub async fn configure(&self, project_id: DbId, fields: serde_json::Value) {
        self.api()
            .set_assignment_config(project_id, fields)
            .await
            .unwrap();
    }

    pub async fn annotator_row(&self, annotator_id: DbId) -> Annotator {
        self.store
            .find_annotator(annotator_id)
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn member_loads(&self, project_id: DbId) -> Vec<MemberLoad> {
        self.store.list_members(project_id).await.unwrap()
    }

    /// Assignments of a task that still count towards its overlap.
    pub fn live_assignments(&self, task_id: DbId) -> Vec<TaskAssignment> {
        self.store
            .assignments_for_task(task_id)
            .into_iter()
            .filter(|a| a.status.is_live())
            .collect()
    }

    /// Submit `result` on the annotator's live assignment of `task_id`.
    pub async fn submit(&self, task_id: DbId, annotator_id: DbId, result: serde_json::Value) {
        let assignment = self
            .live_assignments(task_id)
            .into_iter()
            .find(|a| a.annotator_id == annotator_id)
            .unwrap();
        self.engine
            .submit_annotation(assignment.id, annotator_id, result)
            .await
            .unwrap();
    }
}
