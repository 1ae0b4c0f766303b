//! Stale reassignment, workload balancing and manual reassignment.

mod common;

use assert_matches::assert_matches;
use chrono::Duration;
use common::Harness;
use quorum_core::error::CoreError;
use quorum_core::types::DbId;
use quorum_db::models::assignment::NewAssignment;
use quorum_engine::{AssignmentStore, EngineError, ReassignOutcome, ReassignParams};
use serde_json::json;

/// Project with single-annotator overlap and members `a`, `b`.
async fn pair(h: &Harness) -> (DbId, DbId, DbId) {
    let project = h.project();
    h.configure(project, json!({"required_overlap": 1})).await;
    let ids = h.members(project, 2).await;
    (project, ids[0], ids[1])
}

async fn give(h: &Harness, project: DbId, annotator: DbId, tasks: &[DbId]) {
    for task in tasks {
        h.store
            .create_assignment(&NewAssignment {
                task_id: *task,
                project_id: project,
                annotator_id: annotator,
                is_honeypot: false,
            })
            .await
            .unwrap()
            .unwrap();
    }
}

fn holders(h: &Harness, task: DbId) -> Vec<DbId> {
    h.live_assignments(task)
        .iter()
        .map(|a| a.annotator_id)
        .collect()
}

async fn load_of(h: &Harness, project: DbId, annotator: DbId) -> i64 {
    h.member_loads(project)
        .await
        .into_iter()
        .find(|m| m.annotator_id == annotator)
        .map(|m| m.active_count)
        .unwrap()
}

// ---------------------------------------------------------------------------
// Stale assignments
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stale_assignment_moves_to_someone_else() {
    let h = Harness::new();
    let (project, a, b) = pair(&h).await;
    let task = h.tasks(project, 1).await[0];
    h.engine.assign_project_tasks(project).await.unwrap();
    let original = h.live_assignments(task)[0].clone();
    assert_eq!(original.annotator_id, a);
    assert!(h.store.backdate_assignment(original.id, Duration::hours(25)));

    let summary = h.engine.reassign_stale_tasks(project, None).await.unwrap();
    assert_eq!(summary.threshold_hours, 24);
    assert_eq!(summary.expired, 1);
    assert_eq!(summary.replaced, 1);
    assert_eq!(holders(&h, task), vec![b]);

    let again = h.engine.reassign_stale_tasks(project, None).await.unwrap();
    assert_eq!(again.expired, 0);
}

#[tokio::test]
async fn started_work_is_never_stale() {
    let h = Harness::new();
    let (project, a, _) = pair(&h).await;
    let task = h.tasks(project, 1).await[0];
    h.engine.assign_project_tasks(project).await.unwrap();
    let original = h.live_assignments(task)[0].clone();
    h.engine.start_assignment(original.id, a).await.unwrap();
    h.store.backdate_assignment(original.id, Duration::hours(72));

    let summary = h.engine.reassign_stale_tasks(project, Some(1)).await.unwrap();
    assert_eq!(summary.expired, 0);
    assert_eq!(holders(&h, task), vec![a]);
}

#[tokio::test]
async fn stale_without_replacement_is_reported() {
    let h = Harness::new();
    let project = h.project();
    let only = h.member(project, "only").await;
    let task = h.tasks(project, 1).await[0];
    h.engine.assign_project_tasks(project).await.unwrap();
    let original = h.live_assignments(task)[0].clone();
    assert_eq!(original.annotator_id, only);
    h.store.backdate_assignment(original.id, Duration::hours(30));

    let summary = h.engine.reassign_stale_tasks(project, None).await.unwrap();
    assert_eq!(summary.expired, 1);
    assert_eq!(summary.unreplaced, 1);
    assert!(holders(&h, task).is_empty());
}

#[tokio::test]
async fn stale_threshold_must_be_positive() {
    let h = Harness::new();
    let project = h.project();
    let err = h
        .engine
        .reassign_stale_tasks(project, Some(0))
        .await
        .unwrap_err();
    assert_matches!(err, EngineError::Core(CoreError::Validation(_)));
}

// ---------------------------------------------------------------------------
// Workload balancing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn balance_moves_unstarted_work_to_idle_annotators() {
    let h = Harness::new();
    let (project, a, b) = pair(&h).await;
    let tasks = h.tasks(project, 5).await;
    give(&h, project, a, &tasks).await;

    let summary = h.engine.balance_workload(project).await.unwrap();
    assert_eq!(summary.average_load, 2.5);
    assert_eq!(summary.underloaded, 1);
    assert_eq!(summary.assigned_open, 0);
    assert_eq!(summary.transferred, 3);
    assert_eq!(load_of(&h, project, a).await, 2);
    assert_eq!(load_of(&h, project, b).await, 3);

    for task in &tasks {
        assert_eq!(h.live_assignments(*task).len(), 1);
    }

    let again = h.engine.balance_workload(project).await.unwrap();
    assert_eq!(again.underloaded, 0);
    assert_eq!(again.transferred, 0);
}

#[tokio::test]
async fn balance_prefers_uncovered_tasks() {
    let h = Harness::new();
    let (project, a, b) = pair(&h).await;
    let tasks = h.tasks(project, 6).await;
    give(&h, project, a, &tasks[..4]).await;

    let summary = h.engine.balance_workload(project).await.unwrap();
    assert_eq!(summary.assigned_open, 2);
    assert_eq!(holders(&h, tasks[4]), vec![b]);
    assert_eq!(holders(&h, tasks[5]), vec![b]);
    assert!(load_of(&h, project, a).await < 4);
}

#[tokio::test]
async fn balance_leaves_started_work_alone() {
    let h = Harness::new();
    let (project, a, b) = pair(&h).await;
    let tasks = h.tasks(project, 4).await;
    give(&h, project, a, &tasks).await;
    for assignment in h.store.list_unstarted(project, a, 10).await.unwrap() {
        h.engine.start_assignment(assignment.id, a).await.unwrap();
    }

    let summary = h.engine.balance_workload(project).await.unwrap();
    assert_eq!(summary.transferred, 0);
    assert_eq!(load_of(&h, project, b).await, 0);
}

// ---------------------------------------------------------------------------
// Manual reassignment
// ---------------------------------------------------------------------------

fn task_params(task: DbId, from: DbId, to: Option<DbId>) -> ReassignParams {
    ReassignParams {
        task_id: Some(task),
        annotator_id: Some(from),
        to_annotator_id: to,
        ..ReassignParams::default()
    }
}

#[tokio::test]
async fn task_moves_to_named_annotator() {
    let h = Harness::new();
    let (project, a, b) = pair(&h).await;
    let task = h.tasks(project, 1).await[0];
    give(&h, project, a, &[task]).await;

    let outcome = h
        .api()
        .reassign(project, "task", task_params(task, a, Some(b)))
        .await
        .unwrap();
    assert_matches!(outcome, ReassignOutcome::Task(ref moved) if moved.to_annotator_id == Some(b) && moved.replacements == 1);
    assert_eq!(holders(&h, task), vec![b]);
}

#[tokio::test]
async fn started_task_moves_by_expiring_and_recreating() {
    let h = Harness::new();
    let (project, a, b) = pair(&h).await;
    let task = h.tasks(project, 1).await[0];
    give(&h, project, a, &[task]).await;
    let original = h.live_assignments(task)[0].clone();
    h.engine.start_assignment(original.id, a).await.unwrap();

    h.api()
        .reassign(project, "task", task_params(task, a, Some(b)))
        .await
        .unwrap();
    assert_eq!(holders(&h, task), vec![b]);
    let expired = h.store.find_assignment(original.id).await.unwrap().unwrap();
    assert!(!expired.status.is_live());
}

#[tokio::test]
async fn task_without_target_goes_to_best_candidate() {
    let h = Harness::new();
    let (project, a, b) = pair(&h).await;
    let task = h.tasks(project, 1).await[0];
    give(&h, project, a, &[task]).await;

    let outcome = h
        .api()
        .reassign(project, "task", task_params(task, a, None))
        .await
        .unwrap();
    assert_matches!(outcome, ReassignOutcome::Task(ref moved) if moved.replacements == 1);
    assert_eq!(holders(&h, task), vec![b]);
}

#[tokio::test]
async fn task_cannot_move_to_full_annotator() {
    let h = Harness::new();
    let (project, a, b) = pair(&h).await;
    let tasks = h.tasks(project, 6).await;
    give(&h, project, a, &tasks[..1]).await;
    give(&h, project, b, &tasks[1..]).await;

    let err = h
        .api()
        .reassign(project, "task", task_params(tasks[0], a, Some(b)))
        .await
        .unwrap_err();
    assert_matches!(err, EngineError::Core(CoreError::Conflict(_)));
    assert_eq!(holders(&h, tasks[0]), vec![a]);
}

#[tokio::test]
async fn submitted_task_cannot_move() {
    let h = Harness::new();
    let (project, a, b) = pair(&h).await;
    let task = h.tasks(project, 1).await[0];
    give(&h, project, a, &[task]).await;
    h.submit(task, a, json!({"choice": "cat"})).await;

    let err = h
        .api()
        .reassign(project, "task", task_params(task, a, Some(b)))
        .await
        .unwrap_err();
    assert_matches!(err, EngineError::Core(CoreError::Conflict(_)));
}

#[tokio::test]
async fn stale_action_accepts_hours() {
    let h = Harness::new();
    let (project, _, _) = pair(&h).await;
    let outcome = h
        .api()
        .reassign(
            project,
            "stale",
            ReassignParams {
                hours: Some(48),
                ..ReassignParams::default()
            },
        )
        .await
        .unwrap();
    assert_matches!(outcome, ReassignOutcome::Stale(ref summary) if summary.threshold_hours == 48);
}
