//! Allocation passes: overlap, capacity, scoring order and bulk behaviour.

mod common;

use std::collections::HashSet;

use assert_matches::assert_matches;
use common::Harness;
use quorum_core::assignment::ProjectRole;
use quorum_core::error::CoreError;
use quorum_core::overlap::OverlapCalculation;
use quorum_core::trust::TrustTier;
use quorum_db::models::assignment::NewAssignment;
use quorum_db::models::probe::NewProbe;
use quorum_db::models::task::NewTask;
use quorum_engine::{AssignmentStore, EngineError};
use quorum_events::names;
use serde_json::json;

// ---------------------------------------------------------------------------
// Overlap
// ---------------------------------------------------------------------------

#[tokio::test]
async fn three_free_annotators_give_overlap_three() {
    let h = Harness::new();
    let project = h.project();
    h.members(project, 3).await;

    let calc = h.engine.calculate_overlap(project).await.unwrap();
    assert_eq!(
        calc,
        OverlapCalculation {
            overlap: 3,
            total: 3,
            available: 3
        }
    );
}

#[tokio::test]
async fn overlap_is_clamped_to_one_through_three() {
    let h = Harness::new();
    let empty = h.project();
    assert_eq!(h.engine.calculate_overlap(empty).await.unwrap().overlap, 1);

    let crowded = h.project();
    h.members(crowded, 5).await;
    let calc = h.engine.calculate_overlap(crowded).await.unwrap();
    assert_eq!(calc.overlap, 3);
    assert_eq!(calc.total, 5);
}

#[tokio::test]
async fn required_overlap_overrides_calculation() {
    let h = Harness::new();
    let project = h.project();
    h.members(project, 3).await;
    h.configure(project, json!({"required_overlap": 2})).await;

    let status = h.api().get_assignment_status(project).await.unwrap();
    assert_eq!(status.overlap.overlap, 3);
    assert_eq!(status.effective_overlap, 2);

    let task = h.tasks(project, 1).await[0];
    let summary = h.engine.assign_project_tasks(project).await.unwrap();
    assert_eq!(summary.overlap, 2);
    assert_eq!(h.live_assignments(task).len(), 2);
}

#[tokio::test]
async fn reviewers_do_not_count_or_receive_work() {
    let h = Harness::new();
    let project = h.project();
    let annotator = h.member(project, "worker").await;
    let reviewer = h.annotator("reviewer");
    h.engine
        .join_project(project, reviewer, ProjectRole::Reviewer)
        .await
        .unwrap();
    let tasks = h.tasks(project, 3).await;

    assert_eq!(h.engine.calculate_overlap(project).await.unwrap().total, 1);
    h.engine.assign_project_tasks(project).await.unwrap();
    for task in tasks {
        let holders: Vec<i64> = h
            .live_assignments(task)
            .iter()
            .map(|a| a.annotator_id)
            .collect();
        assert_eq!(holders, vec![annotator]);
    }
}

// ---------------------------------------------------------------------------
// Capacity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn annotator_at_ceiling_is_skipped_without_error() {
    let h = Harness::new();
    let project = h.project();
    let ids = h.members(project, 2).await;
    let (full, free) = (ids[0], ids[1]);

    for task in h.tasks(project, 5).await {
        h.store
            .create_assignment(&NewAssignment {
                task_id: task,
                project_id: project,
                annotator_id: full,
                is_honeypot: false,
            })
            .await
            .unwrap()
            .unwrap();
    }
    let sixth = h.tasks(project, 1).await[0];

    let created = h.engine.allocate(project, sixth, 2).await.unwrap();
    assert_eq!(created, 1);
    let holders: Vec<i64> = h
        .live_assignments(sixth)
        .iter()
        .map(|a| a.annotator_id)
        .collect();
    assert_eq!(holders, vec![free]);
}

#[tokio::test]
async fn passes_never_exceed_capacity_ceilings() {
    let h = Harness::new();
    let project = h.project();
    h.members(project, 2).await;
    let expert = h.annotator_with("expert", Some(TrustTier::Expert), Some(90.0));
    h.engine
        .join_project(project, expert, ProjectRole::Annotator)
        .await
        .unwrap();
    h.tasks(project, 40).await;

    for _ in 0..3 {
        h.engine.assign_project_tasks(project).await.unwrap();
    }
    for member in h.member_loads(project).await {
        let ceiling = match member.trust_tier {
            TrustTier::Expert => 15,
            _ => 5,
        };
        assert!(member.active_count <= ceiling, "{member:?}");
        assert_eq!(member.active_count, ceiling);
    }
}

#[tokio::test]
async fn shortfall_is_counted_not_failed() {
    let h = Harness::new();
    let project = h.project();
    h.members(project, 1).await;
    h.tasks(project, 8).await;

    let summary = h.engine.assign_project_tasks(project).await.unwrap();
    assert!(summary.errors.is_empty());
    assert_eq!(summary.tasks_examined, 8);
    assert_eq!(summary.newly_assigned, 5);
    assert_eq!(summary.fully_assigned, 5);
    assert_eq!(summary.pending_capacity, 3);
}

#[tokio::test]
async fn ceiling_counts_work_from_every_project() {
    let h = Harness::new();
    let first = h.project();
    let second = h.project();
    let annotator = h.member(first, "shared").await;
    h.engine
        .join_project(second, annotator, ProjectRole::Annotator)
        .await
        .unwrap();
    let first_tasks = h.tasks(first, 10).await;
    let second_tasks = h.tasks(second, 10).await;

    h.engine.assign_project_tasks(first).await.unwrap();
    let summary = h.engine.assign_project_tasks(second).await.unwrap();
    assert_eq!(summary.newly_assigned, 0);
    assert_eq!(summary.pending_capacity, 10);

    let held = |tasks: &[i64]| {
        tasks
            .iter()
            .filter(|&&t| !h.live_assignments(t).is_empty())
            .count()
    };
    assert_eq!(held(&first_tasks), 5);
    assert_eq!(held(&second_tasks), 0);

    let loads = h.member_loads(second).await;
    assert_eq!(loads.len(), 1);
    assert_eq!(loads[0].active_count, 5);
}

// ---------------------------------------------------------------------------
// Repeated passes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn repeated_passes_never_double_assign() {
    let h = Harness::new();
    let project = h.project();
    h.members(project, 3).await;
    let tasks = h.tasks(project, 4).await;

    let first = h.engine.assign_project_tasks(project).await.unwrap();
    assert_eq!(first.newly_assigned, 12);
    let second = h.engine.assign_project_tasks(project).await.unwrap();
    assert_eq!(second.newly_assigned, 0);
    assert_eq!(second.fully_assigned, 4);

    for task in tasks {
        let live = h.live_assignments(task);
        let distinct: HashSet<i64> = live.iter().map(|a| a.annotator_id).collect();
        assert_eq!(live.len(), 3);
        assert_eq!(distinct.len(), 3);
    }
}

#[tokio::test]
async fn capacity_rerun_is_idempotent() {
    let h = Harness::new();
    let project = h.project();
    h.members(project, 2).await;
    h.tasks(project, 3).await;

    let first = h
        .engine
        .reassign_when_capacity_available(project)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.newly_assigned, 6);
    let second = h
        .engine
        .reassign_when_capacity_available(project)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.newly_assigned, 0);
}

#[tokio::test]
async fn capacity_rerun_skips_saturated_projects() {
    let h = Harness::new();
    let project = h.project();
    h.members(project, 1).await;
    h.tasks(project, 5).await;
    h.engine.assign_project_tasks(project).await.unwrap();

    h.tasks(project, 1).await;
    let rerun = h
        .engine
        .reassign_when_capacity_available(project)
        .await
        .unwrap();
    assert!(rerun.is_none());
}

// ---------------------------------------------------------------------------
// Bulk import into an empty project
// ---------------------------------------------------------------------------

#[tokio::test]
async fn bulk_import_binds_annotators_then_distributes() {
    let h = Harness::new();
    let project = h.project();
    for i in 0..4 {
        h.annotator(&format!("unbound-{i}"));
    }
    let tasks = h.tasks(project, 500).await;

    let summary = h.engine.assign_project_tasks(project).await.unwrap();
    assert_eq!(summary.bindings_created, 4);
    assert_eq!(summary.overlap, 3);
    assert_eq!(summary.tasks_examined, 500);
    assert!(summary.newly_assigned <= 500 * summary.overlap);
    assert_eq!(summary.newly_assigned, 20);
    assert_eq!(
        summary.fully_assigned + summary.partially_assigned + summary.pending_capacity,
        500
    );

    let loads = h.member_loads(project).await;
    assert_eq!(loads.len(), 4);
    assert!(loads.iter().all(|m| m.active_count == 5));

    let total: usize = tasks.iter().map(|t| h.live_assignments(*t).len()).sum();
    assert_eq!(total, 20);
}

// ---------------------------------------------------------------------------
// Ordering, probes and events
// ---------------------------------------------------------------------------

#[tokio::test]
async fn higher_priority_tasks_are_allocated_first() {
    let h = Harness::new();
    let project = h.project();
    h.members(project, 1).await;
    let low = h.tasks(project, 5).await;
    let urgent = h
        .store
        .insert_tasks(
            project,
            &[NewTask {
                data: json!({"text": "urgent"}),
                priority: Some(10),
                complexity: None,
            }],
        )
        .await
        .unwrap()[0];

    h.engine.assign_project_tasks(project).await.unwrap();
    assert_eq!(h.live_assignments(urgent).len(), 1);
    assert!(h.live_assignments(low[4]).is_empty());
}

#[tokio::test]
async fn probes_are_never_allocated() {
    let h = Harness::new();
    let project = h.project();
    h.members(project, 2).await;
    let (probe_task, _) = h
        .engine
        .create_probe(
            project,
            NewProbe {
                data: json!({"text": "gold"}),
                ground_truth: json!({"choices": ["positive"]}),
                tolerance: None,
                complexity: None,
            },
        )
        .await
        .unwrap();

    let summary = h.engine.assign_project_tasks(project).await.unwrap();
    assert_eq!(summary.tasks_examined, 0);
    assert!(h.live_assignments(probe_task.id).is_empty());

    let err = h.engine.allocate(project, probe_task.id, 1).await.unwrap_err();
    assert_matches!(err, EngineError::Core(CoreError::Validation(_)));
}

#[tokio::test]
async fn allocation_publishes_assignment_events() {
    let h = Harness::new();
    let project = h.project();
    h.members(project, 2).await;
    h.tasks(project, 2).await;
    let mut rx = h.bus.subscribe();

    h.engine.assign_project_tasks(project).await.unwrap();

    let mut created = 0;
    while let Ok(event) = rx.try_recv() {
        assert_eq!(event.event_type, names::ASSIGNMENT_CREATED);
        assert_eq!(event.project_id, Some(project));
        created += 1;
    }
    assert_eq!(created, 4);
}

#[tokio::test]
async fn unknown_project_is_not_found() {
    let h = Harness::new();
    let err = h.engine.assign_project_tasks(404).await.unwrap_err();
    assert_matches!(err, EngineError::Core(CoreError::NotFound { .. }));
}
