//! Probe creation, injection through `next_task`, grading and trust updates.

mod common;

use assert_matches::assert_matches;
use common::Harness;
use quorum_core::assignment::ProjectRole;
use quorum_core::error::CoreError;
use quorum_core::honeypot::InjectionDecision;
use quorum_core::trust::TrustTier;
use quorum_core::types::DbId;
use quorum_db::models::probe::NewProbe;
use quorum_engine::{AssignmentStore, EngineError};
use quorum_events::names;
use serde_json::{json, Value};

fn probe(text: &str) -> NewProbe {
    NewProbe {
        data: json!({"text": text}),
        ground_truth: json!({"choices": ["positive"]}),
        tolerance: None,
        complexity: None,
    }
}

/// Project with probes always injected once the interval allows.
async fn probing_project(h: &Harness, min_interval: i64) -> DbId {
    let project = h.project();
    h.configure(
        project,
        json!({"honeypot": {"enabled": true, "injection_rate": 1.0, "min_interval": min_interval}}),
    )
    .await;
    project
}

/// Serve the next task to `annotator` and submit `answer` on it.
async fn answer_next(h: &Harness, project: DbId, annotator: DbId, answer: Value) -> DbId {
    let served = h.engine.next_task(project, annotator).await.unwrap().unwrap();
    h.engine
        .submit_annotation(served.assignment_id, annotator, answer)
        .await
        .unwrap();
    served.task_id
}

// ---------------------------------------------------------------------------
// Creation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn probe_uses_project_default_tolerance() {
    let h = Harness::new();
    let project = h.project();
    h.configure(project, json!({"honeypot": {"default_tolerance": 0.9}}))
        .await;

    let (task, created) = h.engine.create_probe(project, probe("gold")).await.unwrap();
    assert!(task.is_probe);
    assert_eq!(created.task_id, task.id);
    assert_eq!(created.tolerance, 0.9);

    let mut explicit = probe("strict");
    explicit.tolerance = Some(1.0);
    let (_, strict) = h.engine.create_probe(project, explicit).await.unwrap();
    assert_eq!(strict.tolerance, 1.0);
}

#[tokio::test]
async fn invalid_probes_are_rejected() {
    let h = Harness::new();
    let project = h.project();

    let mut loose = probe("loose");
    loose.tolerance = Some(1.5);
    let err = h.engine.create_probe(project, loose).await.unwrap_err();
    assert_matches!(err, EngineError::Core(CoreError::Validation(_)));

    let mut empty = probe("empty");
    empty.ground_truth = Value::Null;
    let err = h.engine.create_probe(project, empty).await.unwrap_err();
    assert_matches!(err, EngineError::Core(CoreError::Validation(_)));
}

// ---------------------------------------------------------------------------
// Injection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disabled_projects_never_inject() {
    let h = Harness::new();
    let project = h.project();
    let annotator = h.member(project, "a").await;
    h.engine.create_probe(project, probe("gold")).await.unwrap();

    let decision = h.engine.should_inject(project, annotator).await.unwrap();
    assert_eq!(decision, InjectionDecision::Disabled);
}

#[tokio::test]
async fn lowest_unseen_probe_is_offered() {
    let h = Harness::new();
    let project = probing_project(&h, 0).await;
    let annotator = h.member(project, "a").await;
    let (_, first) = h.engine.create_probe(project, probe("one")).await.unwrap();
    let (_, second) = h.engine.create_probe(project, probe("two")).await.unwrap();

    let offered = h.engine.get_probe_task(project, annotator).await.unwrap();
    assert_eq!(offered.map(|p| p.id), Some(first.id));

    answer_next(&h, project, annotator, json!({"choices": ["positive"]})).await;
    let offered = h.engine.get_probe_task(project, annotator).await.unwrap();
    assert_eq!(offered.map(|p| p.id), Some(second.id));
}

#[tokio::test]
async fn probe_is_served_like_regular_work() {
    let h = Harness::new();
    let project = probing_project(&h, 5).await;
    let annotator = h.member(project, "a").await;
    let (probe_task, _) = h.engine.create_probe(project, probe("gold")).await.unwrap();
    let mut rx = h.bus.subscribe();

    let served = h.engine.next_task(project, annotator).await.unwrap().unwrap();
    assert_eq!(served.task_id, probe_task.id);
    assert_eq!(served.data, json!({"text": "gold"}));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn interval_separates_probes() {
    let h = Harness::new();
    let project = probing_project(&h, 5).await;
    let annotator = h.member(project, "a").await;
    let (first, _) = h.engine.create_probe(project, probe("one")).await.unwrap();
    let (second, _) = h.engine.create_probe(project, probe("two")).await.unwrap();
    let regular = h.tasks(project, 1).await[0];

    let served = answer_next(&h, project, annotator, json!({"choices": ["positive"]})).await;
    assert_eq!(served, first.id);

    let decision = h.engine.should_inject(project, annotator).await.unwrap();
    assert_eq!(decision, InjectionDecision::IntervalNotElapsed);
    let next = h.engine.next_task(project, annotator).await.unwrap().unwrap();
    assert_eq!(next.task_id, regular);
    assert_ne!(next.task_id, second.id);
}

#[tokio::test]
async fn a_probe_is_never_repeated() {
    let h = Harness::new();
    let project = probing_project(&h, 0).await;
    let annotator = h.member(project, "a").await;
    let (probe_task, _) = h.engine.create_probe(project, probe("only")).await.unwrap();
    let regular = h.tasks(project, 1).await[0];

    let first = answer_next(&h, project, annotator, json!({"choices": ["positive"]})).await;
    assert_eq!(first, probe_task.id);

    assert_eq!(
        h.engine.should_inject(project, annotator).await.unwrap(),
        InjectionDecision::NoUnseenProbe
    );
    let second = answer_next(&h, project, annotator, json!({"choice": "cat"})).await;
    assert_eq!(second, regular);
    assert!(h.engine.next_task(project, annotator).await.unwrap().is_none());

    let probe_assignments = h.store.assignments_for_task(probe_task.id);
    assert_eq!(probe_assignments.len(), 1);
}

#[tokio::test]
async fn served_checks_cannot_be_unassigned() {
    let h = Harness::new();
    let project = probing_project(&h, 0).await;
    let annotator = h.member(project, "a").await;
    let (gold, _) = h.engine.create_probe(project, probe("only")).await.unwrap();
    h.tasks(project, 1).await;

    let served = h.engine.next_task(project, annotator).await.unwrap().unwrap();
    assert_eq!(served.task_id, gold.id);

    let err = h.engine.unassign(served.assignment_id).await.unwrap_err();
    assert_matches!(err, EngineError::Core(CoreError::Conflict(_)));
    assert_eq!(h.live_assignments(gold.id).len(), 1);
    assert!(h
        .engine
        .get_probe_task(project, annotator)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn probes_wait_for_capacity() {
    let h = Harness::new();
    let project = probing_project(&h, 0).await;
    let annotator = h.member(project, "a").await;
    h.tasks(project, 5).await;
    h.engine.assign_project_tasks(project).await.unwrap();
    let (probe_task, _) = h.engine.create_probe(project, probe("gold")).await.unwrap();

    let served = h.engine.next_task(project, annotator).await.unwrap().unwrap();
    assert_ne!(served.task_id, probe_task.id);
    assert!(h.store.assignments_for_task(probe_task.id).is_empty());
}

// ---------------------------------------------------------------------------
// Grading and trust
// ---------------------------------------------------------------------------

#[tokio::test]
async fn matching_answer_passes_and_counts() {
    let h = Harness::new();
    let project = probing_project(&h, 0).await;
    let annotator = h.member(project, "a").await;
    h.engine.create_probe(project, probe("gold")).await.unwrap();
    h.queue.drain();

    let served = h.engine.next_task(project, annotator).await.unwrap().unwrap();
    let outcome = h
        .engine
        .submit_annotation(served.assignment_id, annotator, json!({"choices": ["positive"]}))
        .await
        .unwrap();
    let graded = outcome.probe.unwrap();
    assert!(graded.passed);
    assert_eq!(graded.stats.total, 1);
    assert_eq!(graded.stats.passed, 1);

    let record = h.store.find_trust_record(annotator).await.unwrap().unwrap();
    assert_eq!((record.total, record.passed), (1, 1));
    assert_eq!(h.annotator_row(annotator).await.quality_score, Some(73.0));

    let assignment = h.store.find_assignment(served.assignment_id).await.unwrap().unwrap();
    assert_eq!(assignment.honeypot_passed, Some(true));
    assert!(h.queue.pending().is_empty());
    assert!(h.store.find_consensus(served.task_id).await.unwrap().is_none());
}

#[tokio::test]
async fn wrong_answer_fails() {
    let h = Harness::new();
    let project = probing_project(&h, 0).await;
    let annotator = h.member(project, "a").await;
    h.engine.create_probe(project, probe("gold")).await.unwrap();

    let served = h.engine.next_task(project, annotator).await.unwrap().unwrap();
    let outcome = h
        .engine
        .submit_annotation(served.assignment_id, annotator, json!({"choices": ["negative"]}))
        .await
        .unwrap();
    assert!(!outcome.probe.unwrap().passed);

    let record = h.store.find_trust_record(annotator).await.unwrap().unwrap();
    assert_eq!((record.total, record.passed), (1, 0));
    assert_eq!(h.annotator_row(annotator).await.quality_score, Some(63.0));
}

#[tokio::test]
async fn repeated_failures_downgrade_the_tier() {
    let h = Harness::new();
    let project = probing_project(&h, 0).await;
    let annotator = h.annotator_with("a", Some(TrustTier::Intermediate), None);
    h.engine
        .join_project(project, annotator, ProjectRole::Annotator)
        .await
        .unwrap();
    for i in 0..10 {
        h.engine
            .create_probe(project, probe(&format!("probe {i}")))
            .await
            .unwrap();
    }
    let mut rx = h.bus.subscribe();

    for _ in 0..9 {
        answer_next(&h, project, annotator, json!({"choices": ["negative"]})).await;
    }
    assert_eq!(h.annotator_row(annotator).await.trust_tier, TrustTier::Intermediate);

    answer_next(&h, project, annotator, json!({"choices": ["negative"]})).await;
    assert_eq!(h.annotator_row(annotator).await.trust_tier, TrustTier::Novice);

    let event = rx.try_recv().unwrap();
    assert_eq!(event.event_type, names::TIER_CHANGED);
    assert_eq!(event.payload["from"], "intermediate");
    assert_eq!(event.payload["to"], "novice");

    let record = h.store.find_trust_record(annotator).await.unwrap().unwrap();
    assert_eq!(record.total, 10);
    assert_eq!(record.since_tier_change, 0);
}

#[tokio::test]
async fn streak_bonus_is_granted_once() {
    let h = Harness::new();
    let project = probing_project(&h, 0).await;
    let annotator = h.member(project, "a").await;
    for i in 0..5 {
        h.engine
            .create_probe(project, probe(&format!("probe {i}")))
            .await
            .unwrap();
    }
    for _ in 0..5 {
        answer_next(&h, project, annotator, json!({"choices": ["positive"]})).await;
    }
    let before = h.annotator_row(annotator).await.quality_score.unwrap();

    let summary = h.engine.award_streak_bonuses(project).await.unwrap();
    assert_eq!(summary.awarded, 1);
    let after = h.annotator_row(annotator).await.quality_score.unwrap();
    assert!((after - before - 2.0).abs() < 1e-9);

    let again = h.engine.award_streak_bonuses(project).await.unwrap();
    assert_eq!(again.awarded, 0);
}
