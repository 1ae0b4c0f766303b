//! Honeypot probes: creation, injection and grading.
//!
//! Probes are served through [`Engine::next_task`](crate::Engine::next_task)
//! exactly like regular work. The injection decision and the grade are pure
//! functions in `quorum-core`; this module feeds them from the store and
//! writes the outcome back in one atomic store call.

use quorum_core::honeypot::{decide_injection, grade_submission, validate_tolerance, InjectionDecision};
use quorum_core::trust::TierChange;
use quorum_core::types::DbId;
use quorum_db::models::assignment::TaskAssignment;
use quorum_db::models::probe::{HoneypotProbe, NewProbe};
use quorum_db::models::task::Task;
use quorum_db::models::trust::ProbeOutcome;
use quorum_events::{names, PlatformEvent};

use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};

fn tier_changed_event(outcome: &ProbeOutcome, project_id: DbId) -> Option<PlatformEvent> {
    let (from, to) = match outcome.tier_change {
        TierChange::Unchanged => return None,
        TierChange::Downgraded { from, to } | TierChange::Upgraded { from, to } => (from, to),
    };
    Some(
        PlatformEvent::new(names::TIER_CHANGED)
            .with_source("annotator", outcome.annotator_id)
            .with_project(project_id)
            .with_actor(outcome.annotator_id)
            .with_payload(serde_json::json!({
                "annotator_id": outcome.annotator_id,
                "from": from,
                "to": to,
                "pass_rate": outcome.stats.pass_rate(),
                "event_type": names::TIER_CHANGED,
            })),
    )
}

impl Engine {
    /// Create a probe task with its ground truth.
    ///
    /// Without an explicit tolerance the project's default applies.
    pub async fn create_probe(
        &self,
        project_id: DbId,
        input: NewProbe,
    ) -> EngineResult<(Task, HoneypotProbe)> {
        self.ensure_project(project_id).await?;
        if input.ground_truth.is_null() {
            return Err(EngineError::validation("A probe needs a non-null ground_truth"));
        }
        let config = self.store.load_config(project_id).await?;
        let tolerance = input
            .tolerance
            .unwrap_or(config.honeypot.default_tolerance);
        validate_tolerance(tolerance)?;

        let (task, probe) = self.store.create_probe(project_id, &input, tolerance).await?;
        tracing::info!(project_id, task_id = task.id, probe_id = probe.id, tolerance, "Probe created");
        Ok((task, probe))
    }

    /// Decide whether the annotator's next request should be a probe.
    pub async fn should_inject(
        &self,
        project_id: DbId,
        annotator_id: DbId,
    ) -> EngineResult<InjectionDecision> {
        let config = self.store.load_config(project_id).await?;
        if !config.honeypot.enabled {
            return Ok(InjectionDecision::Disabled);
        }
        let has_unseen = self
            .store
            .find_unseen_probe(project_id, annotator_id)
            .await?
            .is_some();
        let since = self
            .store
            .tasks_since_last_probe(project_id, annotator_id)
            .await?;
        Ok(decide_injection(&config.honeypot, has_unseen, since, self.roll()))
    }

    /// An active probe the annotator has never been assigned.
    pub async fn get_probe_task(
        &self,
        project_id: DbId,
        annotator_id: DbId,
    ) -> EngineResult<Option<HoneypotProbe>> {
        self.store.find_unseen_probe(project_id, annotator_id).await
    }

    /// Grade a probe submission and record every side effect atomically.
    pub(crate) async fn grade_probe(
        &self,
        assignment: &TaskAssignment,
        probe: &HoneypotProbe,
        result: &serde_json::Value,
    ) -> EngineResult<ProbeOutcome> {
        let config = self.store.load_config(assignment.project_id).await?;
        let grade = grade_submission(&probe.ground_truth, result, probe.tolerance);
        let outcome = self
            .store
            .record_probe_outcome(assignment.id, result, grade, &config.trust_policy)
            .await?
            .ok_or_else(|| {
                EngineError::conflict(format!("Assignment {} is not open", assignment.id))
            })?;

        tracing::info!(
            assignment_id = assignment.id,
            annotator_id = outcome.annotator_id,
            passed = outcome.passed,
            similarity = outcome.similarity,
            pass_rate = outcome.stats.pass_rate(),
            quality = outcome.quality_score,
            "Probe graded"
        );
        if let Some(event) = tier_changed_event(&outcome, assignment.project_id) {
            tracing::info!(
                annotator_id = outcome.annotator_id,
                tier = %outcome.trust_tier,
                "Trust tier changed"
            );
            self.publish(event);
        }
        Ok(outcome)
    }
}
