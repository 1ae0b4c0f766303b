//! Consolidation, finalization and expert review.
//!
//! [`Engine::consolidate`] drives a task's consensus record from `pending`
//! to `consensus_reached` or `review_required`. Records that have left
//! `pending` are only moved on by [`Engine::finalize_consensus`] or an
//! expert decision. Finalizing feeds agreement back into each
//! contributor's quality score.

use quorum_core::assignment::ProjectRole;
use quorum_core::consensus::{evaluate_consensus, resolve_review, ConsensusStatus, ReviewResolution, Vote};
use quorum_core::similarity::results_match;
use quorum_core::trust::TrustTier;
use quorum_core::types::DbId;
use quorum_db::models::annotation::VoteRow;
use quorum_db::models::consensus::{ConsensusUpsert, TaskConsensus};
use quorum_db::models::review::{ExpertReview, NewExpertReview, ReviewEffect};
use quorum_events::{names, PlatformEvent};
use serde::Serialize;

use crate::engine::{Engine, ProjectContext};
use crate::error::{EngineError, EngineResult};

/// Result of an expert decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewOutcome {
    pub review: ExpertReview,
    pub consensus: TaskConsensus,
    /// Fresh assignments created when the task was reopened.
    pub reassigned: i64,
}

/// Consensus record after a consolidation attempt.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Consolidation {
    pub consensus: TaskConsensus,
    /// Whether this attempt wrote the record.
    pub written: bool,
}

fn vote_from_row(row: VoteRow) -> Vote {
    Vote {
        annotation_id: row.annotation_id,
        annotator_id: row.annotator_id,
        result: row.result,
        quality_score: row.quality_score,
    }
}

fn finalized_event(consensus: &TaskConsensus) -> PlatformEvent {
    PlatformEvent::new(names::CONSENSUS_FINALIZED)
        .with_source("task", consensus.task_id)
        .with_project(consensus.project_id)
        .with_payload(serde_json::json!({
            "task_id": consensus.task_id,
            "consensus_id": consensus.id,
            "method": consensus.method_name,
            "event_type": names::CONSENSUS_FINALIZED,
        }))
}

fn escalated_event(consensus: &TaskConsensus) -> PlatformEvent {
    PlatformEvent::new(names::TASK_ESCALATED)
        .with_source("task", consensus.task_id)
        .with_project(consensus.project_id)
        .with_payload(serde_json::json!({
            "task_id": consensus.task_id,
            "agreement_score": consensus.agreement_score,
            "event_type": names::TASK_ESCALATED,
        }))
}

impl Engine {
    /// Evaluate a task's annotations and store the consensus record.
    ///
    /// Deterministic and idempotent. A record that has left `pending` is
    /// returned unchanged.
    pub async fn consolidate(&self, task_id: DbId) -> EngineResult<TaskConsensus> {
        let task = self
            .store
            .find_task(task_id)
            .await?
            .ok_or_else(|| EngineError::not_found("task", task_id))?;
        if task.is_probe {
            return Err(EngineError::validation(format!(
                "Task {task_id} is a probe and has no consensus"
            )));
        }
        let ctx = self.load_context(task.project_id).await?;
        Ok(self.consolidate_with(&ctx, task_id).await?.consensus)
    }

    pub(crate) async fn consolidate_with(
        &self,
        ctx: &ProjectContext,
        task_id: DbId,
    ) -> EngineResult<Consolidation> {
        let existing = self.store.find_consensus(task_id).await?;
        if let Some(existing) = &existing {
            if existing.status != ConsensusStatus::Pending {
                return Ok(Consolidation {
                    consensus: existing.clone(),
                    written: false,
                });
            }
        }

        let votes: Vec<Vote> = self
            .store
            .list_votes(task_id)
            .await?
            .into_iter()
            .map(vote_from_row)
            .collect();
        let outcome = evaluate_consensus(
            &votes,
            ctx.effective_overlap.max(1) as usize,
            ctx.config.consensus_similarity_threshold,
            ctx.config.consensus_method,
        );

        if let Some(existing) = &existing {
            if outcome.status == ConsensusStatus::Pending
                && existing.annotation_count as usize == outcome.vote_count
            {
                return Ok(Consolidation {
                    consensus: existing.clone(),
                    written: false,
                });
            }
        }

        let upsert = ConsensusUpsert {
            task_id,
            project_id: ctx.project_id,
            status: outcome.status,
            consolidated_result: outcome.consolidated_result.clone(),
            candidate_result: outcome.candidate_result.clone(),
            agreement_score: outcome.agreement_score,
            method: outcome.method,
            annotation_count: outcome.vote_count as i32,
        };
        let Some(consensus) = self.store.upsert_consensus(&upsert).await? else {
            let consensus = self
                .store
                .find_consensus(task_id)
                .await?
                .ok_or_else(|| EngineError::not_found("task_consensus", task_id))?;
            return Ok(Consolidation {
                consensus,
                written: false,
            });
        };

        match consensus.status {
            ConsensusStatus::ConsensusReached => {
                tracing::info!(
                    task_id,
                    method = ?consensus.method_name,
                    agreement = consensus.agreement_score,
                    "Consensus reached"
                );
            }
            ConsensusStatus::ReviewRequired => {
                tracing::info!(
                    task_id,
                    agreement = consensus.agreement_score,
                    conflict = outcome.conflict,
                    "Annotations disagree; escalated to expert review"
                );
                self.publish(escalated_event(&consensus));
            }
            _ => {}
        }
        Ok(Consolidation {
            consensus,
            written: true,
        })
    }

    /// `consensus_reached -> finalized`, then quality feedback.
    ///
    /// Finalizing an already finalized task returns it unchanged.
    pub async fn finalize_consensus(&self, task_id: DbId) -> EngineResult<TaskConsensus> {
        let existing = self
            .store
            .find_consensus(task_id)
            .await?
            .ok_or_else(|| EngineError::not_found("task_consensus", task_id))?;
        match existing.status {
            ConsensusStatus::Finalized => return Ok(existing),
            ConsensusStatus::ReviewRequired => {
                return Err(EngineError::conflict(format!(
                    "Task {task_id} requires an expert review before it can be finalized"
                )));
            }
            ConsensusStatus::ConsensusReached => {}
            other => {
                other.validate_transition(ConsensusStatus::Finalized)?;
            }
        }

        let Some(finalized) = self.store.finalize_reached(task_id).await? else {
            let current = self
                .store
                .find_consensus(task_id)
                .await?
                .ok_or_else(|| EngineError::not_found("task_consensus", task_id))?;
            if current.status == ConsensusStatus::Finalized {
                return Ok(current);
            }
            return Err(EngineError::conflict(format!(
                "Task {task_id} left consensus_reached concurrently (now {})",
                current.status
            )));
        };

        let adjusted = self.apply_consensus_feedback(&finalized).await?;
        tracing::info!(task_id, annotators = adjusted, "Consensus finalized");
        self.publish(finalized_event(&finalized));
        Ok(finalized)
    }

    /// Compare every contributing annotation with the final result and
    /// update the author's quality score. Returns the number of updates.
    async fn apply_consensus_feedback(&self, consensus: &TaskConsensus) -> EngineResult<usize> {
        let Some(final_result) = &consensus.consolidated_result else {
            return Ok(0);
        };
        let config = self.store.load_config(consensus.project_id).await?;
        let votes = self.store.list_votes(consensus.task_id).await?;
        let mut adjusted = 0;
        for vote in &votes {
            let agreed = results_match(
                &vote.result,
                final_result,
                config.consensus_similarity_threshold,
            );
            if let Some(quality) = self
                .store
                .apply_quality_feedback(vote.annotator_id, agreed)
                .await?
            {
                adjusted += 1;
                tracing::debug!(
                    task_id = consensus.task_id,
                    annotator_id = vote.annotator_id,
                    agreed,
                    quality,
                    "Quality feedback applied"
                );
            }
        }
        Ok(adjusted)
    }

    /// Resolve a `review_required` task with an expert decision.
    ///
    /// The reviewer must be bound to the project as a reviewer or hold at
    /// least the expert tier. `rejected` cancels the annotations and
    /// re-allocates the task from scratch.
    pub async fn submit_expert_review(&self, input: NewExpertReview) -> EngineResult<ReviewOutcome> {
        let task = self
            .store
            .find_task(input.task_id)
            .await?
            .ok_or_else(|| EngineError::not_found("task", input.task_id))?;
        let reviewer = self
            .store
            .find_annotator(input.reviewer_id)
            .await?
            .ok_or_else(|| EngineError::not_found("annotator", input.reviewer_id))?;
        let is_reviewer = self
            .store
            .find_binding(task.project_id, reviewer.id)
            .await?
            .is_some_and(|b| b.role == ProjectRole::Reviewer);
        if !is_reviewer && reviewer.trust_tier.rank() < TrustTier::Expert.rank() {
            return Err(EngineError::validation(format!(
                "Annotator {} is neither a reviewer of project {} nor expert tier",
                reviewer.id, task.project_id
            )));
        }

        let consensus = self
            .store
            .find_consensus(task.id)
            .await?
            .ok_or_else(|| EngineError::not_found("task_consensus", task.id))?;
        if consensus.status != ConsensusStatus::ReviewRequired {
            return Err(EngineError::conflict(format!(
                "Task {} is {}; only review_required tasks accept expert reviews",
                task.id, consensus.status
            )));
        }

        let effect = match resolve_review(
            input.decision,
            consensus.candidate_result.as_ref(),
            input.corrected_result.as_ref(),
        )? {
            ReviewResolution::Finalize { result, method } => ReviewEffect::Finalize { result, method },
            ReviewResolution::Reopen => ReviewEffect::Reopen,
        };

        let (review, updated) = self
            .store
            .apply_expert_review(&input, &effect)
            .await?
            .ok_or_else(|| {
                EngineError::conflict(format!("Task {} was resolved concurrently", task.id))
            })?;

        let reassigned = match effect {
            ReviewEffect::Finalize { .. } => {
                let adjusted = self.apply_consensus_feedback(&updated).await?;
                tracing::info!(
                    task_id = task.id,
                    reviewer_id = reviewer.id,
                    decision = %input.decision,
                    annotators = adjusted,
                    "Expert review finalized task"
                );
                self.publish(finalized_event(&updated));
                0
            }
            ReviewEffect::Reopen => {
                let created = self.fill_task(task.project_id, task.id).await?;
                tracing::info!(
                    task_id = task.id,
                    reviewer_id = reviewer.id,
                    reassigned = created,
                    "Expert rejected all annotations; task reopened"
                );
                created
            }
        };

        Ok(ReviewOutcome {
            review,
            consensus: updated,
            reassigned,
        })
    }
}
