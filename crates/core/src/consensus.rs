//! Consensus state machine and vote consolidation.
//!
//! Given the non-cancelled annotations of a task, [`evaluate_consensus`]
//! decides whether they agree (unanimously or by strict majority) or whether
//! the task must be escalated to expert review. The function is pure and
//! deterministic: votes are ordered by annotation id before grouping.

use serde::Serialize;
use serde_json::Value;

use crate::error::CoreError;
use crate::similarity::results_match;
use crate::trust::DEFAULT_QUALITY_SCORE;
use crate::types::DbId;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

define_text_enum! {
    /// Status of a task's consensus record.
    ConsensusStatus ("consensus status") {
        Pending = "pending",
        ConsensusReached = "consensus_reached",
        Conflict = "conflict",
        ReviewRequired = "review_required",
        Finalized = "finalized",
    }
}

impl ConsensusStatus {
    /// Target statuses reachable from `self`.
    ///
    /// `review_required -> pending` only happens when an expert rejects
    /// every annotation and the task is re-annotated from scratch.
    pub fn valid_transitions(self) -> &'static [ConsensusStatus] {
        match self {
            Self::Pending => &[Self::ConsensusReached, Self::Conflict],
            Self::Conflict => &[Self::ReviewRequired],
            Self::ConsensusReached => &[Self::Finalized],
            Self::ReviewRequired => &[Self::Finalized, Self::Pending],
            Self::Finalized => &[],
        }
    }

    pub fn can_transition(self, to: ConsensusStatus) -> bool {
        self.valid_transitions().contains(&to)
    }

    pub fn validate_transition(self, to: ConsensusStatus) -> Result<(), CoreError> {
        if self.can_transition(to) {
            Ok(())
        } else {
            Err(CoreError::Conflict(format!(
                "Invalid consensus transition: {self} -> {to}"
            )))
        }
    }

    /// Statuses that are no longer re-evaluated when annotations arrive.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::ReviewRequired | Self::Finalized)
    }
}

define_text_enum! {
    /// How a consolidated result was produced.
    ConsolidationMethod ("consolidation method") {
        Unanimous = "unanimous",
        Majority = "majority",
        WeightedMajority = "weighted_majority",
        ExpertApproved = "expert_approved",
        ExpertCorrected = "expert_corrected",
    }
}

define_text_enum! {
    /// Vote counting rule configured per project.
    ConsensusMethod ("consensus method") {
        /// One annotation, one vote.
        Majority = "majority",
        /// Votes weighted by the annotator's quality score.
        WeightedMajority = "weighted_majority",
    }
}

impl Default for ConsensusMethod {
    fn default() -> Self {
        Self::Majority
    }
}

define_text_enum! {
    /// Expert adjudication outcome.
    ReviewDecision ("review decision") {
        Approved = "approved",
        Corrected = "corrected",
        Rejected = "rejected",
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// One annotation taking part in consolidation.
#[derive(Debug, Clone, PartialEq)]
pub struct Vote {
    pub annotation_id: DbId,
    pub annotator_id: DbId,
    pub result: Value,
    /// Annotator quality score, `None` without history.
    pub quality_score: Option<f64>,
}

impl Vote {
    fn weight(&self, method: ConsensusMethod) -> f64 {
        match method {
            ConsensusMethod::Majority => 1.0,
            ConsensusMethod::WeightedMajority => self
                .quality_score
                .unwrap_or(DEFAULT_QUALITY_SCORE)
                .max(0.0),
        }
    }
}

/// Outcome of evaluating a task's votes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsensusOutcome {
    pub status: ConsensusStatus,
    /// Agreed result, set only when consensus was reached.
    pub consolidated_result: Option<Value>,
    pub method: Option<ConsolidationMethod>,
    /// Plurality result offered to the expert when escalating.
    pub candidate_result: Option<Value>,
    /// Share of support behind the largest group, `0..=1`.
    pub agreement_score: f64,
    /// Whether the votes split without a majority before escalation.
    pub conflict: bool,
    pub vote_count: usize,
}

struct Group {
    representative: usize,
    members: Vec<usize>,
    support: f64,
}

/// Evaluate agreement among `votes`.
///
/// - fewer than `required` votes: `pending`
/// - one group: `consensus_reached` / `unanimous`
/// - a group with a strict majority of support: `consensus_reached` /
///   `majority` (or `weighted_majority`)
/// - anything else: `conflict`, reported as `review_required`
///
/// `threshold` is the similarity at which two results are treated as equal;
/// `1.0` demands structural equality.
pub fn evaluate_consensus(
    votes: &[Vote],
    required: usize,
    threshold: f64,
    method: ConsensusMethod,
) -> ConsensusOutcome {
    let mut ordered: Vec<&Vote> = votes.iter().collect();
    ordered.sort_by_key(|v| v.annotation_id);

    if ordered.is_empty() || ordered.len() < required {
        return ConsensusOutcome {
            status: ConsensusStatus::Pending,
            consolidated_result: None,
            method: None,
            candidate_result: None,
            agreement_score: 0.0,
            conflict: false,
            vote_count: ordered.len(),
        };
    }

    let groups = group_votes(&ordered, threshold, method);
    let total_support: f64 = groups.iter().map(|g| g.support).sum();

    // Largest support wins; ties go to the group formed first (earliest annotation).
    let mut best = &groups[0];
    for group in &groups[1..] {
        if group.support > best.support {
            best = group;
        }
    }
    let best_result = ordered[best.representative].result.clone();
    let agreement_score = if total_support > 0.0 {
        best.support / total_support
    } else {
        best.members.len() as f64 / ordered.len() as f64
    };

    if groups.len() == 1 {
        return ConsensusOutcome {
            status: ConsensusStatus::ConsensusReached,
            consolidated_result: Some(best_result),
            method: Some(ConsolidationMethod::Unanimous),
            candidate_result: None,
            agreement_score: 1.0,
            conflict: false,
            vote_count: ordered.len(),
        };
    }

    let strict_majority = if total_support > 0.0 {
        best.support * 2.0 > total_support
    } else {
        best.members.len() * 2 > ordered.len()
    };

    if strict_majority {
        let consolidation = match method {
            ConsensusMethod::Majority => ConsolidationMethod::Majority,
            ConsensusMethod::WeightedMajority => ConsolidationMethod::WeightedMajority,
        };
        return ConsensusOutcome {
            status: ConsensusStatus::ConsensusReached,
            consolidated_result: Some(best_result),
            method: Some(consolidation),
            candidate_result: None,
            agreement_score,
            conflict: false,
            vote_count: ordered.len(),
        };
    }

    ConsensusOutcome {
        status: ConsensusStatus::ReviewRequired,
        consolidated_result: None,
        method: None,
        candidate_result: Some(best_result),
        agreement_score,
        conflict: true,
        vote_count: ordered.len(),
    }
}

fn group_votes(ordered: &[&Vote], threshold: f64, method: ConsensusMethod) -> Vec<Group> {
    let mut groups: Vec<Group> = Vec::new();
    for (idx, vote) in ordered.iter().enumerate() {
        let weight = vote.weight(method);
        let existing = groups
            .iter_mut()
            .find(|g| results_match(&ordered[g.representative].result, &vote.result, threshold));
        match existing {
            Some(group) => {
                group.members.push(idx);
                group.support += weight;
            }
            None => groups.push(Group {
                representative: idx,
                members: vec![idx],
                support: weight,
            }),
        }
    }
    groups
}

// ---------------------------------------------------------------------------
// Expert review
// ---------------------------------------------------------------------------

/// What an expert decision does to the task.
#[derive(Debug, Clone, PartialEq)]
pub enum ReviewResolution {
    /// Finalize with the given result.
    Finalize {
        result: Value,
        method: ConsolidationMethod,
    },
    /// Discard the annotations and collect a fresh set.
    Reopen,
}

/// Resolve an expert decision against the escalated candidate.
///
/// `approved` requires a candidate; `corrected` requires the expert's own
/// result.
pub fn resolve_review(
    decision: ReviewDecision,
    candidate: Option<&Value>,
    corrected: Option<&Value>,
) -> Result<ReviewResolution, CoreError> {
    match decision {
        ReviewDecision::Approved => {
            let result = candidate.cloned().ok_or_else(|| {
                CoreError::Validation(
                    "Cannot approve: the task has no candidate result to approve".to_string(),
                )
            })?;
            Ok(ReviewResolution::Finalize {
                result,
                method: ConsolidationMethod::ExpertApproved,
            })
        }
        ReviewDecision::Corrected => {
            let result = corrected.cloned().ok_or_else(|| {
                CoreError::Validation(
                    "A corrected decision must include corrected_result".to_string(),
                )
            })?;
            Ok(ReviewResolution::Finalize {
                result,
                method: ConsolidationMethod::ExpertCorrected,
            })
        }
        ReviewDecision::Rejected => Ok(ReviewResolution::Reopen),
    }
}

/// Minimum and maximum consensus similarity thresholds accepted in config.
pub const MIN_SIMILARITY_THRESHOLD: f64 = 0.5;
pub const MAX_SIMILARITY_THRESHOLD: f64 = 1.0;

/// Validate a configured similarity threshold.
pub fn validate_similarity_threshold(value: f64) -> Result<(), CoreError> {
    if (MIN_SIMILARITY_THRESHOLD..=MAX_SIMILARITY_THRESHOLD).contains(&value) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "consensus_similarity_threshold must be between {MIN_SIMILARITY_THRESHOLD} and {MAX_SIMILARITY_THRESHOLD}, got {value}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn vote(id: DbId, result: Value) -> Vote {
        Vote {
            annotation_id: id,
            annotator_id: id * 10,
            result,
            quality_score: None,
        }
    }

    #[test]
    fn too_few_votes_stay_pending() {
        let out = evaluate_consensus(
            &[vote(1, json!({"choice": "cat"}))],
            2,
            1.0,
            ConsensusMethod::Majority,
        );
        assert_eq!(out.status, ConsensusStatus::Pending);
        assert!(out.consolidated_result.is_none());
    }

    #[test]
    fn unanimous_votes_reach_consensus() {
        let votes = [vote(1, json!({"choice": "cat"})), vote(2, json!({"choice": "cat"}))];
        let out = evaluate_consensus(&votes, 2, 1.0, ConsensusMethod::Majority);
        assert_eq!(out.status, ConsensusStatus::ConsensusReached);
        assert_eq!(out.method, Some(ConsolidationMethod::Unanimous));
        assert_eq!(out.agreement_score, 1.0);
    }

    #[test]
    fn two_to_one_is_majority() {
        let votes = [
            vote(1, json!({"choice": "cat"})),
            vote(2, json!({"choice": "dog"})),
            vote(3, json!({"choice": "cat"})),
        ];
        let out = evaluate_consensus(&votes, 3, 1.0, ConsensusMethod::Majority);
        assert_eq!(out.status, ConsensusStatus::ConsensusReached);
        assert_eq!(out.method, Some(ConsolidationMethod::Majority));
        assert_eq!(out.consolidated_result, Some(json!({"choice": "cat"})));
        assert!((out.agreement_score - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn one_to_one_split_requires_review() {
        let votes = [vote(1, json!({"choice": "cat"})), vote(2, json!({"choice": "dog"}))];
        let out = evaluate_consensus(&votes, 2, 1.0, ConsensusMethod::Majority);
        assert_eq!(out.status, ConsensusStatus::ReviewRequired);
        assert!(out.conflict);
        // The earliest annotation's group is offered as the candidate.
        assert_eq!(out.candidate_result, Some(json!({"choice": "cat"})));
    }

    #[test]
    fn three_way_split_requires_review() {
        let votes = [
            vote(1, json!("a")),
            vote(2, json!("b")),
            vote(3, json!("c")),
        ];
        let out = evaluate_consensus(&votes, 3, 1.0, ConsensusMethod::Majority);
        assert_eq!(out.status, ConsensusStatus::ReviewRequired);
    }

    #[test]
    fn evaluation_ignores_input_order() {
        let a = [
            vote(3, json!({"choice": "cat"})),
            vote(1, json!({"choice": "dog"})),
            vote(2, json!({"choice": "cat"})),
        ];
        let mut b = a.clone();
        b.reverse();
        let out_a = evaluate_consensus(&a, 3, 1.0, ConsensusMethod::Majority);
        let out_b = evaluate_consensus(&b, 3, 1.0, ConsensusMethod::Majority);
        assert_eq!(out_a, out_b);
    }

    #[test]
    fn weighted_majority_prefers_trusted_annotators() {
        let votes = [
            Vote {
                quality_score: Some(95.0),
                ..vote(1, json!("a"))
            },
            Vote {
                quality_score: Some(20.0),
                ..vote(2, json!("b"))
            },
        ];
        let out = evaluate_consensus(&votes, 2, 1.0, ConsensusMethod::WeightedMajority);
        assert_eq!(out.status, ConsensusStatus::ConsensusReached);
        assert_eq!(out.method, Some(ConsolidationMethod::WeightedMajority));
        assert_eq!(out.consolidated_result, Some(json!("a")));
    }

    #[test]
    fn similarity_threshold_groups_close_ratings() {
        let votes = [
            vote(1, json!({"rating": 9})),
            vote(2, json!({"rating": 10})),
        ];
        let out = evaluate_consensus(&votes, 2, 0.85, ConsensusMethod::Majority);
        assert_eq!(out.method, Some(ConsolidationMethod::Unanimous));
        assert_eq!(out.consolidated_result, Some(json!({"rating": 9})));
    }

    #[test]
    fn consensus_transitions() {
        assert!(ConsensusStatus::Pending.can_transition(ConsensusStatus::ConsensusReached));
        assert!(ConsensusStatus::ReviewRequired.can_transition(ConsensusStatus::Finalized));
        assert!(ConsensusStatus::ReviewRequired.can_transition(ConsensusStatus::Pending));
        assert!(ConsensusStatus::Finalized.valid_transitions().is_empty());
        assert!(ConsensusStatus::Finalized
            .validate_transition(ConsensusStatus::Pending)
            .is_err());
    }

    #[test]
    fn approve_uses_candidate() {
        let candidate = json!({"choice": "cat"});
        let res = resolve_review(ReviewDecision::Approved, Some(&candidate), None).unwrap();
        assert_matches!(
            res,
            ReviewResolution::Finalize { method: ConsolidationMethod::ExpertApproved, ref result } if *result == candidate
        );
    }

    #[test]
    fn correction_requires_result() {
        assert!(resolve_review(ReviewDecision::Corrected, None, None).is_err());
        let fixed = json!({"choice": "bird"});
        assert_matches!(
            resolve_review(ReviewDecision::Corrected, None, Some(&fixed)),
            Ok(ReviewResolution::Finalize { method: ConsolidationMethod::ExpertCorrected, .. })
        );
    }

    #[test]
    fn rejection_reopens() {
        assert_eq!(
            resolve_review(ReviewDecision::Rejected, None, None).unwrap(),
            ReviewResolution::Reopen
        );
    }
}
