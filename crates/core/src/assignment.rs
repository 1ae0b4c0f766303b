//! Assignment statuses, project roles, strategies and reassignment actions.

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Task assignment status
// ---------------------------------------------------------------------------

define_text_enum! {
    /// Lifecycle of one annotator's claim on one task.
    AssignmentStatus ("assignment status") {
        Assigned = "assigned",
        InProgress = "in_progress",
        Completed = "completed",
        Expired = "expired",
    }
}

/// Statuses that count against an annotator's capacity.
pub const ACTIVE_STATUSES: &[AssignmentStatus] =
    &[AssignmentStatus::Assigned, AssignmentStatus::InProgress];

impl AssignmentStatus {
    /// Whether the assignment occupies a capacity slot.
    pub fn is_active(self) -> bool {
        ACTIVE_STATUSES.contains(&self)
    }

    /// Everything except `expired` blocks a second claim on the same task.
    pub fn is_live(self) -> bool {
        self != Self::Expired
    }

    /// Target statuses reachable from `self`.
    ///
    /// Transitions only move forward. Manual reassignment expires the old
    /// record and creates a new one rather than moving backwards.
    pub fn valid_transitions(self) -> &'static [AssignmentStatus] {
        match self {
            Self::Assigned => &[Self::InProgress, Self::Completed, Self::Expired],
            Self::InProgress => &[Self::Completed, Self::Expired],
            Self::Completed => &[Self::Expired],
            Self::Expired => &[],
        }
    }

    pub fn can_transition(self, to: AssignmentStatus) -> bool {
        self.valid_transitions().contains(&to)
    }

    /// Validate a transition, returning a descriptive conflict otherwise.
    pub fn validate_transition(self, to: AssignmentStatus) -> Result<(), CoreError> {
        if self.can_transition(to) {
            Ok(())
        } else {
            Err(CoreError::Conflict(format!(
                "Invalid assignment transition: {self} -> {to}"
            )))
        }
    }
}

// ---------------------------------------------------------------------------
// Project role
// ---------------------------------------------------------------------------

define_text_enum! {
    /// Role of an annotator bound to a project.
    ProjectRole ("role") {
        Annotator = "annotator",
        Reviewer = "reviewer",
    }
}

// ---------------------------------------------------------------------------
// Assignment strategy
// ---------------------------------------------------------------------------

define_text_enum! {
    /// Scoring weight profile used when auto-assigning.
    AssignmentStrategy ("assignment strategy") {
        Balanced = "balanced",
        QualityFirst = "quality_first",
        WorkloadFirst = "workload_first",
    }
}

impl Default for AssignmentStrategy {
    fn default() -> Self {
        Self::Balanced
    }
}

// ---------------------------------------------------------------------------
// Reassignment actions
// ---------------------------------------------------------------------------

define_text_enum! {
    /// Actions accepted by the manual `reassign` operation.
    ReassignAction ("reassign action") {
        /// Expire never-started assignments past a threshold and replace them.
        Stale = "stale",
        /// Re-run allocation when capacity is available.
        Capacity = "capacity",
        /// Move work towards under-loaded annotators.
        Balance = "balance",
        /// Manually move one annotator's assignment on a task.
        Task = "task",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_statuses() {
        assert!(AssignmentStatus::Assigned.is_active());
        assert!(AssignmentStatus::InProgress.is_active());
        assert!(!AssignmentStatus::Completed.is_active());
        assert!(!AssignmentStatus::Expired.is_live());
        assert!(AssignmentStatus::Completed.is_live());
    }

    #[test]
    fn transitions_only_move_forward() {
        assert!(AssignmentStatus::Assigned.can_transition(AssignmentStatus::InProgress));
        assert!(AssignmentStatus::InProgress.can_transition(AssignmentStatus::Completed));
        assert!(!AssignmentStatus::Completed.can_transition(AssignmentStatus::InProgress));
        assert!(AssignmentStatus::Expired.valid_transitions().is_empty());
    }

    #[test]
    fn invalid_transition_is_conflict() {
        let err = AssignmentStatus::Expired
            .validate_transition(AssignmentStatus::Assigned)
            .unwrap_err();
        assert!(err.to_string().contains("expired -> assigned"));
    }

    #[test]
    fn unknown_role_rejected_with_choices() {
        let err = "owner".parse::<ProjectRole>().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("annotator"));
        assert!(msg.contains("reviewer"));
    }

    #[test]
    fn unknown_reassign_action_rejected() {
        assert!("shuffle".parse::<ReassignAction>().is_err());
        assert_eq!("stale".parse::<ReassignAction>().unwrap(), ReassignAction::Stale);
    }

    #[test]
    fn status_serializes_as_snake_case() {
        let json = serde_json::to_string(&AssignmentStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }
}
