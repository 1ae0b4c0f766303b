//! Overlap calculation: how many independent annotators each task needs.

use serde::Serialize;

use crate::error::CoreError;

/// Smallest supported overlap.
pub const MIN_OVERLAP: i64 = 1;

/// Largest supported overlap. Higher values are rejected by config validation.
pub const MAX_OVERLAP: i64 = 3;

/// Result of an overlap calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OverlapCalculation {
    /// Required independent annotators per task.
    pub overlap: i64,
    /// Annotators with an active project binding.
    pub total: i64,
    /// Bound annotators that currently have spare capacity.
    pub available: i64,
}

/// Compute the optimal overlap from annotator counts.
///
/// Uses `max(total, available)` so the target does not collapse while every
/// annotator is momentarily saturated; new assignments simply queue.
pub fn calculate_optimal_overlap(total: i64, available: i64) -> OverlapCalculation {
    let pool = total.max(available);
    let overlap = pool.clamp(MIN_OVERLAP, MAX_OVERLAP);
    OverlapCalculation {
        overlap,
        total,
        available,
    }
}

/// Apply an operator override, if one is configured.
pub fn effective_overlap(calculated: &OverlapCalculation, required_overlap: Option<i64>) -> i64 {
    required_overlap.unwrap_or(calculated.overlap)
}

/// Validate an operator-provided overlap value.
pub fn validate_required_overlap(value: i64) -> Result<(), CoreError> {
    if (MIN_OVERLAP..=MAX_OVERLAP).contains(&value) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "required_overlap must be between {MIN_OVERLAP} and {MAX_OVERLAP}, got {value}"
        )))
    }
}

/// Annotators still needed for a task, never negative.
pub fn needed_annotators(overlap: i64, live_assignments: i64) -> i64 {
    (overlap - live_assignments).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_annotators_with_capacity() {
        assert_eq!(
            calculate_optimal_overlap(3, 3),
            OverlapCalculation {
                overlap: 3,
                total: 3,
                available: 3
            }
        );
    }

    #[test]
    fn overlap_is_min_three_max_one_n() {
        for n in 0..50 {
            let calc = calculate_optimal_overlap(n, n);
            assert_eq!(calc.overlap, n.clamp(1, 3));
            assert!(calc.overlap <= MAX_OVERLAP);
        }
    }

    #[test]
    fn saturated_pool_keeps_overlap() {
        assert_eq!(calculate_optimal_overlap(3, 0).overlap, 3);
        assert_eq!(calculate_optimal_overlap(2, 0).overlap, 2);
    }

    #[test]
    fn empty_pool_defaults_to_one() {
        assert_eq!(calculate_optimal_overlap(0, 0).overlap, 1);
    }

    #[test]
    fn override_wins() {
        let calc = calculate_optimal_overlap(5, 5);
        assert_eq!(effective_overlap(&calc, Some(2)), 2);
        assert_eq!(effective_overlap(&calc, None), 3);
    }

    #[test]
    fn four_is_unsupported() {
        assert!(validate_required_overlap(4).is_err());
        assert!(validate_required_overlap(0).is_err());
        assert!(validate_required_overlap(2).is_ok());
    }

    #[test]
    fn needed_never_negative() {
        assert_eq!(needed_annotators(2, 3), 0);
        assert_eq!(needed_annotators(3, 1), 2);
    }
}
