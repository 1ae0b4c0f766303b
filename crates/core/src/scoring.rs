//! Annotator suitability scoring.
//!
//! A score in `0..=100` is the weighted sum of five components, each already
//! normalised to `0..=100`. Weights are percentages and must add up to 100.

use serde::{Deserialize, Serialize};

use crate::assignment::AssignmentStrategy;
use crate::error::CoreError;
use crate::trust::{clamp_quality, TrustTier, DEFAULT_QUALITY_SCORE};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Availability score when the annotator completed work in the recent window.
pub const AVAILABILITY_ACTIVE: f64 = 90.0;

/// Availability score otherwise.
pub const AVAILABILITY_IDLE: f64 = 60.0;

/// Length of the "recently active" window in days.
pub const RECENT_ACTIVITY_DAYS: i64 = 7;

/// Floor of the task-fit component.
pub const TASK_FIT_FLOOR: f64 = 50.0;

// ---------------------------------------------------------------------------
// Weights
// ---------------------------------------------------------------------------

/// Percentage weights of the five score components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub workload: f64,
    pub performance: f64,
    pub expertise: f64,
    pub availability: f64,
    pub task_fit: f64,
}

impl ScoringWeights {
    /// Default weight profile: 30 / 25 / 20 / 15 / 10.
    pub const BALANCED: Self = Self {
        workload: 30.0,
        performance: 25.0,
        expertise: 20.0,
        availability: 15.0,
        task_fit: 10.0,
    };

    /// Profile favouring historical quality.
    pub const QUALITY_FIRST: Self = Self {
        workload: 15.0,
        performance: 40.0,
        expertise: 25.0,
        availability: 10.0,
        task_fit: 10.0,
    };

    /// Profile favouring idle annotators.
    pub const WORKLOAD_FIRST: Self = Self {
        workload: 50.0,
        performance: 20.0,
        expertise: 10.0,
        availability: 10.0,
        task_fit: 10.0,
    };

    /// Weight profile used by an assignment strategy.
    pub fn for_strategy(strategy: AssignmentStrategy) -> Self {
        match strategy {
            AssignmentStrategy::Balanced => Self::BALANCED,
            AssignmentStrategy::QualityFirst => Self::QUALITY_FIRST,
            AssignmentStrategy::WorkloadFirst => Self::WORKLOAD_FIRST,
        }
    }

    fn total(&self) -> f64 {
        self.workload + self.performance + self.expertise + self.availability + self.task_fit
    }

    /// Weights must be non-negative and sum to 100.
    pub fn validate(&self) -> Result<(), CoreError> {
        let parts = [
            self.workload,
            self.performance,
            self.expertise,
            self.availability,
            self.task_fit,
        ];
        if parts.iter().any(|w| *w < 0.0 || !w.is_finite()) {
            return Err(CoreError::Validation(
                "Scoring weights must be finite and non-negative".to_string(),
            ));
        }
        let total = self.total();
        if (total - 100.0).abs() > 1e-6 {
            return Err(CoreError::Validation(format!(
                "Scoring weights must sum to 100, got {total}"
            )));
        }
        Ok(())
    }
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self::BALANCED
    }
}

// ---------------------------------------------------------------------------
// Inputs / outputs
// ---------------------------------------------------------------------------

/// Everything the scoring function needs about one (annotator, task) pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreInput {
    pub tier: TrustTier,
    /// Current active assignments of the annotator in the project.
    pub active_count: i64,
    /// Capacity ceiling of the annotator in the project.
    pub ceiling: i64,
    /// Rolling quality score, `None` without history.
    pub quality_score: Option<f64>,
    /// Whether the annotator completed at least one assignment recently.
    pub completed_recently: bool,
    /// Task complexity in `0..=100`.
    pub task_complexity: f64,
}

/// Per-component breakdown, useful for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub workload: f64,
    pub performance: f64,
    pub expertise: f64,
    pub availability: f64,
    pub task_fit: f64,
    pub total: f64,
}

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

/// `100 - 100 * load / ceiling`, clamped to `0..=100`.
pub fn workload_component(active_count: i64, ceiling: i64) -> f64 {
    if ceiling <= 0 {
        return 0.0;
    }
    let ratio = active_count.max(0) as f64 / ceiling as f64;
    (100.0 - 100.0 * ratio).clamp(0.0, 100.0)
}

/// Rolling quality, or the default for annotators without history.
pub fn performance_component(quality_score: Option<f64>) -> f64 {
    quality_score
        .map(clamp_quality)
        .unwrap_or(DEFAULT_QUALITY_SCORE)
}

/// 90 when recently active, else 60.
pub fn availability_component(completed_recently: bool) -> f64 {
    if completed_recently {
        AVAILABILITY_ACTIVE
    } else {
        AVAILABILITY_IDLE
    }
}

/// `100 - |quality - complexity|`, clamped to `50..=100`.
pub fn task_fit_component(quality_score: Option<f64>, task_complexity: f64) -> f64 {
    let quality = performance_component(quality_score);
    let complexity = task_complexity.clamp(0.0, 100.0);
    (100.0 - (quality - complexity).abs()).clamp(TASK_FIT_FLOOR, 100.0)
}

// ---------------------------------------------------------------------------
// Score
// ---------------------------------------------------------------------------

/// Compute the full breakdown for one candidate.
pub fn score_breakdown(input: &ScoreInput, weights: &ScoringWeights) -> ScoreBreakdown {
    let workload = workload_component(input.active_count, input.ceiling);
    let performance = performance_component(input.quality_score);
    let expertise = input.tier.expertise_score();
    let availability = availability_component(input.completed_recently);
    let task_fit = task_fit_component(input.quality_score, input.task_complexity);

    let weighted = workload * weights.workload
        + performance * weights.performance
        + expertise * weights.expertise
        + availability * weights.availability
        + task_fit * weights.task_fit;

    let total_weight = weights.total();
    let total = if total_weight > 0.0 {
        (weighted / total_weight).clamp(0.0, 100.0)
    } else {
        0.0
    };

    ScoreBreakdown {
        workload,
        performance,
        expertise,
        availability,
        task_fit,
        total,
    }
}

/// Suitability of an annotator for a task, in `0..=100`.
pub fn score(input: &ScoreInput, weights: &ScoringWeights) -> f64 {
    score_breakdown(input, weights).total
}
