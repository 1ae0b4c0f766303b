//! Honeypot probe injection and grading.
//!
//! A probe is a task with a known-correct answer served indistinguishably
//! from regular work. Whether to serve one is decided when the annotator asks
//! for their next task; grading compares the submission to ground truth.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::similarity::result_similarity;

/// Default per-probe tolerance (minimum similarity to pass).
pub const DEFAULT_TOLERANCE: f64 = 0.8;

/// Default fraction of "next task" requests that serve a probe.
pub const DEFAULT_INJECTION_RATE: f64 = 0.1;

/// Default number of regular tasks between two probes for one annotator.
pub const DEFAULT_MIN_INTERVAL: i64 = 5;

/// Per-project honeypot configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HoneypotSettings {
    pub enabled: bool,
    /// Probability in `0..=1` of serving a probe when one is allowed.
    pub injection_rate: f64,
    /// Regular tasks that must be served since the previous probe.
    pub min_interval: i64,
    /// Tolerance applied to probes created without an explicit one.
    pub default_tolerance: f64,
}

impl Default for HoneypotSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            injection_rate: DEFAULT_INJECTION_RATE,
            min_interval: DEFAULT_MIN_INTERVAL,
            default_tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl HoneypotSettings {
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(0.0..=1.0).contains(&self.injection_rate) {
            return Err(CoreError::Validation(format!(
                "honeypot.injection_rate must be between 0.0 and 1.0, got {}",
                self.injection_rate
            )));
        }
        if self.min_interval < 0 {
            return Err(CoreError::Validation(format!(
                "honeypot.min_interval must not be negative, got {}",
                self.min_interval
            )));
        }
        validate_tolerance(self.default_tolerance)
    }
}

/// Validate a probe tolerance.
pub fn validate_tolerance(tolerance: f64) -> Result<(), CoreError> {
    if (0.0..=1.0).contains(&tolerance) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "tolerance must be between 0.0 and 1.0, got {tolerance}"
        )))
    }
}

// ---------------------------------------------------------------------------
// Injection
// ---------------------------------------------------------------------------

/// Why a probe was or was not injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionDecision {
    Inject,
    Disabled,
    NoUnseenProbe,
    IntervalNotElapsed,
    RollMissed,
}

impl InjectionDecision {
    pub fn should_inject(self) -> bool {
        self == Self::Inject
    }
}

/// Decide whether to serve a probe.
///
/// `tasks_since_last_probe` is `None` when the annotator has never been
/// served a probe in this project; such annotators are always eligible.
/// `roll` is a uniform sample in `0..1`.
pub fn decide_injection(
    settings: &HoneypotSettings,
    has_unseen_probe: bool,
    tasks_since_last_probe: Option<i64>,
    roll: f64,
) -> InjectionDecision {
    if !settings.enabled {
        return InjectionDecision::Disabled;
    }
    if !has_unseen_probe {
        return InjectionDecision::NoUnseenProbe;
    }
    if let Some(served) = tasks_since_last_probe {
        if served < settings.min_interval {
            return InjectionDecision::IntervalNotElapsed;
        }
    }
    if roll < settings.injection_rate {
        InjectionDecision::Inject
    } else {
        InjectionDecision::RollMissed
    }
}

// ---------------------------------------------------------------------------
// Grading
// ---------------------------------------------------------------------------

/// Result of grading one probe submission.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProbeGrade {
    pub similarity: f64,
    pub passed: bool,
}

/// Grade a submission against ground truth.
///
/// Anything that cannot be compared (null, wrong shape) has similarity 0 and
/// therefore fails: a malformed answer is never skipped.
pub fn grade_submission(ground_truth: &Value, submitted: &Value, tolerance: f64) -> ProbeGrade {
    if submitted.is_null() {
        return ProbeGrade {
            similarity: 0.0,
            passed: false,
        };
    }
    let similarity = result_similarity(ground_truth, submitted);
    let passed = if tolerance >= 1.0 {
        ground_truth == submitted
    } else {
        similarity >= tolerance
    };
    ProbeGrade { similarity, passed }
}
