//! Typed per-project assignment configuration.
//!
//! A project without a stored configuration uses [`AssignmentConfig::default`].
//! Partial updates arrive as [`AssignmentConfigUpdate`] and are validated as a
//! whole after merging, so a bad field never half-applies.

use serde::{Deserialize, Deserializer, Serialize};

use crate::assignment::AssignmentStrategy;
use crate::capacity::CapacityLimits;
use crate::consensus::{validate_similarity_threshold, ConsensusMethod};
use crate::error::CoreError;
use crate::honeypot::HoneypotSettings;
use crate::overlap::validate_required_overlap;
use crate::trust::TrustPolicy;

/// Default number of tasks loaded per allocation batch.
pub const DEFAULT_ALLOCATION_BATCH_SIZE: i64 = 100;

/// Default age after which a never-started assignment is considered stale.
pub const DEFAULT_STALE_ASSIGNMENT_HOURS: i64 = 24;

/// Default load ratio (relative to the average) below which an annotator is under-loaded.
pub const DEFAULT_BALANCE_LOW_RATIO: f64 = 0.5;

/// Default number of extra tasks handed to an under-loaded annotator per pass.
pub const DEFAULT_BALANCE_BATCH_SIZE: i64 = 5;

/// Maximum accepted allocation batch size.
const MAX_ALLOCATION_BATCH_SIZE: i64 = 10_000;

/// Assignment, consensus and quality-control settings of one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssignmentConfig {
    /// Operator override of the calculated overlap (1..=3).
    pub required_overlap: Option<i64>,
    /// Automatically allocate when tasks are created or annotators join.
    pub auto_assign: bool,
    pub assignment_strategy: AssignmentStrategy,
    pub capacity: CapacityLimits,
    pub honeypot: HoneypotSettings,
    pub consensus_method: ConsensusMethod,
    /// Similarity at which two results count as the same answer.
    pub consensus_similarity_threshold: f64,
    pub allocation_batch_size: i64,
    pub stale_assignment_hours: i64,
    pub balance_low_ratio: f64,
    pub balance_batch_size: i64,
    pub trust_policy: TrustPolicy,
}

impl Default for AssignmentConfig {
    fn default() -> Self {
        Self {
            required_overlap: None,
            auto_assign: true,
            assignment_strategy: AssignmentStrategy::default(),
            capacity: CapacityLimits::default(),
            honeypot: HoneypotSettings::default(),
            consensus_method: ConsensusMethod::default(),
            consensus_similarity_threshold: 1.0,
            allocation_batch_size: DEFAULT_ALLOCATION_BATCH_SIZE,
            stale_assignment_hours: DEFAULT_STALE_ASSIGNMENT_HOURS,
            balance_low_ratio: DEFAULT_BALANCE_LOW_RATIO,
            balance_batch_size: DEFAULT_BALANCE_BATCH_SIZE,
            trust_policy: TrustPolicy::default(),
        }
    }
}

impl AssignmentConfig {
    /// Validate every field.
    pub fn validate(&self) -> Result<(), CoreError> {
        if let Some(overlap) = self.required_overlap {
            validate_required_overlap(overlap)?;
        }
        self.capacity.validate()?;
        self.honeypot.validate()?;
        self.trust_policy.validate()?;
        validate_similarity_threshold(self.consensus_similarity_threshold)?;

        if !(1..=MAX_ALLOCATION_BATCH_SIZE).contains(&self.allocation_batch_size) {
            return Err(CoreError::Validation(format!(
                "allocation_batch_size must be between 1 and {MAX_ALLOCATION_BATCH_SIZE}, got {}",
                self.allocation_batch_size
            )));
        }
        if self.stale_assignment_hours < 1 {
            return Err(CoreError::Validation(format!(
                "stale_assignment_hours must be at least 1, got {}",
                self.stale_assignment_hours
            )));
        }
        if !(0.0..=1.0).contains(&self.balance_low_ratio) {
            return Err(CoreError::Validation(format!(
                "balance_low_ratio must be between 0.0 and 1.0, got {}",
                self.balance_low_ratio
            )));
        }
        if self.balance_batch_size < 1 {
            return Err(CoreError::Validation(format!(
                "balance_batch_size must be at least 1, got {}",
                self.balance_batch_size
            )));
        }
        Ok(())
    }

    /// Merge a partial update and validate the result.
    pub fn apply(&self, update: &AssignmentConfigUpdate) -> Result<Self, CoreError> {
        let mut next = self.clone();
        if let Some(overlap) = update.required_overlap {
            next.required_overlap = overlap;
        }
        if let Some(v) = update.auto_assign {
            next.auto_assign = v;
        }
        if let Some(v) = update.assignment_strategy {
            next.assignment_strategy = v;
        }
        if let Some(v) = update.capacity {
            next.capacity = v;
        }
        if let Some(v) = update.honeypot {
            next.honeypot = v;
        }
        if let Some(v) = update.consensus_method {
            next.consensus_method = v;
        }
        if let Some(v) = update.consensus_similarity_threshold {
            next.consensus_similarity_threshold = v;
        }
        if let Some(v) = update.allocation_batch_size {
            next.allocation_batch_size = v;
        }
        if let Some(v) = update.stale_assignment_hours {
            next.stale_assignment_hours = v;
        }
        if let Some(v) = update.balance_low_ratio {
            next.balance_low_ratio = v;
        }
        if let Some(v) = update.balance_batch_size {
            next.balance_batch_size = v;
        }
        if let Some(v) = update.trust_policy {
            next.trust_policy = v;
        }
        next.validate()?;
        Ok(next)
    }
}

/// Partial update of an [`AssignmentConfig`]. Unknown fields are rejected.
///
/// `required_overlap` distinguishes "absent" (keep) from `null` (clear the
/// override and fall back to the calculated overlap).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssignmentConfigUpdate {
    #[serde(default, deserialize_with = "explicit_option")]
    pub required_overlap: Option<Option<i64>>,
    pub auto_assign: Option<bool>,
    pub assignment_strategy: Option<AssignmentStrategy>,
    pub capacity: Option<CapacityLimits>,
    pub honeypot: Option<HoneypotSettings>,
    pub consensus_method: Option<ConsensusMethod>,
    pub consensus_similarity_threshold: Option<f64>,
    pub allocation_batch_size: Option<i64>,
    pub stale_assignment_hours: Option<i64>,
    pub balance_low_ratio: Option<f64>,
    pub balance_batch_size: Option<i64>,
    pub trust_policy: Option<TrustPolicy>,
}

fn explicit_option<'de, D>(deserializer: D) -> Result<Option<Option<i64>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<i64>::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(AssignmentConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_update_keeps_other_fields() {
        let update: AssignmentConfigUpdate =
            serde_json::from_value(json!({"required_overlap": 2, "balance_batch_size": 3}))
                .unwrap();
        let next = AssignmentConfig::default().apply(&update).unwrap();
        assert_eq!(next.required_overlap, Some(2));
        assert_eq!(next.balance_batch_size, 3);
        assert_eq!(next.allocation_batch_size, DEFAULT_ALLOCATION_BATCH_SIZE);
    }

    #[test]
    fn null_clears_overlap_override() {
        let base = AssignmentConfig {
            required_overlap: Some(2),
            ..AssignmentConfig::default()
        };
        let update: AssignmentConfigUpdate =
            serde_json::from_value(json!({"required_overlap": null})).unwrap();
        assert_eq!(base.apply(&update).unwrap().required_overlap, None);

        let untouched: AssignmentConfigUpdate = serde_json::from_value(json!({})).unwrap();
        assert_eq!(base.apply(&untouched).unwrap().required_overlap, Some(2));
    }

    #[test]
    fn overlap_of_four_rejected() {
        let update = AssignmentConfigUpdate {
            required_overlap: Some(Some(4)),
            ..AssignmentConfigUpdate::default()
        };
        assert!(AssignmentConfig::default().apply(&update).is_err());
    }

    #[test]
    fn unknown_field_rejected() {
        let parsed: Result<AssignmentConfigUpdate, _> =
            serde_json::from_value(json!({"overlap": 2}));
        assert!(parsed.is_err());
    }

    #[test]
    fn unknown_strategy_rejected() {
        let parsed: Result<AssignmentConfigUpdate, _> =
            serde_json::from_value(json!({"assignment_strategy": "random"}));
        assert!(parsed.is_err());
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = AssignmentConfig {
            required_overlap: Some(3),
            ..AssignmentConfig::default()
        };
        let value = serde_json::to_value(&config).unwrap();
        let back: AssignmentConfig = serde_json::from_value(value).unwrap();
        assert_eq!(back, config);
    }
}
