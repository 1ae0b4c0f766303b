//! Capacity model: trust tier -> maximum concurrent active assignments.
//!
//! Active means `assigned` or `in_progress`. Counts are taken per project.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::trust::TrustTier;

/// Default ceiling for novice annotators.
pub const DEFAULT_NOVICE_CAPACITY: i64 = 5;
/// Default ceiling for intermediate annotators.
pub const DEFAULT_INTERMEDIATE_CAPACITY: i64 = 10;
/// Default ceiling for expert annotators.
pub const DEFAULT_EXPERT_CAPACITY: i64 = 15;
/// Default ceiling for master annotators.
pub const DEFAULT_MASTER_CAPACITY: i64 = 20;

/// Upper bound accepted for any configured ceiling.
const MAX_CONFIGURABLE_CAPACITY: i64 = 1_000;

/// Per-tier capacity ceilings, overridable per project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityLimits {
    pub novice: i64,
    pub intermediate: i64,
    pub expert: i64,
    pub master: i64,
}

impl Default for CapacityLimits {
    fn default() -> Self {
        Self {
            novice: DEFAULT_NOVICE_CAPACITY,
            intermediate: DEFAULT_INTERMEDIATE_CAPACITY,
            expert: DEFAULT_EXPERT_CAPACITY,
            master: DEFAULT_MASTER_CAPACITY,
        }
    }
}

impl CapacityLimits {
    /// Maximum concurrent active assignments for `tier`.
    pub fn ceiling(&self, tier: TrustTier) -> i64 {
        match tier {
            TrustTier::Novice => self.novice,
            TrustTier::Intermediate => self.intermediate,
            TrustTier::Expert => self.expert,
            TrustTier::Master => self.master,
        }
    }

    /// Whether an annotator of `tier` with `active_count` assignments may take one more.
    pub fn has_capacity(&self, tier: TrustTier, active_count: i64) -> bool {
        active_count < self.ceiling(tier)
    }

    /// Free slots left for an annotator of `tier`, never negative.
    pub fn remaining(&self, tier: TrustTier, active_count: i64) -> i64 {
        (self.ceiling(tier) - active_count).max(0)
    }

    /// Every ceiling must be in `1..=1000`.
    pub fn validate(&self) -> Result<(), CoreError> {
        for tier in TrustTier::ALL {
            let value = self.ceiling(*tier);
            if !(1..=MAX_CONFIGURABLE_CAPACITY).contains(&value) {
                return Err(CoreError::Validation(format!(
                    "capacity.{tier} must be between 1 and {MAX_CONFIGURABLE_CAPACITY}, got {value}"
                )));
            }
        }
        Ok(())
    }
}
