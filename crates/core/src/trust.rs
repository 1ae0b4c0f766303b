//! Trust tiers, rolling quality scores and the tier transition policy.
//!
//! Honeypot outcomes and finalized-consensus agreement both feed the same
//! quality score; only honeypot outcomes move an annotator between tiers.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Quality score assumed for an annotator with no history.
pub const DEFAULT_QUALITY_SCORE: f64 = 70.0;

/// Lower bound of the quality score.
pub const MIN_QUALITY_SCORE: f64 = 0.0;

/// Upper bound of the quality score.
pub const MAX_QUALITY_SCORE: f64 = 100.0;

/// Smoothing factor of the exponential moving average over outcomes.
pub const QUALITY_EMA_ALPHA: f64 = 0.1;

// ---------------------------------------------------------------------------
// Trust tier
// ---------------------------------------------------------------------------

define_text_enum! {
    /// Coarse annotator classification driving capacity and scoring weight.
    TrustTier ("trust tier") {
        Novice = "novice",
        Intermediate = "intermediate",
        Expert = "expert",
        Master = "master",
    }
}

impl TrustTier {
    /// Zero-based rank, novice = 0.
    pub fn rank(self) -> usize {
        match self {
            Self::Novice => 0,
            Self::Intermediate => 1,
            Self::Expert => 2,
            Self::Master => 3,
        }
    }

    /// Base expertise score used by the scoring function.
    pub fn expertise_score(self) -> f64 {
        match self {
            Self::Novice => 60.0,
            Self::Intermediate => 75.0,
            Self::Expert => 90.0,
            Self::Master => 100.0,
        }
    }

    /// One tier up, saturating at master.
    pub fn promoted(self) -> Self {
        match self {
            Self::Novice => Self::Intermediate,
            Self::Intermediate => Self::Expert,
            Self::Expert | Self::Master => Self::Master,
        }
    }

    /// One tier down, saturating at novice.
    pub fn demoted(self) -> Self {
        match self {
            Self::Novice | Self::Intermediate => Self::Novice,
            Self::Expert => Self::Intermediate,
            Self::Master => Self::Expert,
        }
    }
}

// ---------------------------------------------------------------------------
// Quality score
// ---------------------------------------------------------------------------

/// Clamp a quality score into `[0, 100]`. NaN collapses to the default.
pub fn clamp_quality(score: f64) -> f64 {
    if score.is_nan() {
        return DEFAULT_QUALITY_SCORE;
    }
    score.clamp(MIN_QUALITY_SCORE, MAX_QUALITY_SCORE)
}

/// Fold one pass/fail outcome into a rolling quality score.
///
/// `current` is `None` for annotators without history, in which case the
/// average starts from [`DEFAULT_QUALITY_SCORE`].
pub fn update_quality(current: Option<f64>, passed: bool) -> f64 {
    let base = current.map(clamp_quality).unwrap_or(DEFAULT_QUALITY_SCORE);
    let sample = if passed {
        MAX_QUALITY_SCORE
    } else {
        MIN_QUALITY_SCORE
    };
    clamp_quality(base * (1.0 - QUALITY_EMA_ALPHA) + sample * QUALITY_EMA_ALPHA)
}

// ---------------------------------------------------------------------------
// Honeypot statistics
// ---------------------------------------------------------------------------

/// Cumulative honeypot counters for one annotator.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TrustStats {
    pub total: i64,
    pub passed: i64,
    /// Outcomes recorded since the annotator's tier last changed.
    pub since_tier_change: i64,
}

impl TrustStats {
    /// `passed / total`, or `0.0` before any probe was seen.
    pub fn pass_rate(&self) -> f64 {
        if self.total <= 0 {
            0.0
        } else {
            self.passed as f64 / self.total as f64
        }
    }

    /// Return the counters after one more outcome.
    pub fn record(self, passed: bool) -> Self {
        Self {
            total: self.total + 1,
            passed: self.passed + i64::from(passed),
            since_tier_change: self.since_tier_change + 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Tier policy
// ---------------------------------------------------------------------------

/// Thresholds controlling tier upgrades and downgrades.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustPolicy {
    /// Pass rate strictly below which an annotator is downgraded.
    pub downgrade_below: f64,
    /// Probes required before a downgrade is considered.
    pub downgrade_min_samples: i64,
    /// Pass rate at or above which an annotator is upgraded.
    pub upgrade_at: f64,
    /// Probes required before an upgrade is considered.
    pub upgrade_min_samples: i64,
    /// Outcomes required since the previous tier change.
    pub min_samples_between_changes: i64,
}

impl Default for TrustPolicy {
    fn default() -> Self {
        Self {
            downgrade_below: 0.6,
            downgrade_min_samples: 10,
            upgrade_at: 0.9,
            upgrade_min_samples: 20,
            min_samples_between_changes: 10,
        }
    }
}

/// Result of applying the policy to an annotator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierChange {
    Unchanged,
    Downgraded { from: TrustTier, to: TrustTier },
    Upgraded { from: TrustTier, to: TrustTier },
}

impl TierChange {
    /// The tier the annotator holds after the change.
    pub fn resulting_tier(self, current: TrustTier) -> TrustTier {
        match self {
            Self::Unchanged => current,
            Self::Downgraded { to, .. } | Self::Upgraded { to, .. } => to,
        }
    }
}

impl TrustPolicy {
    /// Validate that thresholds are in range and consistent.
    pub fn validate(&self) -> Result<(), CoreError> {
        for (name, value) in [
            ("downgrade_below", self.downgrade_below),
            ("upgrade_at", self.upgrade_at),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(CoreError::Validation(format!(
                    "trust_policy.{name} must be between 0.0 and 1.0, got {value}"
                )));
            }
        }
        if self.upgrade_at < self.downgrade_below {
            return Err(CoreError::Validation(format!(
                "trust_policy.upgrade_at ({}) must be >= downgrade_below ({})",
                self.upgrade_at, self.downgrade_below
            )));
        }
        for (name, value) in [
            ("downgrade_min_samples", self.downgrade_min_samples),
            ("upgrade_min_samples", self.upgrade_min_samples),
            ("min_samples_between_changes", self.min_samples_between_changes),
        ] {
            if value < 1 {
                return Err(CoreError::Validation(format!(
                    "trust_policy.{name} must be at least 1, got {value}"
                )));
            }
        }
        Ok(())
    }

    /// Decide whether `tier` should move given the updated `stats`.
    ///
    /// Downgrades take precedence; a tier never moves past novice or master.
    pub fn evaluate(&self, tier: TrustTier, stats: &TrustStats) -> TierChange {
        if stats.since_tier_change < self.min_samples_between_changes {
            return TierChange::Unchanged;
        }

        let rate = stats.pass_rate();

        if stats.total >= self.downgrade_min_samples
            && rate < self.downgrade_below
            && tier != TrustTier::Novice
        {
            return TierChange::Downgraded {
                from: tier,
                to: tier.demoted(),
            };
        }

        if stats.total >= self.upgrade_min_samples
            && rate >= self.upgrade_at
            && tier != TrustTier::Master
        {
            return TierChange::Upgraded {
                from: tier,
                to: tier.promoted(),
            };
        }

        TierChange::Unchanged
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(total: i64, passed: i64, since: i64) -> TrustStats {
        TrustStats {
            total,
            passed,
            since_tier_change: since,
        }
    }

    #[test]
    fn tier_round_trips_through_strings() {
        for tier in TrustTier::ALL {
            assert_eq!(tier.as_str().parse::<TrustTier>().unwrap(), *tier);
        }
        assert!("grandmaster".parse::<TrustTier>().is_err());
    }

    #[test]
    fn promotion_and_demotion_saturate() {
        assert_eq!(TrustTier::Master.promoted(), TrustTier::Master);
        assert_eq!(TrustTier::Novice.demoted(), TrustTier::Novice);
        assert_eq!(TrustTier::Expert.demoted(), TrustTier::Intermediate);
    }

    #[test]
    fn quality_starts_from_default() {
        let q = update_quality(None, true);
        // 70 * 0.9 + 100 * 0.1 = 73
        assert!((q - 73.0).abs() < 1e-9);
    }

    #[test]
    fn quality_stays_clamped() {
        assert!(update_quality(Some(100.0), true) <= MAX_QUALITY_SCORE);
        assert!(update_quality(Some(0.0), false) >= MIN_QUALITY_SCORE);
        assert_eq!(clamp_quality(140.0), 100.0);
        assert_eq!(clamp_quality(f64::NAN), DEFAULT_QUALITY_SCORE);
    }

    #[test]
    fn pass_rate_is_zero_without_samples() {
        assert_eq!(TrustStats::default().pass_rate(), 0.0);
    }

    #[test]
    fn record_increments_counters() {
        let s = TrustStats::default().record(true).record(false);
        assert_eq!(s.total, 2);
        assert_eq!(s.passed, 1);
        assert_eq!(s.since_tier_change, 2);
        assert!((s.pass_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn sustained_low_pass_rate_downgrades() {
        let policy = TrustPolicy::default();
        let change = policy.evaluate(TrustTier::Expert, &stats(10, 4, 10));
        assert_eq!(
            change,
            TierChange::Downgraded {
                from: TrustTier::Expert,
                to: TrustTier::Intermediate
            }
        );
    }

    #[test]
    fn small_sample_never_downgrades() {
        let policy = TrustPolicy::default();
        assert_eq!(
            policy.evaluate(TrustTier::Expert, &stats(9, 0, 9)),
            TierChange::Unchanged
        );
    }

    #[test]
    fn recent_tier_change_blocks_further_moves() {
        let policy = TrustPolicy::default();
        assert_eq!(
            policy.evaluate(TrustTier::Expert, &stats(30, 3, 4)),
            TierChange::Unchanged
        );
    }

    #[test]
    fn novice_is_the_floor() {
        let policy = TrustPolicy::default();
        assert_eq!(
            policy.evaluate(TrustTier::Novice, &stats(50, 0, 50)),
            TierChange::Unchanged
        );
    }

    #[test]
    fn high_pass_rate_upgrades() {
        let policy = TrustPolicy::default();
        let change = policy.evaluate(TrustTier::Novice, &stats(20, 19, 20));
        assert_eq!(change.resulting_tier(TrustTier::Novice), TrustTier::Intermediate);
    }

    #[test]
    fn policy_validation_rejects_inverted_thresholds() {
        let policy = TrustPolicy {
            upgrade_at: 0.5,
            downgrade_below: 0.7,
            ..TrustPolicy::default()
        };
        assert!(policy.validate().is_err());
        assert!(TrustPolicy::default().validate().is_ok());
    }
}
