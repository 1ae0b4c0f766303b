//! Leaderboard ranking and honeypot streak bonuses.

use std::cmp::Ordering;

use serde::Serialize;

use crate::trust::{clamp_quality, TrustTier, DEFAULT_QUALITY_SCORE};
use crate::types::DbId;

/// Consecutive passed probes needed for a streak bonus.
pub const STREAK_LENGTH: usize = 5;

/// Quality points granted per streak.
pub const STREAK_BONUS: f64 = 2.0;

/// Default number of leaderboard rows.
pub const DEFAULT_LEADERBOARD_LIMIT: usize = 10;

/// One row of a project leaderboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub annotator_id: DbId,
    pub display_name: String,
    pub trust_tier: TrustTier,
    pub quality_score: Option<f64>,
    pub completed_assignments: i64,
}

fn compare(a: &LeaderboardEntry, b: &LeaderboardEntry) -> Ordering {
    let qa = a.quality_score.unwrap_or(DEFAULT_QUALITY_SCORE);
    let qb = b.quality_score.unwrap_or(DEFAULT_QUALITY_SCORE);
    qb.total_cmp(&qa)
        .then_with(|| b.completed_assignments.cmp(&a.completed_assignments))
        .then_with(|| a.annotator_id.cmp(&b.annotator_id))
}

/// Sort by quality, then completed work, then id, and assign 1-based ranks.
pub fn rank_entries(mut entries: Vec<LeaderboardEntry>, limit: usize) -> Vec<LeaderboardEntry> {
    entries.sort_by(compare);
    entries.truncate(limit);
    for (idx, entry) in entries.iter_mut().enumerate() {
        entry.rank = idx + 1;
    }
    entries
}

/// Length of the run of passes at the head of `outcomes` (newest first).
pub fn current_streak(outcomes_newest_first: &[bool]) -> usize {
    outcomes_newest_first.iter().take_while(|p| **p).count()
}

/// Whether an annotator earns a streak bonus now.
///
/// Requires a full streak and at least [`STREAK_LENGTH`] probes since the
/// previous bonus so the same streak is never rewarded twice.
pub fn qualifies_for_bonus(
    outcomes_newest_first: &[bool],
    total_probes: i64,
    last_bonus_total: i64,
) -> bool {
    current_streak(outcomes_newest_first) >= STREAK_LENGTH
        && total_probes - last_bonus_total >= STREAK_LENGTH as i64
}

/// Quality score after applying one streak bonus.
pub fn apply_streak_bonus(quality_score: Option<f64>) -> f64 {
    clamp_quality(quality_score.unwrap_or(DEFAULT_QUALITY_SCORE) + STREAK_BONUS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: DbId, quality: Option<f64>, completed: i64) -> LeaderboardEntry {
        LeaderboardEntry {
            rank: 0,
            annotator_id: id,
            display_name: format!("annotator-{id}"),
            trust_tier: TrustTier::Novice,
            quality_score: quality,
            completed_assignments: completed,
        }
    }

    #[test]
    fn ranks_by_quality_then_work_then_id() {
        let ranked = rank_entries(
            vec![
                entry(3, Some(80.0), 1),
                entry(1, Some(90.0), 0),
                entry(2, Some(80.0), 5),
                entry(4, Some(80.0), 1),
            ],
            10,
        );
        let ids: Vec<DbId> = ranked.iter().map(|e| e.annotator_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[3].rank, 4);
    }

    #[test]
    fn limit_truncates() {
        let ranked = rank_entries((1..=5).map(|i| entry(i, None, 0)).collect(), 2);
        assert_eq!(ranked.len(), 2);
    }

    #[test]
    fn streak_counts_leading_passes() {
        assert_eq!(current_streak(&[true, true, false, true]), 2);
        assert_eq!(current_streak(&[]), 0);
    }

    #[test]
    fn same_streak_not_rewarded_twice() {
        let outcomes = [true; 6];
        assert!(qualifies_for_bonus(&outcomes, 6, 0));
        assert!(!qualifies_for_bonus(&outcomes, 6, 4));
        assert!(!qualifies_for_bonus(&[true, true, true, true, false], 5, 0));
    }

    #[test]
    fn bonus_is_clamped() {
        assert_eq!(apply_streak_bonus(Some(99.5)), 100.0);
        assert_eq!(apply_streak_bonus(None), 72.0);
    }
}
