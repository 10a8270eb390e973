//! Per-channel score table with percentile ranking.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use agora_ledger::VoteType;

use crate::reputation::status::Badge;
use crate::types::{AgoraError, Result};

/// A user's score together with the percentile derived from it.
///
/// Keeping both in one record means a scored user without a percentile
/// cannot exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Standing {
    /// Net reputation score
    pub score: i64,
    /// Rank in the channel, 0 - 100
    pub percentile: u8,
}

/// Gate applied to downvotes.
#[derive(Debug, Clone, Copy)]
pub struct DownvotePolicy {
    /// Percentile the voter must hold
    pub moderation_threshold: u8,
    /// Active users the channel must have
    pub min_cohort: usize,
}

/// Result of a successfully applied vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteOutcome {
    /// Voter's score after the vote
    pub voter_score: i64,
    /// Target's score after the vote
    pub target_score: i64,
    /// Voter's percentile after recomputation
    pub voter_percentile: u8,
    /// Target's percentile after recomputation
    pub target_percentile: u8,
    /// Voter's percentile when the vote was cast
    pub voter_percentile_before: u8,
    /// Whether the voter paid the downvote cost
    pub mutual_downvote: bool,
}

/// One row of a channel leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub user_id: String,
    pub score: i64,
    pub percentile: u8,
    pub badge: Badge,
}

/// Score table for one channel.
#[derive(Debug, Clone, Default)]
pub struct ReputationStore {
    standings: HashMap<String, Standing>,
}

impl ReputationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from raw scores (snapshot restore).
    pub fn from_scores<I, S>(scores: I) -> Self
    where
        I: IntoIterator<Item = (S, i64)>,
        S: Into<String>,
    {
        let mut store = Self {
            standings: scores
                .into_iter()
                .map(|(user, score)| {
                    (
                        user.into(),
                        Standing {
                            score,
                            percentile: 0,
                        },
                    )
                })
                .collect(),
        };
        store.recompute_percentiles();
        store
    }

    /// Score of a user, 0 if never seen.
    pub fn score(&self, user_id: &str) -> i64 {
        self.standings.get(user_id).map(|s| s.score).unwrap_or(0)
    }

    /// Percentile of a user, 0 if never seen.
    pub fn percentile(&self, user_id: &str) -> u8 {
        self.standings.get(user_id).map(|s| s.percentile).unwrap_or(0)
    }

    /// Full standing of a user, if recorded.
    pub fn standing(&self, user_id: &str) -> Option<Standing> {
        self.standings.get(user_id).copied()
    }

    /// Number of users with a recorded score.
    pub fn active_user_count(&self) -> usize {
        self.standings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.standings.is_empty()
    }

    /// Apply one vote and recompute the channel's percentiles.
    ///
    /// Upvotes cost the voter nothing and give the target +1. Downvotes cost
    /// both voter and target one point, and are only accepted from a voter
    /// at or above the moderation threshold in a large enough channel.
    pub fn apply_vote(
        &mut self,
        voter_id: &str,
        target_id: &str,
        vote_type: VoteType,
        policy: DownvotePolicy,
    ) -> Result<VoteOutcome> {
        if voter_id == target_id {
            return Err(AgoraError::SelfVote);
        }

        let voter_percentile_before = self.percentile(voter_id);

        if vote_type == VoteType::Downvote {
            let active = self.active_user_count();
            if active < policy.min_cohort {
                return Err(AgoraError::InsufficientCohort {
                    active,
                    required: policy.min_cohort,
                });
            }
            if voter_percentile_before < policy.moderation_threshold {
                return Err(AgoraError::InsufficientPercentile {
                    required: policy.moderation_threshold,
                    actual: voter_percentile_before,
                });
            }
        }

        let (voter_delta, target_delta) = match vote_type {
            VoteType::Upvote => (0, 1),
            VoteType::Downvote => (-1, -1),
        };
        self.standings.entry(voter_id.to_string()).or_default().score += voter_delta;
        self.standings.entry(target_id.to_string()).or_default().score += target_delta;

        self.recompute_percentiles();

        let voter = self.standings[voter_id];
        let target = self.standings[target_id];

        debug!(
            voter_id = %voter_id,
            target_id = %target_id,
            vote_type = vote_type.as_str(),
            voter_score = voter.score,
            target_score = target.score,
            "Vote applied"
        );

        Ok(VoteOutcome {
            voter_score: voter.score,
            target_score: target.score,
            voter_percentile: voter.percentile,
            target_percentile: target.percentile,
            voter_percentile_before,
            mutual_downvote: vote_type == VoteType::Downvote,
        })
    }

    /// Multiply every score by `factor`, rounding half away from zero.
    ///
    /// Returns the number of users touched.
    pub fn apply_decay(&mut self, factor: f64) -> usize {
        if self.standings.is_empty() {
            return 0;
        }
        for standing in self.standings.values_mut() {
            standing.score = decay_score(standing.score, factor);
        }
        self.recompute_percentiles();
        self.standings.len()
    }

    /// Raw scores ordered by user ID.
    pub fn scores(&self) -> BTreeMap<String, i64> {
        self.standings
            .iter()
            .map(|(user, s)| (user.clone(), s.score))
            .collect()
    }

    /// Users ordered by score (highest first), ties by user ID.
    pub fn leaderboard(&self, limit: usize, moderation_threshold: u8) -> Vec<LeaderboardEntry> {
        let mut rows: Vec<_> = self.standings.iter().collect();
        rows.sort_by(|(a_id, a), (b_id, b)| b.score.cmp(&a.score).then_with(|| a_id.cmp(b_id)));
        rows.into_iter()
            .take(limit)
            .map(|(user_id, s)| LeaderboardEntry {
                user_id: user_id.clone(),
                score: s.score,
                percentile: s.percentile,
                badge: Badge::for_percentile(s.percentile, moderation_threshold),
            })
            .collect()
    }

    /// Recompute every percentile from scratch.
    fn recompute_percentiles(&mut self) {
        let mut sorted: Vec<i64> = self.standings.values().map(|s| s.score).collect();
        sorted.sort_unstable();
        let n = sorted.len();

        for standing in self.standings.values_mut() {
            let lower = sorted.partition_point(|&s| s < standing.score);
            standing.percentile = percentile_for(lower, n);
        }
    }
}

/// Percentile of a user with `lower` strictly lower scores among `n` users.
///
/// round(100 × lower / (n − 1)) with halves rounded up; a lone user is at 0.
pub fn percentile_for(lower: usize, n: usize) -> u8 {
    if n <= 1 {
        return 0;
    }
    let denominator = n - 1;
    let rounded = (200 * lower + denominator) / (2 * denominator);
    rounded.min(100) as u8
}

/// One decay step for a single score.
pub fn decay_score(score: i64, factor: f64) -> i64 {
    (score as f64 * factor).round() as i64
}
