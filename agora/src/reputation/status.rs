//! Moderation status and display badges.

use serde::{Deserialize, Serialize};

#[cfg(feature = "typescript")]
use ts_rs::TS;

use crate::config::ChannelGovernanceConfig;
use crate::reputation::store::Standing;

/// Display tier derived from a percentile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Badge {
    /// 95th percentile and up
    Top5,
    /// 80th percentile and up
    Top20,
    /// 50th percentile and up
    Top50,
    /// At or above the channel's moderation threshold
    AboveThreshold,
    /// Below the moderation threshold
    Muted,
}

impl Badge {
    /// Badge for a percentile under the given moderation threshold.
    pub fn for_percentile(percentile: u8, threshold: u8) -> Self {
        match percentile {
            p if p >= 95 => Self::Top5,
            p if p >= 80 => Self::Top20,
            p if p >= 50 => Self::Top50,
            p if p >= threshold => Self::AboveThreshold,
            _ => Self::Muted,
        }
    }
}

/// Whether a user may currently act in the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Active,
    Muted,
}

/// Snapshot of a user's moderation rights, attached to messages for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationStatus {
    /// Net reputation score
    pub score: i64,
    /// Rank in the channel, 0 - 100
    pub percentile: u8,
    /// Percentile is at or above the moderation threshold
    pub can_downvote: bool,
    /// Inverse of `can_downvote`
    pub is_muted: bool,
    /// Score is below the filter threshold
    pub is_filtered: bool,
    /// `muted` or `active`
    pub status: UserStatus,
    /// Display tier
    pub badge: Badge,
}

impl ModerationStatus {
    /// Evaluate a standing against a channel's thresholds.
    pub fn evaluate(standing: Standing, config: &ChannelGovernanceConfig) -> Self {
        let can_downvote = standing.percentile >= config.moderation_threshold;
        let is_muted = !can_downvote;
        Self {
            score: standing.score,
            percentile: standing.percentile,
            can_downvote,
            is_muted,
            is_filtered: standing.score < config.filter_threshold,
            status: if is_muted {
                UserStatus::Muted
            } else {
                UserStatus::Active
            },
            badge: Badge::for_percentile(standing.percentile, config.moderation_threshold),
        }
    }
}
