//! Reputation scoring and percentile ranking.
//!
//! - **Store**: per-channel scores, vote arithmetic, decay
//! - **Status**: moderation rights and badges derived from a standing

mod status;
mod store;

pub use status::{Badge, ModerationStatus, UserStatus};
pub use store::{
    decay_score, percentile_for, DownvotePolicy, LeaderboardEntry, ReputationStore, Standing,
    VoteOutcome,
};
