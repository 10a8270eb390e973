//! State owned by one channel.
//!
//! Everything here is mutated under a single per-channel mutex held by the
//! engine, so scores, percentiles, message visibility and proposals of a
//! channel always change together.

use chrono::Utc;

use crate::config::{AgoraConfig, ChannelGovernanceConfig};
use crate::governance::GovernanceProposalEngine;
use crate::persistence::ChannelSnapshot;
use crate::quorum::QuorumEngine;
use crate::reputation::{DownvotePolicy, ReputationStore};
use crate::types::Result;

#[derive(Debug, Clone)]
pub(crate) struct ChannelState {
    pub config: ChannelGovernanceConfig,
    pub reputation: ReputationStore,
    pub quorum: QuorumEngine,
    pub governance: GovernanceProposalEngine,
}

impl ChannelState {
    /// Fresh channel with the engine's defaults.
    pub fn new(config: &AgoraConfig) -> Self {
        Self {
            config: config.channel_defaults(),
            reputation: ReputationStore::new(),
            quorum: QuorumEngine::new(config.quorum.clone()),
            governance: GovernanceProposalEngine::new(config.governance.clone()),
        }
    }

    /// Channel rebuilt from a stored snapshot.
    pub fn restore(config: &AgoraConfig, snapshot: ChannelSnapshot) -> Result<Self> {
        snapshot.config.validate()?;
        Ok(Self {
            config: snapshot.config,
            reputation: ReputationStore::from_scores(snapshot.scores),
            ..Self::new(config)
        })
    }

    pub fn snapshot(&self, channel_id: &str) -> ChannelSnapshot {
        ChannelSnapshot {
            channel_id: channel_id.to_string(),
            config: self.config.clone(),
            scores: self.reputation.scores(),
            saved_at: Utc::now(),
        }
    }

    pub fn downvote_policy(&self, min_cohort: usize) -> DownvotePolicy {
        DownvotePolicy {
            moderation_threshold: self.config.moderation_threshold,
            min_cohort,
        }
    }
}
