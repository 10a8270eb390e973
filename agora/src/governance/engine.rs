//! Proposal book for one channel.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{ChannelGovernanceConfig, GovernanceConfig};
use crate::governance::proposal::{
    ParameterChange, ParameterValue, Proposal, ProposalStatus, ProposalVote,
};
use crate::types::{AgoraError, Result};

/// A parameter written into the channel config by a passed proposal.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedChange {
    pub old_value: ParameterValue,
    pub new_value: ParameterValue,
}

/// Result of a proposal vote.
#[derive(Debug, Clone)]
pub struct ProposalVoteOutcome {
    /// The proposal after the vote
    pub proposal: Proposal,
    /// Set when this vote resolved the proposal
    pub resolved: bool,
    /// Set when the proposal passed and its change was applied
    pub applied: Option<AppliedChange>,
}

/// Proposals of one channel.
#[derive(Debug, Clone)]
pub struct GovernanceProposalEngine {
    config: GovernanceConfig,
    proposals: BTreeMap<String, Proposal>,
}

impl GovernanceProposalEngine {
    pub fn new(config: GovernanceConfig) -> Self {
        Self {
            config,
            proposals: BTreeMap::new(),
        }
    }

    /// Open a proposal. Anyone may propose; the change is validated now.
    #[allow(clippy::too_many_arguments)]
    pub fn propose(
        &mut self,
        channel_id: &str,
        proposer_id: &str,
        change: ParameterChange,
        reasoning: &str,
        channel_config: &ChannelGovernanceConfig,
        active_users: usize,
        now: DateTime<Utc>,
    ) -> Result<Proposal> {
        change.validate()?;

        let parameter = change.parameter();
        let proposal = Proposal {
            id: Uuid::new_v4().to_string(),
            channel_id: channel_id.to_string(),
            proposer_id: proposer_id.to_string(),
            parameter,
            current_value: parameter.read(channel_config),
            proposed_value: change.value(),
            change,
            reasoning: reasoning.to_string(),
            created_at: now,
            votes: BTreeMap::new(),
            status: ProposalStatus::Active,
            required_quorum: self.config.required_quorum(active_users),
            resolved_at: None,
            support_percentage: None,
        };

        info!(
            channel_id = %channel_id,
            proposal_id = %proposal.id,
            parameter = parameter.as_str(),
            required_quorum = proposal.required_quorum,
            "Proposal created"
        );
        self.proposals.insert(proposal.id.clone(), proposal.clone());
        Ok(proposal)
    }

    /// Cast or replace a vote, resolving the proposal once quorum is reached.
    ///
    /// A passing proposal writes its change into `channel_config`.
    pub fn vote_on_proposal(
        &mut self,
        proposal_id: &str,
        voter_id: &str,
        vote: ProposalVote,
        voter_percentile: u8,
        channel_config: &mut ChannelGovernanceConfig,
        now: DateTime<Utc>,
    ) -> Result<ProposalVoteOutcome> {
        let proposal = self
            .proposals
            .get_mut(proposal_id)
            .ok_or_else(|| AgoraError::ProposalNotFound(proposal_id.to_string()))?;
        if !proposal.is_active() {
            return Err(AgoraError::ProposalClosed(proposal_id.to_string()));
        }
        if voter_percentile < self.config.min_voter_percentile {
            return Err(AgoraError::InsufficientPercentile {
                required: self.config.min_voter_percentile,
                actual: voter_percentile,
            });
        }

        proposal.votes.insert(voter_id.to_string(), vote);
        debug!(
            proposal_id = %proposal_id,
            voter_id = %voter_id,
            total_votes = proposal.total_votes(),
            required_quorum = proposal.required_quorum,
            "Proposal vote recorded"
        );

        if proposal.total_votes() < proposal.required_quorum {
            return Ok(ProposalVoteOutcome {
                proposal: proposal.clone(),
                resolved: false,
                applied: None,
            });
        }

        let ratio = proposal.support_ratio();
        let passed = ratio >= self.config.support_ratio;
        let applied = if passed {
            let old_value = proposal.change.apply(channel_config)?;
            Some(AppliedChange {
                old_value,
                new_value: proposal.proposed_value,
            })
        } else {
            None
        };

        proposal.status = if passed {
            ProposalStatus::Passed
        } else {
            ProposalStatus::Failed
        };
        proposal.resolved_at = Some(now);
        proposal.support_percentage =
            Some(proposal.support_votes() as f64 * 100.0 / proposal.total_votes() as f64);

        info!(
            proposal_id = %proposal_id,
            status = proposal.status.as_str(),
            support = proposal.support_votes(),
            total = proposal.total_votes(),
            "Proposal resolved"
        );

        Ok(ProposalVoteOutcome {
            proposal: proposal.clone(),
            resolved: true,
            applied,
        })
    }

    pub fn proposal(&self, proposal_id: &str) -> Option<&Proposal> {
        self.proposals.get(proposal_id)
    }

    /// Open proposals, oldest first.
    pub fn active_proposals(&self) -> Vec<Proposal> {
        let mut active: Vec<Proposal> = self
            .proposals
            .values()
            .filter(|p| p.is_active())
            .cloned()
            .collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        active
    }

    pub fn proposal_count(&self) -> usize {
        self.proposals.len()
    }
}

impl Default for GovernanceProposalEngine {
    fn default() -> Self {
        Self::new(GovernanceConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuorumThreshold;
    use crate::governance::proposal::GovernanceParameter;

    fn open(engine: &mut GovernanceProposalEngine, change: ParameterChange) -> Proposal {
        engine
            .propose(
                "general",
                "proposer",
                change,
                "tighten moderation",
                &ChannelGovernanceConfig::default(),
                20,
                Utc::now(),
            )
            .unwrap()
    }

    fn vote_n(
        engine: &mut GovernanceProposalEngine,
        id: &str,
        config: &mut ChannelGovernanceConfig,
        support: usize,
        oppose: usize,
    ) -> ProposalVoteOutcome {
        let votes = std::iter::repeat(ProposalVote::Support)
            .take(support)
            .chain(std::iter::repeat(ProposalVote::Oppose).take(oppose));
        let mut last = None;
        for (i, vote) in votes.enumerate() {
            last = Some(
                engine
                    .vote_on_proposal(id, &format!("voter-{}", i), vote, 80, config, Utc::now())
                    .unwrap(),
            );
        }
        last.unwrap()
    }

    #[test]
    fn test_proposal_snapshot_values() {
        let mut engine = GovernanceProposalEngine::default();
        let proposal = open(&mut engine, ParameterChange::ModerationThreshold(20));

        assert_eq!(proposal.parameter, GovernanceParameter::ModerationThreshold);
        assert_eq!(proposal.current_value, ParameterValue::Integer(10));
        assert_eq!(proposal.proposed_value, ParameterValue::Integer(20));
        assert_eq!(proposal.required_quorum, 10);
        assert!(proposal.is_active());
    }

    #[test]
    fn test_invalid_change_rejected_at_propose() {
        let mut engine = GovernanceProposalEngine::default();
        let err = engine
            .propose(
                "general",
                "p",
                ParameterChange::ModerationThreshold(15),
                "",
                &ChannelGovernanceConfig::default(),
                20,
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, AgoraError::InvalidThreshold(15)));
        assert_eq!(engine.proposal_count(), 0);
    }

    #[test]
    fn test_passes_at_quorum_with_sixty_percent() {
        let mut engine = GovernanceProposalEngine::default();
        let mut config = ChannelGovernanceConfig::default();
        let proposal = open(&mut engine, ParameterChange::ModerationThreshold(20));

        let outcome = vote_n(&mut engine, &proposal.id, &mut config, 6, 3);
        assert!(!outcome.resolved);
        assert_eq!(config.moderation_threshold, 10);

        let outcome = engine
            .vote_on_proposal(&proposal.id, "last", ProposalVote::Oppose, 80, &mut config, Utc::now())
            .unwrap();
        assert!(outcome.resolved);
        assert_eq!(outcome.proposal.status, ProposalStatus::Passed);
        assert_eq!(outcome.proposal.support_percentage, Some(60.0));
        assert_eq!(
            outcome.applied,
            Some(AppliedChange {
                old_value: ParameterValue::Integer(10),
                new_value: ParameterValue::Integer(20),
            })
        );
        assert_eq!(config.moderation_threshold, 20);
    }

    #[test]
    fn test_fails_below_support_ratio() {
        let mut engine = GovernanceProposalEngine::default();
        let mut config = ChannelGovernanceConfig::default();
        let proposal = open(&mut engine, ParameterChange::FilterThreshold(-2));

        let outcome = vote_n(&mut engine, &proposal.id, &mut config, 5, 5);
        assert!(outcome.resolved);
        assert_eq!(outcome.proposal.status, ProposalStatus::Failed);
        assert!(outcome.applied.is_none());
        assert_eq!(config.filter_threshold, -10);
    }

    #[test]
    fn test_closed_proposal_rejects_votes() {
        let mut engine = GovernanceProposalEngine::default();
        let mut config = ChannelGovernanceConfig::default();
        let proposal = open(&mut engine, ParameterChange::PinQuorum(QuorumThreshold::votes(3)));
        vote_n(&mut engine, &proposal.id, &mut config, 10, 0);

        let err = engine
            .vote_on_proposal(&proposal.id, "late", ProposalVote::Support, 90, &mut config, Utc::now())
            .unwrap_err();
        assert!(matches!(err, AgoraError::ProposalClosed(_)));
        assert_eq!(config.pin_quorum, QuorumThreshold::votes(3));
        assert!(engine.active_proposals().is_empty());
    }

    #[test]
    fn test_voter_percentile_gate() {
        let mut engine = GovernanceProposalEngine::default();
        let mut config = ChannelGovernanceConfig::default();
        let proposal = open(&mut engine, ParameterChange::FilterThreshold(0));

        let err = engine
            .vote_on_proposal(&proposal.id, "newcomer", ProposalVote::Support, 24, &mut config, Utc::now())
            .unwrap_err();
        assert!(matches!(
            err,
            AgoraError::InsufficientPercentile {
                required: 25,
                actual: 24
            }
        ));
        assert_eq!(engine.proposal(&proposal.id).unwrap().total_votes(), 0);
    }

    #[test]
    fn test_revote_overwrites() {
        let mut engine = GovernanceProposalEngine::default();
        let mut config = ChannelGovernanceConfig::default();
        let proposal = open(&mut engine, ParameterChange::FilterThreshold(0));

        for vote in [ProposalVote::Support, ProposalVote::Oppose] {
            engine
                .vote_on_proposal(&proposal.id, "alice", vote, 50, &mut config, Utc::now())
                .unwrap();
        }
        let stored = engine.proposal(&proposal.id).unwrap();
        assert_eq!(stored.total_votes(), 1);
        assert_eq!(stored.votes["alice"], ProposalVote::Oppose);
    }

    #[test]
    fn test_unknown_proposal() {
        let mut engine = GovernanceProposalEngine::default();
        let mut config = ChannelGovernanceConfig::default();
        assert!(matches!(
            engine.vote_on_proposal("missing", "a", ProposalVote::Support, 90, &mut config, Utc::now()),
            Err(AgoraError::ProposalNotFound(_))
        ));
    }
}
