//! Proposals to change a channel's governance parameters.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[cfg(feature = "typescript")]
use ts_rs::TS;

use crate::config::{validate_moderation_threshold, ChannelGovernanceConfig, QuorumThreshold};
use crate::types::Result;

/// Lifecycle of a proposal. `Passed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Active,
    Passed,
    Failed,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Passed => "passed",
            Self::Failed => "failed",
        }
    }
}

/// A member's position on a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum ProposalVote {
    Support,
    Oppose,
}

/// Channel parameter a proposal can change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum GovernanceParameter {
    ModerationThreshold,
    FilterThreshold,
    PinQuorum,
    HideQuorum,
}

impl GovernanceParameter {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ModerationThreshold => "moderation_threshold",
            Self::FilterThreshold => "filter_threshold",
            Self::PinQuorum => "pin_quorum",
            Self::HideQuorum => "hide_quorum",
        }
    }

    /// Current value of this parameter in a channel config.
    pub fn read(&self, config: &ChannelGovernanceConfig) -> ParameterValue {
        match self {
            Self::ModerationThreshold => ParameterValue::Integer(config.moderation_threshold as i64),
            Self::FilterThreshold => ParameterValue::Integer(config.filter_threshold),
            Self::PinQuorum => ParameterValue::Quorum(config.pin_quorum),
            Self::HideQuorum => ParameterValue::Quorum(config.hide_quorum),
        }
    }
}

/// Value of a governance parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Integer(i64),
    Quorum(QuorumThreshold),
}

/// A typed change to one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "parameter", content = "value", rename_all = "snake_case")]
pub enum ParameterChange {
    ModerationThreshold(u8),
    FilterThreshold(i64),
    PinQuorum(QuorumThreshold),
    HideQuorum(QuorumThreshold),
}

impl ParameterChange {
    pub fn parameter(&self) -> GovernanceParameter {
        match self {
            Self::ModerationThreshold(_) => GovernanceParameter::ModerationThreshold,
            Self::FilterThreshold(_) => GovernanceParameter::FilterThreshold,
            Self::PinQuorum(_) => GovernanceParameter::PinQuorum,
            Self::HideQuorum(_) => GovernanceParameter::HideQuorum,
        }
    }

    pub fn value(&self) -> ParameterValue {
        match *self {
            Self::ModerationThreshold(t) => ParameterValue::Integer(t as i64),
            Self::FilterThreshold(t) => ParameterValue::Integer(t),
            Self::PinQuorum(q) | Self::HideQuorum(q) => ParameterValue::Quorum(q),
        }
    }

    /// Reject values no channel may hold.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::ModerationThreshold(t) => validate_moderation_threshold(*t as i64).map(|_| ()),
            Self::FilterThreshold(_) => Ok(()),
            Self::PinQuorum(q) | Self::HideQuorum(q) => q.validate(),
        }
    }

    /// Write the change into a config, returning the previous value.
    pub fn apply(&self, config: &mut ChannelGovernanceConfig) -> Result<ParameterValue> {
        self.validate()?;
        let old = self.parameter().read(config);
        match *self {
            Self::ModerationThreshold(t) => {
                config.set_moderation_threshold(t as i64)?;
            }
            Self::FilterThreshold(t) => config.filter_threshold = t,
            Self::PinQuorum(q) => config.pin_quorum = q,
            Self::HideQuorum(q) => config.hide_quorum = q,
        }
        Ok(old)
    }
}

/// A proposal to change one channel parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub channel_id: String,
    pub proposer_id: String,
    pub parameter: GovernanceParameter,
    pub current_value: ParameterValue,
    pub proposed_value: ParameterValue,
    pub change: ParameterChange,
    pub reasoning: String,
    pub created_at: DateTime<Utc>,
    /// One vote per user; a re-vote replaces the earlier one
    pub votes: BTreeMap<String, ProposalVote>,
    pub status: ProposalStatus,
    /// Fixed when the proposal is created
    pub required_quorum: usize,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Support share in percent, set on resolution
    pub support_percentage: Option<f64>,
}

impl Proposal {
    pub fn is_active(&self) -> bool {
        self.status == ProposalStatus::Active
    }

    pub fn total_votes(&self) -> usize {
        self.votes.len()
    }

    pub fn support_votes(&self) -> usize {
        self.votes
            .values()
            .filter(|v| **v == ProposalVote::Support)
            .count()
    }

    pub fn oppose_votes(&self) -> usize {
        self.total_votes() - self.support_votes()
    }

    /// Support share in 0.0 - 1.0, 0.0 with no votes.
    pub fn support_ratio(&self) -> f64 {
        match self.total_votes() {
            0 => 0.0,
            total => self.support_votes() as f64 / total as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_validation() {
        assert!(ParameterChange::ModerationThreshold(20).validate().is_ok());
        assert!(ParameterChange::ModerationThreshold(15).validate().is_err());
        assert!(ParameterChange::FilterThreshold(-1000).validate().is_ok());
        assert!(ParameterChange::PinQuorum(QuorumThreshold::votes(0)).validate().is_err());
    }

    #[test]
    fn test_apply_returns_old_value() {
        let mut config = ChannelGovernanceConfig::default();
        let old = ParameterChange::FilterThreshold(-3).apply(&mut config).unwrap();
        assert_eq!(old, ParameterValue::Integer(-10));
        assert_eq!(config.filter_threshold, -3);

        let old = ParameterChange::HideQuorum(QuorumThreshold::percent_of_active(0.2))
            .apply(&mut config)
            .unwrap();
        assert_eq!(old, ParameterValue::Quorum(QuorumThreshold::votes(5)));
        assert_eq!(config.hide_quorum, QuorumThreshold::percent_of_active(0.2));
    }

    #[test]
    fn test_change_serialization() {
        let json = serde_json::to_value(ParameterChange::ModerationThreshold(5)).unwrap();
        assert_eq!(json["parameter"], "moderation_threshold");
        assert_eq!(json["value"], 5);

        let value = serde_json::to_value(ParameterValue::Integer(-10)).unwrap();
        assert_eq!(value, serde_json::json!(-10));
    }

    #[test]
    fn test_either_quorum_change() {
        let change = ParameterChange::PinQuorum(QuorumThreshold::either(5, 0.1));
        assert!(change.validate().is_ok());
        assert!(ParameterChange::PinQuorum(QuorumThreshold::default()).validate().is_err());

        let json = serde_json::to_value(change).unwrap();
        assert_eq!(json["value"], serde_json::json!({ "votes": 5, "fraction": 0.1 }));
        let parsed: ParameterChange = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, change);

        let mut config = ChannelGovernanceConfig::default();
        change.apply(&mut config).unwrap();
        assert_eq!(config.pin_quorum, QuorumThreshold::either(5, 0.1));
        assert!(config.pin_quorum.is_met(2, 20));
    }
}
