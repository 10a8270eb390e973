//! Core ledger record types.
//!
//! With the `typescript` feature enabled, the tag enums can be exported to
//! TypeScript using ts-rs so the chat layer shares the same vocabulary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[cfg(feature = "typescript")]
use ts_rs::TS;

/// Direction of a peer vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum VoteType {
    /// Free for the voter, +1 for the target
    Upvote,
    /// Costs voter and target one point each
    Downvote,
}

impl VoteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upvote => "upvote",
            Self::Downvote => "downvote",
        }
    }
}

/// An immutable record of one vote between two users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteRecord {
    /// Unique vote ID
    pub id: String,
    /// Who cast the vote
    pub voter_id: String,
    /// Who received it
    pub target_id: String,
    /// Upvote or downvote
    pub vote_type: VoteType,
    /// Channel the vote was cast in
    pub channel_id: String,
    /// When the vote was cast
    pub timestamp: DateTime<Utc>,
    /// Voter's percentile before the vote was applied
    pub voter_percentile_at_cast_time: u8,
}

impl VoteRecord {
    /// Create a new vote record stamped with the current time.
    pub fn new(
        voter_id: impl Into<String>,
        target_id: impl Into<String>,
        vote_type: VoteType,
        channel_id: impl Into<String>,
        voter_percentile_at_cast_time: u8,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            voter_id: voter_id.into(),
            target_id: target_id.into(),
            vote_type,
            channel_id: channel_id.into(),
            timestamp: Utc::now(),
            voter_percentile_at_cast_time,
        }
    }
}

/// What an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    ChannelInitialized,
    ChannelTornDown,
    VoteCast,
    ThresholdUpdated,
    FilterThresholdUpdated,
    ContentPinned,
    ContentUnpinned,
    ContentHidden,
    ContentUnhidden,
    ContentEscalated,
    ProposalCreated,
    ProposalResolved,
    ParameterChanged,
    CooldownReset,
    DecayApplied,
}

impl AuditAction {
    /// Stable string tag used in logs and hashes.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChannelInitialized => "channel_initialized",
            Self::ChannelTornDown => "channel_torn_down",
            Self::VoteCast => "vote_cast",
            Self::ThresholdUpdated => "threshold_updated",
            Self::FilterThresholdUpdated => "filter_threshold_updated",
            Self::ContentPinned => "content_pinned",
            Self::ContentUnpinned => "content_unpinned",
            Self::ContentHidden => "content_hidden",
            Self::ContentUnhidden => "content_unhidden",
            Self::ContentEscalated => "content_escalated",
            Self::ProposalCreated => "proposal_created",
            Self::ProposalResolved => "proposal_resolved",
            Self::ParameterChanged => "parameter_changed",
            Self::CooldownReset => "cooldown_reset",
            Self::DecayApplied => "decay_applied",
        }
    }
}

/// An immutable, hashed entry in a channel's audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry ID
    pub id: String,
    /// Channel the entry belongs to
    pub channel_id: String,
    /// Position in the channel's chain, starting at 0
    pub sequence: u64,
    /// When the entry was appended
    pub timestamp: DateTime<Utc>,
    /// What happened
    pub action: AuditAction,
    /// SHA-256 of the canonical payload
    pub content_hash: String,
    /// Chain hash of the previous entry (genesis for the first)
    pub previous_hash: String,
    /// Chain hash of this entry
    pub entry_hash: String,
    /// The recorded payload
    pub payload: serde_json::Value,
}

/// Error types for ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Payload could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored entry does not match its recorded hash or chain link
    #[error("Audit chain for channel {channel_id} broken at sequence {sequence}: {reason}")]
    Tampered {
        channel_id: String,
        sequence: u64,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vote_type_serde() {
        let json = serde_json::to_string(&VoteType::Downvote).unwrap();
        assert_eq!(json, "\"downvote\"");
        assert_eq!(VoteType::Upvote.as_str(), "upvote");
    }

    #[test]
    fn test_audit_action_tag_matches_serde() {
        let json = serde_json::to_string(&AuditAction::ContentEscalated).unwrap();
        assert_eq!(json, format!("\"{}\"", AuditAction::ContentEscalated.as_str()));
    }

    #[test]
    fn test_vote_record_new() {
        let record = VoteRecord::new("alice", "bob", VoteType::Upvote, "general", 40);
        assert_eq!(record.voter_id, "alice");
        assert_eq!(record.voter_percentile_at_cast_time, 40);
        assert!(!record.id.is_empty());
    }
}
