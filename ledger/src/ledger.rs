//! Per-channel append-only ledger.

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, warn};

use crate::hash::{chain_hash, content_hash, GENESIS_HASH};
use crate::types::{AuditAction, AuditEntry, LedgerError, Result, VoteRecord, VoteType};

/// Ledger channel for actions that are not scoped to a chat channel
/// (administrative cooldown resets, for example).
pub const SYSTEM_CHANNEL: &str = "_system";

#[derive(Debug, Default)]
struct ChannelLedger {
    votes: Vec<VoteRecord>,
    entries: Vec<AuditEntry>,
}

impl ChannelLedger {
    fn head_hash(&self) -> &str {
        self.entries
            .last()
            .map(|e| e.entry_hash.as_str())
            .unwrap_or(GENESIS_HASH)
    }
}

/// Append-only store of votes and audit entries, keyed by channel.
///
/// No update or delete operation exists. Appends to the same channel are
/// serialized by the map's entry lock, so sequence numbers and chain links
/// never interleave.
pub struct VoteLedger {
    channels: DashMap<String, ChannelLedger>,
}

impl VoteLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Append an audit entry for `channel_id`.
    pub fn append(
        &self,
        channel_id: &str,
        action: AuditAction,
        payload: &impl Serialize,
    ) -> Result<AuditEntry> {
        let payload = serde_json::to_value(payload)?;
        let content = content_hash(&payload);

        let mut channel = self.channels.entry(channel_id.to_string()).or_default();
        let sequence = channel.entries.len() as u64;
        let previous_hash = channel.head_hash().to_string();
        let entry_hash = chain_hash(&previous_hash, sequence, action, &content);

        let entry = AuditEntry {
            id: uuid::Uuid::new_v4().to_string(),
            channel_id: channel_id.to_string(),
            sequence,
            timestamp: Utc::now(),
            action,
            content_hash: content,
            previous_hash,
            entry_hash,
            payload,
        };

        debug!(
            channel_id = %channel_id,
            sequence = sequence,
            action = action.as_str(),
            "Audit entry appended"
        );

        channel.entries.push(entry.clone());
        Ok(entry)
    }

    /// Append a vote record.
    pub fn record_vote(&self, record: VoteRecord) {
        let mut channel = self.channels.entry(record.channel_id.clone()).or_default();
        channel.votes.push(record);
    }

    /// All audit entries for a channel, oldest first.
    pub fn entries(&self, channel_id: &str) -> Vec<AuditEntry> {
        self.channels
            .get(channel_id)
            .map(|c| c.entries.clone())
            .unwrap_or_default()
    }

    /// Most recent audit entries for a channel, newest first.
    pub fn recent_entries(&self, channel_id: &str, limit: usize) -> Vec<AuditEntry> {
        self.channels
            .get(channel_id)
            .map(|c| c.entries.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    /// Audit entries for a channel with the given action tag.
    pub fn entries_by_action(&self, channel_id: &str, action: AuditAction) -> Vec<AuditEntry> {
        self.channels
            .get(channel_id)
            .map(|c| {
                c.entries
                    .iter()
                    .filter(|e| e.action == action)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All vote records for a channel, oldest first.
    pub fn votes(&self, channel_id: &str) -> Vec<VoteRecord> {
        self.channels
            .get(channel_id)
            .map(|c| c.votes.clone())
            .unwrap_or_default()
    }

    /// Vote records cast by one voter in a channel.
    pub fn votes_by(&self, channel_id: &str, voter_id: &str) -> Vec<VoteRecord> {
        self.channels
            .get(channel_id)
            .map(|c| {
                c.votes
                    .iter()
                    .filter(|v| v.voter_id == voter_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Recompute every hash in a channel's chain.
    ///
    /// Returns the number of verified entries, or the first entry whose
    /// payload hash or chain link does not match.
    pub fn verify_channel(&self, channel_id: &str) -> Result<usize> {
        let Some(channel) = self.channels.get(channel_id) else {
            return Ok(0);
        };

        let mut previous = GENESIS_HASH.to_string();
        for (index, entry) in channel.entries.iter().enumerate() {
            let tampered = |reason: &str| LedgerError::Tampered {
                channel_id: channel_id.to_string(),
                sequence: entry.sequence,
                reason: reason.to_string(),
            };

            if entry.sequence != index as u64 {
                return Err(tampered("sequence gap"));
            }
            if content_hash(&entry.payload) != entry.content_hash {
                warn!(channel_id = %channel_id, sequence = entry.sequence, "Audit payload hash mismatch");
                return Err(tampered("payload hash mismatch"));
            }
            if entry.previous_hash != previous {
                return Err(tampered("previous hash mismatch"));
            }
            let expected =
                chain_hash(&previous, entry.sequence, entry.action, &entry.content_hash);
            if expected != entry.entry_hash {
                return Err(tampered("entry hash mismatch"));
            }
            previous = entry.entry_hash.clone();
        }

        Ok(channel.entries.len())
    }

    /// Get statistics for a channel.
    pub fn stats(&self, channel_id: &str) -> LedgerStats {
        let Some(channel) = self.channels.get(channel_id) else {
            return LedgerStats::default();
        };

        let upvotes = channel
            .votes
            .iter()
            .filter(|v| v.vote_type == VoteType::Upvote)
            .count();

        LedgerStats {
            total_votes: channel.votes.len(),
            upvotes,
            downvotes: channel.votes.len() - upvotes,
            audit_entries: channel.entries.len(),
        }
    }

    /// Channels that have at least one record.
    pub fn channel_ids(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.key().clone()).collect()
    }

    #[cfg(test)]
    fn tamper_payload(&self, channel_id: &str, sequence: usize, payload: serde_json::Value) {
        if let Some(mut channel) = self.channels.get_mut(channel_id) {
            channel.entries[sequence].payload = payload;
        }
    }
}

impl Default for VoteLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics for one channel's ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerStats {
    /// Vote records
    pub total_votes: usize,
    /// Upvote records
    pub upvotes: usize,
    /// Downvote records
    pub downvotes: usize,
    /// Audit entries
    pub audit_entries: usize,
}
