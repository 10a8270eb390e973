//! Per-message vote tallies and the escalation score.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use agora_ledger::VoteType;

/// Votes received by one message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentVotes {
    pub message_id: String,
    /// Author, when the message was tracked explicitly
    pub author_id: Option<String>,
    /// Posting time, or first vote time for auto-tracked messages
    pub posted_at: DateTime<Utc>,
    pub upvoters: BTreeSet<String>,
    pub downvoters: BTreeSet<String>,
    /// Latest tally-changing vote of each voter
    pub last_vote: BTreeMap<String, DateTime<Utc>>,
}

impl ContentVotes {
    pub fn new(message_id: impl Into<String>, author_id: Option<String>, posted_at: DateTime<Utc>) -> Self {
        Self {
            message_id: message_id.into(),
            author_id,
            posted_at,
            upvoters: BTreeSet::new(),
            downvoters: BTreeSet::new(),
            last_vote: BTreeMap::new(),
        }
    }

    /// Whether `voter_id` wrote the message.
    pub fn is_author(&self, voter_id: &str) -> bool {
        self.author_id.as_deref() == Some(voter_id)
    }

    /// Record a vote. Switching direction moves the voter; repeating is a no-op.
    ///
    /// Returns whether the tally changed.
    pub fn record(&mut self, voter_id: &str, vote_type: VoteType, now: DateTime<Utc>) -> bool {
        let (add_to, remove_from) = match vote_type {
            VoteType::Upvote => (&mut self.upvoters, &mut self.downvoters),
            VoteType::Downvote => (&mut self.downvoters, &mut self.upvoters),
        };
        if add_to.contains(voter_id) {
            return false;
        }
        remove_from.remove(voter_id);
        add_to.insert(voter_id.to_string());
        self.last_vote.insert(voter_id.to_string(), now);
        true
    }

    pub fn upvotes(&self) -> usize {
        self.upvoters.len()
    }

    pub fn downvotes(&self) -> usize {
        self.downvoters.len()
    }

    pub fn net_score(&self) -> i64 {
        self.upvoters.len() as i64 - self.downvoters.len() as i64
    }

    /// Distinct voters per second over the trailing window.
    ///
    /// A voter counts once however often they switch direction.
    pub fn velocity(&self, now: DateTime<Utc>, window_secs: u64) -> f64 {
        if window_secs == 0 {
            return 0.0;
        }
        let cutoff = now - Duration::seconds(window_secs as i64);
        let recent = self
            .last_vote
            .values()
            .filter(|ts| **ts > cutoff && **ts <= now)
            .count();
        recent as f64 / window_secs as f64
    }

    /// Hours since posting, never negative.
    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        let ms = (now - self.posted_at).num_milliseconds().max(0);
        ms as f64 / 3_600_000.0
    }

    pub fn tally(&self) -> ContentTally {
        ContentTally {
            message_id: self.message_id.clone(),
            upvotes: self.upvotes(),
            downvotes: self.downvotes(),
            net_score: self.net_score(),
        }
    }
}

/// Read-only vote counts for one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentTally {
    pub message_id: String,
    pub upvotes: usize,
    pub downvotes: usize,
    pub net_score: i64,
}

/// A message's position in the channel ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedContent {
    pub message_id: String,
    pub net_score: i64,
    pub velocity: f64,
    pub age_hours: f64,
    pub escalation_score: f64,
}

/// `net × 2 + velocity × 10 − age_hours × 0.5`
pub fn escalation_score(net_score: i64, velocity: f64, age_hours: f64) -> f64 {
    net_score as f64 * 2.0 + velocity * 10.0 - age_hours * 0.5
}
