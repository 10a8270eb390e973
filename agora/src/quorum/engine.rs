//! Message-level quorum decisions for one channel.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

#[cfg(feature = "typescript")]
use ts_rs::TS;

use agora_ledger::VoteType;

use crate::config::{QuorumConfig, QuorumThreshold};
use crate::quorum::content::{escalation_score, ContentTally, ContentVotes, RankedContent};
use crate::quorum::visibility::{
    HideAction, HideMetadata, HideRecord, MessageVisibilityState, PinAction, PinMetadata,
    PinRecord, Transition, DEFAULT_HIDE_REASON,
};
use crate::types::{AgoraError, Result};

/// Why a message was escalated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum EscalationType {
    /// Ranked high enough to spin off a discussion thread
    Trending,
    /// Raised by a member for moderator review
    Review,
}

impl EscalationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trending => "trending",
            Self::Review => "review",
        }
    }
}

/// A message moved into its own thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub channel_id: String,
    pub message_id: String,
    pub escalation_type: EscalationType,
    pub thread_id: String,
    pub escalation_score: f64,
    pub escalated_at: DateTime<Utc>,
}

/// A pin or hide applied because a quorum was reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuorumAction {
    Pinned { message_id: String, record: PinRecord },
    Hidden { message_id: String, record: HideRecord },
}

/// Quorum state of one channel.
#[derive(Debug, Clone)]
pub struct QuorumEngine {
    config: QuorumConfig,
    /// Ordered by message ID so scans are deterministic
    content: BTreeMap<String, ContentVotes>,
    visibility: HashMap<String, MessageVisibilityState>,
    escalations: Vec<EscalationRecord>,
}

impl QuorumEngine {
    pub fn new(config: QuorumConfig) -> Self {
        Self {
            config,
            content: BTreeMap::new(),
            visibility: HashMap::new(),
            escalations: Vec::new(),
        }
    }

    /// Register a message with its posting time. Returns false if already tracked.
    pub fn track_message(
        &mut self,
        message_id: &str,
        author_id: Option<&str>,
        posted_at: DateTime<Utc>,
    ) -> bool {
        if self.content.contains_key(message_id) {
            return false;
        }
        self.content.insert(
            message_id.to_string(),
            ContentVotes::new(message_id, author_id.map(str::to_string), posted_at),
        );
        true
    }

    /// Record a content vote, tracking the message on first sight.
    ///
    /// Authors cannot vote on their own messages.
    pub fn record_vote(
        &mut self,
        message_id: &str,
        voter_id: &str,
        vote_type: VoteType,
        now: DateTime<Utc>,
    ) -> Result<ContentTally> {
        let votes = self
            .content
            .entry(message_id.to_string())
            .or_insert_with(|| ContentVotes::new(message_id, None, now));
        if votes.is_author(voter_id) {
            return Err(AgoraError::SelfVote);
        }
        if votes.record(voter_id, vote_type, now) {
            debug!(
                message_id = %message_id,
                voter_id = %voter_id,
                vote_type = vote_type.as_str(),
                net_score = votes.net_score(),
                "Content vote recorded"
            );
        }
        Ok(votes.tally())
    }

    pub fn tally(&self, message_id: &str) -> Option<ContentTally> {
        self.content.get(message_id).map(ContentVotes::tally)
    }

    pub fn visibility(&self, message_id: &str) -> Option<&MessageVisibilityState> {
        self.visibility.get(message_id)
    }

    pub fn tracked_count(&self) -> usize {
        self.content.len()
    }

    pub fn escalations(&self) -> &[EscalationRecord] {
        &self.escalations
    }

    pub fn is_escalated(&self, message_id: &str) -> bool {
        self.escalations.iter().any(|e| e.message_id == message_id)
    }

    /// Pin a message. Pinning a pinned message returns the current record.
    pub fn pin(&mut self, message_id: &str, meta: PinMetadata, now: DateTime<Utc>) -> Transition<PinRecord> {
        let upvotes = self.content.get(message_id).map(ContentVotes::upvotes).unwrap_or(0);
        let state = self.visibility.entry(message_id.to_string()).or_default();

        if state.is_pinned {
            if let Some(current) = state.pin_record() {
                return Transition {
                    record: current.clone(),
                    applied: false,
                };
            }
        }

        let record = PinRecord {
            action: PinAction::Pin,
            timestamp: now,
            actor: meta.actor,
            quorum_votes: meta.quorum_votes.unwrap_or(upvotes),
            reversible: meta.reversible,
        };
        state.push_pin(record.clone());
        info!(message_id = %message_id, actor = %record.actor, "Message pinned");
        Transition {
            record,
            applied: true,
        }
    }

    /// Unpin a pinned message.
    pub fn unpin(&mut self, message_id: &str, meta: PinMetadata, now: DateTime<Utc>) -> Result<PinRecord> {
        let upvotes = self.content.get(message_id).map(ContentVotes::upvotes).unwrap_or(0);
        let state = self
            .visibility
            .get_mut(message_id)
            .filter(|s| s.is_pinned)
            .ok_or_else(|| AgoraError::NotPinned(message_id.to_string()))?;

        let record = PinRecord {
            action: PinAction::Unpin,
            timestamp: now,
            actor: meta.actor,
            quorum_votes: meta.quorum_votes.unwrap_or(upvotes),
            reversible: meta.reversible,
        };
        state.push_pin(record.clone());
        info!(message_id = %message_id, actor = %record.actor, "Message unpinned");
        Ok(record)
    }

    /// Hide a message. Hiding a hidden message returns the current record.
    pub fn hide(&mut self, message_id: &str, meta: HideMetadata, now: DateTime<Utc>) -> Transition<HideRecord> {
        let downvotes = self.content.get(message_id).map(ContentVotes::downvotes).unwrap_or(0);
        let state = self.visibility.entry(message_id.to_string()).or_default();

        if state.is_hidden {
            if let Some(current) = state.hide_record() {
                return Transition {
                    record: current.clone(),
                    applied: false,
                };
            }
        }

        let record = HideRecord {
            action: HideAction::Hide,
            timestamp: now,
            actor: meta.actor,
            quorum_votes: meta.quorum_votes.unwrap_or(downvotes),
            reason: meta.reason.unwrap_or_else(|| DEFAULT_HIDE_REASON.to_string()),
            reversible: meta.reversible,
        };
        state.push_hide(record.clone());
        info!(message_id = %message_id, reason = %record.reason, "Message hidden");
        Transition {
            record,
            applied: true,
        }
    }

    /// Make a hidden message visible again.
    pub fn unhide(&mut self, message_id: &str, meta: HideMetadata, now: DateTime<Utc>) -> Result<HideRecord> {
        let downvotes = self.content.get(message_id).map(ContentVotes::downvotes).unwrap_or(0);
        let state = self
            .visibility
            .get_mut(message_id)
            .filter(|s| s.is_hidden)
            .ok_or_else(|| AgoraError::NotHidden(message_id.to_string()))?;

        let record = HideRecord {
            action: HideAction::Unhide,
            timestamp: now,
            actor: meta.actor,
            quorum_votes: meta.quorum_votes.unwrap_or(downvotes),
            reason: meta.reason.unwrap_or_else(|| DEFAULT_HIDE_REASON.to_string()),
            reversible: meta.reversible,
        };
        state.push_hide(record.clone());
        info!(message_id = %message_id, actor = %record.actor, "Message unhidden");
        Ok(record)
    }

    /// Quorum-check a single message.
    pub fn evaluate_message(
        &mut self,
        message_id: &str,
        pin_quorum: QuorumThreshold,
        hide_quorum: QuorumThreshold,
        active_users: usize,
        now: DateTime<Utc>,
    ) -> Vec<QuorumAction> {
        let Some(votes) = self.content.get(message_id) else {
            return Vec::new();
        };
        let (upvotes, downvotes) = (votes.upvotes(), votes.downvotes());
        let state = self.visibility.get(message_id);

        let should_pin = upvotes > 0
            && pin_quorum.is_met(upvotes, active_users)
            && !state.is_some_and(|s| s.is_pinned || s.was_unpinned());
        let should_hide = downvotes > 0
            && hide_quorum.is_met(downvotes, active_users)
            && !state.is_some_and(|s| s.is_hidden || s.was_unhidden());

        let mut actions = Vec::new();
        if should_pin {
            let transition = self.pin(message_id, PinMetadata::quorum(upvotes), now);
            actions.push(QuorumAction::Pinned {
                message_id: message_id.to_string(),
                record: transition.record,
            });
        }
        if should_hide {
            let transition = self.hide(message_id, HideMetadata::quorum(downvotes), now);
            actions.push(QuorumAction::Hidden {
                message_id: message_id.to_string(),
                record: transition.record,
            });
        }
        actions
    }

    /// Quorum-check every tracked message.
    ///
    /// Messages already in the target state, or reversed by hand, are skipped,
    /// so a second run applies nothing new.
    pub fn evaluate_pending(
        &mut self,
        pin_quorum: QuorumThreshold,
        hide_quorum: QuorumThreshold,
        active_users: usize,
        now: DateTime<Utc>,
    ) -> Vec<QuorumAction> {
        let ids: Vec<String> = self.content.keys().cloned().collect();
        ids.iter()
            .flat_map(|id| self.evaluate_message(id, pin_quorum, hide_quorum, active_users, now))
            .collect()
    }

    /// Every tracked message, highest escalation score first.
    ///
    /// Ties break on message ID ascending.
    pub fn rank(&self, now: DateTime<Utc>) -> Vec<RankedContent> {
        let mut ranked: Vec<RankedContent> = self
            .content
            .values()
            .map(|votes| {
                let net_score = votes.net_score();
                let velocity = votes.velocity(now, self.config.velocity_window_secs);
                let age_hours = votes.age_hours(now);
                RankedContent {
                    message_id: votes.message_id.clone(),
                    net_score,
                    velocity,
                    age_hours,
                    escalation_score: escalation_score(net_score, velocity, age_hours),
                }
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.escalation_score
                .total_cmp(&a.escalation_score)
                .then_with(|| a.message_id.cmp(&b.message_id))
        });
        ranked
    }

    /// Top slice of a ranking that qualifies for automatic escalation.
    ///
    /// The slice is ceil(len × top fraction), at least one item. Items must
    /// exceed the score threshold and not have been escalated before.
    pub fn escalation_candidates<'a>(&self, ranked: &'a [RankedContent]) -> Vec<&'a RankedContent> {
        if ranked.is_empty() {
            return Vec::new();
        }
        let top = ((ranked.len() as f64 * self.config.escalation_top_fraction).ceil() as usize).max(1);
        ranked
            .iter()
            .take(top)
            .filter(|item| item.escalation_score > self.config.escalation_score_threshold)
            .filter(|item| !self.is_escalated(&item.message_id))
            .collect()
    }

    /// Move a tracked message into a new thread.
    pub fn escalate(
        &mut self,
        channel_id: &str,
        message_id: &str,
        escalation_type: EscalationType,
        now: DateTime<Utc>,
    ) -> Result<EscalationRecord> {
        let votes = self
            .content
            .get(message_id)
            .ok_or_else(|| AgoraError::MessageNotFound(message_id.to_string()))?;
        let score = escalation_score(
            votes.net_score(),
            votes.velocity(now, self.config.velocity_window_secs),
            votes.age_hours(now),
        );

        let record = EscalationRecord {
            channel_id: channel_id.to_string(),
            message_id: message_id.to_string(),
            escalation_type,
            thread_id: format!("thread-{}", Uuid::new_v4()),
            escalation_score: score,
            escalated_at: now,
        };
        info!(
            channel_id = %channel_id,
            message_id = %message_id,
            escalation_type = escalation_type.as_str(),
            thread_id = %record.thread_id,
            "Message escalated"
        );
        self.escalations.push(record.clone());
        Ok(record)
    }
}

impl Default for QuorumEngine {
    fn default() -> Self {
        Self::new(QuorumConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const FIVE: QuorumThreshold = QuorumThreshold::votes(5);

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn upvote_n(engine: &mut QuorumEngine, message_id: &str, n: usize) {
        for i in 0..n {
            engine
                .record_vote(message_id, &format!("voter-{}", i), VoteType::Upvote, t0())
                .unwrap();
        }
    }

    #[test]
    fn test_auto_tracks_on_first_vote() {
        let mut engine = QuorumEngine::default();
        let tally = engine.record_vote("m1", "alice", VoteType::Upvote, t0()).unwrap();
        assert_eq!(tally.upvotes, 1);
        assert_eq!(engine.tracked_count(), 1);
        assert!(!engine.track_message("m1", Some("bob"), t0()));
    }

    #[test]
    fn test_pin_is_idempotent() {
        let mut engine = QuorumEngine::default();
        let first = engine.pin("m1", PinMetadata::by("mod"), t0());
        assert!(first.applied);

        let second = engine.pin("m1", PinMetadata::by("other"), t0() + Duration::minutes(1));
        assert!(!second.applied);
        assert_eq!(second.record, first.record);
        assert_eq!(engine.visibility("m1").unwrap().pin_history.len(), 1);
    }

    #[test]
    fn test_unpin_requires_pinned() {
        let mut engine = QuorumEngine::default();
        assert!(matches!(
            engine.unpin("m1", PinMetadata::by("mod"), t0()),
            Err(AgoraError::NotPinned(_))
        ));

        engine.pin("m1", PinMetadata::by("mod"), t0());
        let record = engine.unpin("m1", PinMetadata::by("mod"), t0()).unwrap();
        assert_eq!(record.action, PinAction::Unpin);

        let state = engine.visibility("m1").unwrap();
        assert!(!state.is_pinned);
        assert_eq!(state.pin_history.len(), 2);
    }

    #[test]
    fn test_hide_default_reason_and_unhide() {
        let mut engine = QuorumEngine::default();
        let hidden = engine.hide("m1", HideMetadata::by("mod"), t0());
        assert_eq!(hidden.record.reason, DEFAULT_HIDE_REASON);

        let custom = engine.hide("m2", HideMetadata::by("mod").with_reason("spam"), t0());
        assert_eq!(custom.record.reason, "spam");

        engine.unhide("m1", HideMetadata::by("mod"), t0()).unwrap();
        assert!(matches!(
            engine.unhide("m1", HideMetadata::by("mod"), t0()),
            Err(AgoraError::NotHidden(_))
        ));
    }

    #[test]
    fn test_evaluate_pending_pins_at_threshold() {
        let mut engine = QuorumEngine::default();
        upvote_n(&mut engine, "m1", 4);
        assert!(engine.evaluate_pending(FIVE, FIVE, 50, t0()).is_empty());

        upvote_n(&mut engine, "m1", 5);
        let actions = engine.evaluate_pending(FIVE, FIVE, 50, t0());
        assert_eq!(actions.len(), 1);
        match &actions[0] {
            QuorumAction::Pinned { message_id, record } => {
                assert_eq!(message_id, "m1");
                assert_eq!(record.quorum_votes, 5);
                assert_eq!(record.actor, "quorum");
            }
            other => panic!("unexpected action {:?}", other),
        }

        // second run is a no-op
        assert!(engine.evaluate_pending(FIVE, FIVE, 50, t0()).is_empty());
        assert_eq!(engine.visibility("m1").unwrap().pin_history.len(), 1);
    }

    #[test]
    fn test_percent_quorum_hides() {
        let mut engine = QuorumEngine::default();
        for i in 0..3 {
            engine
                .record_vote("m1", &format!("v{}", i), VoteType::Downvote, t0())
                .unwrap();
        }
        // 10% of 25 active users rounds up to 3
        let actions = engine.evaluate_pending(FIVE, QuorumThreshold::percent_of_active(0.1), 25, t0());
        assert!(matches!(&actions[..], [QuorumAction::Hidden { .. }]));
        assert!(engine.visibility("m1").unwrap().is_hidden);
    }

    #[test]
    fn test_either_quorum_rule_pins() {
        let either = QuorumThreshold::either(5, 0.1);

        // 2 upvotes reach 10% of 20 active users but not the absolute 5
        let mut engine = QuorumEngine::default();
        upvote_n(&mut engine, "m1", 2);
        assert!(engine.evaluate_pending(FIVE, FIVE, 20, t0()).is_empty());
        let actions = engine.evaluate_pending(either, FIVE, 20, t0());
        assert!(matches!(&actions[..], [QuorumAction::Pinned { .. }]));
        assert!(engine.visibility("m1").unwrap().is_pinned);

        // 5 upvotes reach the absolute 5 but not 10% of 200 active users
        let mut engine = QuorumEngine::default();
        upvote_n(&mut engine, "m2", 5);
        let tenth = QuorumThreshold::percent_of_active(0.1);
        assert!(engine.evaluate_pending(tenth, FIVE, 200, t0()).is_empty());
        let actions = engine.evaluate_pending(either, FIVE, 200, t0());
        assert!(matches!(&actions[..], [QuorumAction::Pinned { .. }]));
        assert!(engine.visibility("m2").unwrap().is_pinned);
    }

    #[test]
    fn test_author_cannot_vote_on_own_message() {
        let mut engine = QuorumEngine::default();
        engine.track_message("m1", Some("carol"), t0());
        assert!(matches!(
            engine.record_vote("m1", "carol", VoteType::Upvote, t0()),
            Err(AgoraError::SelfVote)
        ));
        assert_eq!(engine.tally("m1").unwrap().upvotes, 0);

        let tally = engine.record_vote("m1", "alice", VoteType::Upvote, t0()).unwrap();
        assert_eq!(tally.upvotes, 1);
    }

    #[test]
    fn test_escalate_requires_tracked_message() {
        let mut engine = QuorumEngine::default();
        assert!(matches!(
            engine.escalate("general", "ghost", EscalationType::Review, t0()),
            Err(AgoraError::MessageNotFound(_))
        ));
        assert!(engine.escalations().is_empty());

        engine.track_message("m1", None, t0());
        let record = engine
            .escalate("general", "m1", EscalationType::Review, t0())
            .unwrap();
        assert_eq!(record.escalation_type, EscalationType::Review);
    }

    #[test]
    fn test_manual_unpin_not_reversed_by_quorum() {
        let mut engine = QuorumEngine::default();
        upvote_n(&mut engine, "m1", 6);
        engine.evaluate_pending(FIVE, FIVE, 50, t0());
        engine.unpin("m1", PinMetadata::by("mod"), t0()).unwrap();

        upvote_n(&mut engine, "m1", 8);
        assert!(engine.evaluate_pending(FIVE, FIVE, 50, t0()).is_empty());
        assert!(!engine.visibility("m1").unwrap().is_pinned);
    }

    #[test]
    fn test_rank_orders_and_breaks_ties() {
        let mut engine = QuorumEngine::default();
        upvote_n(&mut engine, "b", 3);
        upvote_n(&mut engine, "a", 3);
        upvote_n(&mut engine, "c", 10);

        let ranked = engine.rank(t0());
        let ids: Vec<_> = ranked.iter().map(|r| r.message_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_old_content_sinks() {
        let mut engine = QuorumEngine::default();
        engine.track_message("old", None, t0() - Duration::hours(48));
        upvote_n(&mut engine, "old", 5);
        upvote_n(&mut engine, "new", 1);

        let ranked = engine.rank(t0());
        assert_eq!(ranked[0].message_id, "new");
        // 5×2 + 5/3600×10 − 48×0.5 is negative
        assert!(ranked[1].escalation_score < 0.0);
    }

    #[test]
    fn test_escalation_candidates() {
        let mut engine = QuorumEngine::default();
        upvote_n(&mut engine, "hot", 30);
        upvote_n(&mut engine, "warm", 20);

        let ranked = engine.rank(t0());
        let candidates = engine.escalation_candidates(&ranked);
        // top 1% of two items is one item, and it clears 50
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].message_id, "hot");

        let record = engine
            .escalate("general", "hot", EscalationType::Trending, t0())
            .unwrap();
        assert!(record.thread_id.starts_with("thread-"));
        assert!(record.escalation_score > 50.0);

        let ranked = engine.rank(t0());
        assert!(engine.escalation_candidates(&ranked).is_empty());
    }

    #[test]
    fn test_low_scores_never_escalate() {
        let mut engine = QuorumEngine::default();
        upvote_n(&mut engine, "m1", 25);
        // 25×2 less two hours of age falls below 50
        let ranked = engine.rank(t0() + Duration::hours(2));
        assert!(engine.escalation_candidates(&ranked).is_empty());
    }
}
