//! The Agora governance service.
//!
//! [`Agora`] owns every channel's state, the cooldown guard, the ledger and
//! the event bus. It is an explicit service object: create one, call
//! [`Agora::start`] to run the decay timer, and [`Agora::stop`] to flush
//! snapshots on shutdown.
//!
//! ## Locking
//!
//! Each channel sits behind its own blocking mutex. Every mutation of a
//! channel, including decay, takes that lock; work on different channels
//! runs in parallel. No lock is held across an `.await`, and events are
//! published only after the lock is released.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use agora_ledger::{AuditAction, VoteLedger, VoteRecord, VoteType, SYSTEM_CHANNEL};

use crate::channel::ChannelState;
use crate::config::{AgoraConfig, ChannelGovernanceConfig};
use crate::cooldown::{CooldownGuard, GlobalCooldownStatus};
use crate::decay::{validate_decay_factor, DecayReport, DecayScheduler};
use crate::events::{EventBus, EventListener, GovernanceEvent};
use crate::governance::{
    GovernanceParameter, ParameterChange, ParameterValue, Proposal, ProposalVote,
    ProposalVoteOutcome,
};
use crate::persistence::{ChannelSnapshot, NoopPersistence, PersistencePort};
use crate::quorum::{
    ContentTally, EscalationRecord, EscalationType, HideMetadata, HideRecord,
    MessageVisibilityState, PinMetadata, PinRecord, QuorumAction, RankedContent, Transition,
};
use crate::reputation::{LeaderboardEntry, ModerationStatus, VoteOutcome};
use crate::types::{AgoraError, Result};

/// Reputation-weighted governance for a set of chat channels.
pub struct Agora {
    config: AgoraConfig,
    channels: DashMap<String, Arc<Mutex<ChannelState>>>,
    cooldowns: CooldownGuard,
    ledger: VoteLedger,
    events: EventBus,
    persistence: Arc<dyn PersistencePort>,
    scheduler: tokio::sync::Mutex<DecayScheduler>,
}

impl Agora {
    /// Create an engine that keeps no snapshots.
    pub fn new(config: AgoraConfig) -> Result<Self> {
        Self::with_persistence(config, Arc::new(NoopPersistence))
    }

    /// Create an engine backed by a snapshot store.
    pub fn with_persistence(config: AgoraConfig, persistence: Arc<dyn PersistencePort>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            cooldowns: CooldownGuard::with_config(config.cooldown.clone()),
            ledger: VoteLedger::new(),
            events: EventBus::new(config.general.event_buffer),
            scheduler: tokio::sync::Mutex::new(
                DecayScheduler::new(&config.decay)
                    .prune_every(Duration::from_secs(config.cooldown.prune_interval_secs)),
            ),
            channels: DashMap::new(),
            persistence,
            config,
        })
    }

    pub fn config(&self) -> &AgoraConfig {
        &self.config
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start the decay timer.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut scheduler = self.scheduler.lock().await;
        scheduler.start(Arc::downgrade(self))?;
        info!(channels = self.channels.len(), "Agora started");
        Ok(())
    }

    /// Stop the decay timer and save every channel.
    pub async fn stop(&self) -> Result<()> {
        self.scheduler.lock().await.stop().await;

        let snapshots = self.snapshots();
        for snapshot in &snapshots {
            self.persistence.save_channel(snapshot).await?;
        }
        info!(channels = snapshots.len(), "Agora stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.scheduler.lock().await.is_running()
    }

    /// Register a channel, restoring its snapshot if one exists.
    pub async fn initialize_channel(&self, channel_id: &str) -> Result<ChannelGovernanceConfig> {
        if self.channels.contains_key(channel_id) {
            return Err(AgoraError::ChannelExists(channel_id.to_string()));
        }

        let snapshot = self.persistence.load_channel(channel_id).await?;
        let restored = snapshot.is_some();
        let state = match snapshot {
            Some(snapshot) => ChannelState::restore(&self.config, snapshot)?,
            None => ChannelState::new(&self.config),
        };
        let config = state.config.clone();
        let users = state.reputation.active_user_count();

        match self.channels.entry(channel_id.to_string()) {
            Entry::Occupied(_) => return Err(AgoraError::ChannelExists(channel_id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(state)));
            }
        }

        let mut events = Vec::new();
        self.audit(
            channel_id,
            AuditAction::ChannelInitialized,
            &json!({ "restored": restored, "users": users, "config": &config }),
            &mut events,
        )?;
        self.events.publish_all(events);

        info!(channel_id = %channel_id, restored = restored, users = users, "Channel initialized");
        Ok(config)
    }

    /// Drop a channel and all of its scores. The ledger keeps its history.
    pub fn teardown_channel(&self, channel_id: &str) -> Result<()> {
        let (_, channel) = self
            .channels
            .remove(channel_id)
            .ok_or_else(|| AgoraError::ChannelNotFound(channel_id.to_string()))?;
        let users = channel
            .lock()
            .map(|state| state.reputation.active_user_count())
            .unwrap_or(0);

        let mut events = Vec::new();
        self.audit(
            channel_id,
            AuditAction::ChannelTornDown,
            &json!({ "users": users }),
            &mut events,
        )?;
        self.events.publish_all(events);

        info!(channel_id = %channel_id, users = users, "Channel torn down");
        Ok(())
    }

    /// Initialized channels, sorted.
    pub fn channel_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.channels.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn has_channel(&self, channel_id: &str) -> bool {
        self.channels.contains_key(channel_id)
    }

    // =========================================================================
    // Channel configuration
    // =========================================================================

    pub fn channel_config(&self, channel_id: &str) -> Result<ChannelGovernanceConfig> {
        self.read_channel(channel_id, |state| state.config.clone())
    }

    /// Change the percentile required to downvote. Only 5, 10 and 20 are accepted.
    pub fn set_moderation_threshold(&self, channel_id: &str, threshold: i64) -> Result<u8> {
        let mut events = Vec::new();
        let threshold = self.with_channel(channel_id, |state| {
            let old = state.config.moderation_threshold;
            let new = state.config.set_moderation_threshold(threshold)?;
            events.push(GovernanceEvent::ModerationThresholdUpdated {
                channel_id: channel_id.to_string(),
                threshold: new,
            });
            self.audit(
                channel_id,
                AuditAction::ThresholdUpdated,
                &json!({ "old": old, "new": new }),
                &mut events,
            )?;
            Ok(new)
        })?;
        self.events.publish_all(events);
        Ok(threshold)
    }

    /// Change the score below which content is suppressed. Returns the old value.
    pub fn set_filter_threshold(&self, channel_id: &str, threshold: i64) -> Result<i64> {
        let mut events = Vec::new();
        let old = self.with_channel(channel_id, |state| {
            let old = state.config.filter_threshold;
            state.config.filter_threshold = threshold;
            self.audit(
                channel_id,
                AuditAction::FilterThresholdUpdated,
                &json!({ "old": old, "new": threshold }),
                &mut events,
            )?;
            Ok(old)
        })?;
        self.events.publish_all(events);
        Ok(old)
    }

    // =========================================================================
    // Reputation
    // =========================================================================

    /// Cast a vote on another user.
    pub fn cast_vote(
        &self,
        voter_id: &str,
        target_id: &str,
        channel_id: &str,
        vote_type: VoteType,
    ) -> Result<VoteOutcome> {
        if voter_id == target_id {
            return Err(AgoraError::SelfVote);
        }

        let min_cohort = self.config.reputation.min_downvote_cohort;
        let mut events = Vec::new();
        let outcome = self.with_channel(channel_id, |state| {
            let policy = state.downvote_policy(min_cohort);
            let outcome = state
                .reputation
                .apply_vote(voter_id, target_id, vote_type, policy)?;

            let record = VoteRecord::new(
                voter_id,
                target_id,
                vote_type,
                channel_id,
                outcome.voter_percentile_before,
            );
            self.ledger.record_vote(record.clone());

            events.push(GovernanceEvent::ScoreUpdated {
                channel_id: channel_id.to_string(),
                voter_id: voter_id.to_string(),
                target_id: target_id.to_string(),
                voter_score: outcome.voter_score,
                target_score: outcome.target_score,
                vote_type,
                voter_percentile: outcome.voter_percentile,
                target_percentile: outcome.target_percentile,
            });
            self.audit(channel_id, AuditAction::VoteCast, &record, &mut events)?;
            Ok(outcome)
        })?;
        self.events.publish_all(events);
        Ok(outcome)
    }

    /// Cast a vote after passing the voter's cooldown for this vote type.
    pub fn cast_vote_with_session(
        &self,
        voter_id: &str,
        target_id: &str,
        channel_id: &str,
        vote_type: VoteType,
        session_id: Option<&str>,
    ) -> Result<VoteOutcome> {
        if voter_id == target_id {
            return Err(AgoraError::SelfVote);
        }
        self.cooldowns
            .check_and_record(voter_id, vote_type.as_str(), session_id)?;
        self.cast_vote(voter_id, target_id, channel_id, vote_type)
    }

    /// Score of a user, 0 if unseen or the channel is unknown.
    pub fn get_score(&self, user_id: &str, channel_id: &str) -> i64 {
        self.read_channel(channel_id, |state| state.reputation.score(user_id))
            .unwrap_or(0)
    }

    /// Percentile of a user, 0 if unseen or the channel is unknown.
    pub fn get_percentile(&self, user_id: &str, channel_id: &str) -> u8 {
        self.read_channel(channel_id, |state| state.reputation.percentile(user_id))
            .unwrap_or(0)
    }

    /// Users with a recorded score, 0 for an unknown channel.
    pub fn active_user_count(&self, channel_id: &str) -> usize {
        self.read_channel(channel_id, |state| state.reputation.active_user_count())
            .unwrap_or(0)
    }

    /// What the user may do in the channel right now.
    pub fn user_moderation_status(&self, user_id: &str, channel_id: &str) -> Result<ModerationStatus> {
        self.read_channel(channel_id, |state| {
            let standing = state.reputation.standing(user_id).unwrap_or_default();
            ModerationStatus::evaluate(standing, &state.config)
        })
    }

    /// Top users of a channel by score.
    pub fn leaderboard(&self, channel_id: &str, limit: usize) -> Result<Vec<LeaderboardEntry>> {
        self.read_channel(channel_id, |state| {
            state
                .reputation
                .leaderboard(limit, state.config.moderation_threshold)
        })
    }

    // =========================================================================
    // Cooldowns
    // =========================================================================

    pub fn cooldowns(&self) -> &CooldownGuard {
        &self.cooldowns
    }

    /// Check and record an action against the user's cooldowns.
    pub fn check_cooldown(&self, user_id: &str, action_type: &str, session_id: Option<&str>) -> Result<()> {
        self.cooldowns.check_and_record(user_id, action_type, session_id)
    }

    /// Enforce the cross-device floor.
    pub fn check_global_cooldown(&self, user_id: &str, device_id: &str) -> Result<GlobalCooldownStatus> {
        self.cooldowns.check_global_cooldown(user_id, device_id)
    }

    /// Drop cooldown state that has expired. Returns how many users were dropped.
    pub fn prune_cooldowns(&self) -> usize {
        self.cooldowns.prune_at(Utc::now())
    }

    /// Clear a user's cooldowns. The reset is audited on the system channel.
    pub fn reset_cooldowns(&self, user_id: &str, reason: &str) -> Result<bool> {
        let had_state = self.cooldowns.reset_cooldowns(user_id, reason);
        warn!(user_id = %user_id, reason = %reason, "Administrative cooldown reset");

        let mut events = Vec::new();
        self.audit(
            SYSTEM_CHANNEL,
            AuditAction::CooldownReset,
            &json!({ "user_id": user_id, "reason": reason, "had_state": had_state }),
            &mut events,
        )?;
        self.events.publish_all(events);
        Ok(had_state)
    }

    // =========================================================================
    // Content quorum
    // =========================================================================

    /// Register a message and its posting time.
    pub fn track_message(
        &self,
        channel_id: &str,
        message_id: &str,
        author_id: Option<&str>,
        posted_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_channel(channel_id, |state| {
            Ok(state.quorum.track_message(message_id, author_id, posted_at))
        })
    }

    /// Record a vote on a message and apply any quorum it reaches.
    pub fn record_vote_on_content(
        &self,
        channel_id: &str,
        message_id: &str,
        voter_id: &str,
        vote_type: VoteType,
    ) -> Result<ContentTally> {
        self.record_vote_on_content_at(channel_id, message_id, voter_id, vote_type, Utc::now())
    }

    /// [`record_vote_on_content`](Self::record_vote_on_content) at an explicit time.
    pub fn record_vote_on_content_at(
        &self,
        channel_id: &str,
        message_id: &str,
        voter_id: &str,
        vote_type: VoteType,
        now: DateTime<Utc>,
    ) -> Result<ContentTally> {
        let mut events = Vec::new();
        let tally = self.with_channel(channel_id, |state| {
            let tally = state.quorum.record_vote(message_id, voter_id, vote_type, now)?;
            let active = state.reputation.active_user_count();
            let actions = state.quorum.evaluate_message(
                message_id,
                state.config.pin_quorum,
                state.config.hide_quorum,
                active,
                now,
            );
            self.publish_quorum_actions(channel_id, &actions, &mut events)?;
            Ok(tally)
        })?;
        self.events.publish_all(events);
        Ok(tally)
    }

    /// Rank a channel's messages and escalate the qualifying top slice.
    pub fn rank_content(&self, channel_id: &str) -> Result<Vec<RankedContent>> {
        self.rank_content_at(channel_id, Utc::now())
    }

    /// [`rank_content`](Self::rank_content) at an explicit time.
    pub fn rank_content_at(&self, channel_id: &str, now: DateTime<Utc>) -> Result<Vec<RankedContent>> {
        let mut events = Vec::new();
        let ranked = self.with_channel(channel_id, |state| {
            let ranked = state.quorum.rank(now);
            let candidates: Vec<String> = state
                .quorum
                .escalation_candidates(&ranked)
                .into_iter()
                .map(|item| item.message_id.clone())
                .collect();
            for message_id in candidates {
                let record =
                    state
                        .quorum
                        .escalate(channel_id, &message_id, EscalationType::Trending, now)?;
                self.publish_escalation(&record, &mut events)?;
            }
            Ok(ranked)
        })?;
        self.events.publish_all(events);
        Ok(ranked)
    }

    /// Pin a message. Pinning a pinned message changes nothing.
    pub fn pin(&self, channel_id: &str, message_id: &str, meta: PinMetadata) -> Result<Transition<PinRecord>> {
        let mut events = Vec::new();
        let transition = self.with_channel(channel_id, |state| {
            let transition = state.quorum.pin(message_id, meta, Utc::now());
            if transition.applied {
                self.publish_pin(channel_id, message_id, &transition.record, &mut events)?;
            }
            Ok(transition)
        })?;
        self.events.publish_all(events);
        Ok(transition)
    }

    /// Unpin a pinned message.
    pub fn unpin(&self, channel_id: &str, message_id: &str, meta: PinMetadata) -> Result<PinRecord> {
        let mut events = Vec::new();
        let record = self.with_channel(channel_id, |state| {
            let record = state.quorum.unpin(message_id, meta, Utc::now())?;
            self.publish_pin(channel_id, message_id, &record, &mut events)?;
            Ok(record)
        })?;
        self.events.publish_all(events);
        Ok(record)
    }

    /// Hide a message. Hiding a hidden message changes nothing.
    pub fn hide(&self, channel_id: &str, message_id: &str, meta: HideMetadata) -> Result<Transition<HideRecord>> {
        let mut events = Vec::new();
        let transition = self.with_channel(channel_id, |state| {
            let transition = state.quorum.hide(message_id, meta, Utc::now());
            if transition.applied {
                self.publish_hide(channel_id, message_id, &transition.record, &mut events)?;
            }
            Ok(transition)
        })?;
        self.events.publish_all(events);
        Ok(transition)
    }

    /// Make a hidden message visible.
    pub fn unhide(&self, channel_id: &str, message_id: &str, meta: HideMetadata) -> Result<HideRecord> {
        let mut events = Vec::new();
        let record = self.with_channel(channel_id, |state| {
            let record = state.quorum.unhide(message_id, meta, Utc::now())?;
            self.publish_hide(channel_id, message_id, &record, &mut events)?;
            Ok(record)
        })?;
        self.events.publish_all(events);
        Ok(record)
    }

    /// Apply every pin and hide whose quorum has been reached.
    pub fn evaluate_pending_quorum_actions(&self, channel_id: &str) -> Result<Vec<QuorumAction>> {
        let mut events = Vec::new();
        let actions = self.with_channel(channel_id, |state| {
            let active = state.reputation.active_user_count();
            let actions = state.quorum.evaluate_pending(
                state.config.pin_quorum,
                state.config.hide_quorum,
                active,
                Utc::now(),
            );
            self.publish_quorum_actions(channel_id, &actions, &mut events)?;
            Ok(actions)
        })?;
        if !actions.is_empty() {
            info!(channel_id = %channel_id, actions = actions.len(), "Pending quorum actions applied");
        }
        self.events.publish_all(events);
        Ok(actions)
    }

    /// Move a tracked message into a new discussion thread.
    pub fn escalate(
        &self,
        channel_id: &str,
        message_id: &str,
        escalation_type: EscalationType,
    ) -> Result<EscalationRecord> {
        let mut events = Vec::new();
        let record = self.with_channel(channel_id, |state| {
            let record = state
                .quorum
                .escalate(channel_id, message_id, escalation_type, Utc::now())?;
            self.publish_escalation(&record, &mut events)?;
            Ok(record)
        })?;
        self.events.publish_all(events);
        Ok(record)
    }

    pub fn visibility(&self, channel_id: &str, message_id: &str) -> Result<Option<MessageVisibilityState>> {
        self.read_channel(channel_id, |state| state.quorum.visibility(message_id).cloned())
    }

    pub fn content_tally(&self, channel_id: &str, message_id: &str) -> Result<Option<ContentTally>> {
        self.read_channel(channel_id, |state| state.quorum.tally(message_id))
    }

    // =========================================================================
    // Governance
    // =========================================================================

    /// Open a proposal to change a channel parameter.
    pub fn propose(
        &self,
        channel_id: &str,
        proposer_id: &str,
        change: ParameterChange,
        reasoning: &str,
    ) -> Result<Proposal> {
        let mut events = Vec::new();
        let proposal = self.with_channel(channel_id, |state| {
            let active = state.reputation.active_user_count();
            let proposal = state.governance.propose(
                channel_id,
                proposer_id,
                change,
                reasoning,
                &state.config,
                active,
                Utc::now(),
            )?;
            events.push(GovernanceEvent::GovernanceProposalCreated {
                proposal: proposal.clone(),
            });
            self.audit(channel_id, AuditAction::ProposalCreated, &proposal, &mut events)?;
            Ok(proposal)
        })?;
        self.events.publish_all(events);
        Ok(proposal)
    }

    /// Vote on a proposal; the vote that reaches quorum resolves it.
    pub fn vote_on_proposal(
        &self,
        proposal_id: &str,
        voter_id: &str,
        vote: ProposalVote,
        channel_id: &str,
    ) -> Result<ProposalVoteOutcome> {
        let mut events = Vec::new();
        let outcome = self.with_channel(channel_id, |state| {
            let percentile = state.reputation.percentile(voter_id);
            let outcome = state.governance.vote_on_proposal(
                proposal_id,
                voter_id,
                vote,
                percentile,
                &mut state.config,
                Utc::now(),
            )?;

            if outcome.resolved {
                let proposal = &outcome.proposal;
                let support_percentage = proposal.support_percentage.unwrap_or(0.0);
                events.push(GovernanceEvent::GovernanceProposalResolved {
                    channel_id: channel_id.to_string(),
                    proposal_id: proposal.id.clone(),
                    status: proposal.status,
                    support_percentage,
                    total_votes: proposal.total_votes(),
                });
                self.audit(
                    channel_id,
                    AuditAction::ProposalResolved,
                    &json!({
                        "proposal_id": proposal.id,
                        "status": proposal.status,
                        "support_percentage": support_percentage,
                        "total_votes": proposal.total_votes(),
                    }),
                    &mut events,
                )?;
            }

            if let Some(applied) = &outcome.applied {
                let parameter = outcome.proposal.parameter;
                events.push(GovernanceEvent::GovernanceParameterChanged {
                    channel_id: channel_id.to_string(),
                    parameter_name: parameter,
                    old_value: applied.old_value,
                    new_value: applied.new_value,
                });
                if parameter == GovernanceParameter::ModerationThreshold {
                    events.push(GovernanceEvent::ModerationThresholdUpdated {
                        channel_id: channel_id.to_string(),
                        threshold: state.config.moderation_threshold,
                    });
                }
                self.audit(
                    channel_id,
                    AuditAction::ParameterChanged,
                    &json!({
                        "proposal_id": outcome.proposal.id,
                        "parameter": parameter,
                        "old_value": applied.old_value,
                        "new_value": applied.new_value,
                    }),
                    &mut events,
                )?;
            }
            Ok(outcome)
        })?;
        self.events.publish_all(events);
        Ok(outcome)
    }

    pub fn proposal(&self, channel_id: &str, proposal_id: &str) -> Result<Option<Proposal>> {
        self.read_channel(channel_id, |state| state.governance.proposal(proposal_id).cloned())
    }

    pub fn active_proposals(&self, channel_id: &str) -> Result<Vec<Proposal>> {
        self.read_channel(channel_id, |state| state.governance.active_proposals())
    }

    /// Current value of a governance parameter.
    pub fn parameter_value(&self, channel_id: &str, parameter: GovernanceParameter) -> Result<ParameterValue> {
        self.read_channel(channel_id, |state| parameter.read(&state.config))
    }

    // =========================================================================
    // Decay
    // =========================================================================

    /// Decay every score in every channel and save the decayed channels.
    pub async fn apply_decay(&self, factor: f64) -> Result<DecayReport> {
        validate_decay_factor(factor)?;

        let mut report = DecayReport {
            factor,
            channels: 0,
            users: 0,
        };
        let mut snapshots = Vec::new();

        for channel_id in self.channel_ids() {
            let mut events = Vec::new();
            let result = self.with_channel(&channel_id, |state| {
                let users = state.reputation.apply_decay(factor);
                if users == 0 {
                    return Ok(None);
                }
                events.push(GovernanceEvent::DecayApplied {
                    channel_id: channel_id.clone(),
                    factor,
                    users,
                });
                self.audit(
                    &channel_id,
                    AuditAction::DecayApplied,
                    &json!({ "factor": factor, "users": users }),
                    &mut events,
                )?;
                Ok(Some((users, state.snapshot(&channel_id))))
            });

            match result {
                Ok(Some((users, snapshot))) => {
                    report.channels += 1;
                    report.users += users;
                    snapshots.push(snapshot);
                    self.events.publish_all(events);
                }
                Ok(None) => {}
                // Torn down during the sweep
                Err(AgoraError::ChannelNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        for snapshot in &snapshots {
            self.persistence.save_channel(snapshot).await?;
        }

        info!(
            factor = factor,
            channels = report.channels,
            users = report.users,
            "Decay applied"
        );
        Ok(report)
    }

    // =========================================================================
    // Ledger and events
    // =========================================================================

    pub fn ledger(&self) -> &VoteLedger {
        &self.ledger
    }

    /// Stream of every event the engine emits.
    pub fn subscribe(&self) -> broadcast::Receiver<GovernanceEvent> {
        self.events.subscribe()
    }

    pub fn register_listener(&self, listener: Arc<dyn EventListener>) {
        self.events.register(listener);
    }

    /// Snapshot of one channel.
    pub fn snapshot(&self, channel_id: &str) -> Result<ChannelSnapshot> {
        self.read_channel(channel_id, |state| state.snapshot(channel_id))
    }

    fn snapshots(&self) -> Vec<ChannelSnapshot> {
        self.channel_ids()
            .iter()
            .filter_map(|id| self.snapshot(id).ok())
            .collect()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn channel(&self, channel_id: &str) -> Result<Arc<Mutex<ChannelState>>> {
        self.channels
            .get(channel_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| AgoraError::ChannelNotFound(channel_id.to_string()))
    }

    /// Run `f` with the channel locked.
    fn with_channel<T>(
        &self,
        channel_id: &str,
        f: impl FnOnce(&mut ChannelState) -> Result<T>,
    ) -> Result<T> {
        let channel = self.channel(channel_id)?;
        let mut state = channel.lock().map_err(|_| {
            error!(channel_id = %channel_id, "Channel state poisoned");
            AgoraError::StatePoisoned(channel_id.to_string())
        })?;
        f(&mut state)
    }

    fn read_channel<T>(&self, channel_id: &str, f: impl FnOnce(&ChannelState) -> T) -> Result<T> {
        self.with_channel(channel_id, |state| Ok(f(state)))
    }

    /// Append to the ledger and queue the matching event.
    fn audit(
        &self,
        channel_id: &str,
        action: AuditAction,
        payload: &impl Serialize,
        events: &mut Vec<GovernanceEvent>,
    ) -> Result<()> {
        if !self.config.general.audit_enabled {
            return Ok(());
        }
        let entry = self.ledger.append(channel_id, action, payload)?;
        events.push(GovernanceEvent::AuditEntryAppended {
            channel_id: channel_id.to_string(),
            entry,
        });
        Ok(())
    }

    fn publish_pin(
        &self,
        channel_id: &str,
        message_id: &str,
        record: &PinRecord,
        events: &mut Vec<GovernanceEvent>,
    ) -> Result<()> {
        let (event, action) = match record.action {
            crate::quorum::PinAction::Pin => (
                GovernanceEvent::ContentPinned {
                    channel_id: channel_id.to_string(),
                    message_id: message_id.to_string(),
                    pin_record: record.clone(),
                },
                AuditAction::ContentPinned,
            ),
            crate::quorum::PinAction::Unpin => (
                GovernanceEvent::ContentUnpinned {
                    channel_id: channel_id.to_string(),
                    message_id: message_id.to_string(),
                    pin_record: record.clone(),
                },
                AuditAction::ContentUnpinned,
            ),
        };
        events.push(event);
        self.audit(
            channel_id,
            action,
            &json!({ "message_id": message_id, "record": record }),
            events,
        )
    }

    fn publish_hide(
        &self,
        channel_id: &str,
        message_id: &str,
        record: &HideRecord,
        events: &mut Vec<GovernanceEvent>,
    ) -> Result<()> {
        let (event, action) = match record.action {
            crate::quorum::HideAction::Hide => (
                GovernanceEvent::ContentHidden {
                    channel_id: channel_id.to_string(),
                    message_id: message_id.to_string(),
                    hide_record: record.clone(),
                },
                AuditAction::ContentHidden,
            ),
            crate::quorum::HideAction::Unhide => (
                GovernanceEvent::ContentUnhidden {
                    channel_id: channel_id.to_string(),
                    message_id: message_id.to_string(),
                    hide_record: record.clone(),
                },
                AuditAction::ContentUnhidden,
            ),
        };
        events.push(event);
        self.audit(
            channel_id,
            action,
            &json!({ "message_id": message_id, "record": record }),
            events,
        )
    }

    fn publish_quorum_actions(
        &self,
        channel_id: &str,
        actions: &[QuorumAction],
        events: &mut Vec<GovernanceEvent>,
    ) -> Result<()> {
        for action in actions {
            match action {
                QuorumAction::Pinned { message_id, record } => {
                    self.publish_pin(channel_id, message_id, record, events)?
                }
                QuorumAction::Hidden { message_id, record } => {
                    self.publish_hide(channel_id, message_id, record, events)?
                }
            }
        }
        Ok(())
    }

    fn publish_escalation(&self, record: &EscalationRecord, events: &mut Vec<GovernanceEvent>) -> Result<()> {
        events.push(GovernanceEvent::ContentEscalated {
            channel_id: record.channel_id.clone(),
            message_id: record.message_id.clone(),
            escalation_type: record.escalation_type,
            thread_id: record.thread_id.clone(),
        });
        self.audit(&record.channel_id, AuditAction::ContentEscalated, record, events)
    }
}
