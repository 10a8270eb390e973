//! Typed notifications for the chat layer.
//!
//! Every state change the engine makes is announced as one
//! [`GovernanceEvent`]. Consumers either subscribe to the broadcast stream or
//! register an [`EventListener`] that is called synchronously. Events are
//! published after the channel lock has been released, so a listener may call
//! back into the engine.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use agora_ledger::{AuditEntry, VoteType};

use crate::governance::{GovernanceParameter, ParameterValue, Proposal, ProposalStatus};
use crate::quorum::{EscalationType, HideRecord, PinRecord};

/// A notification emitted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum GovernanceEvent {
    ScoreUpdated {
        channel_id: String,
        voter_id: String,
        target_id: String,
        voter_score: i64,
        target_score: i64,
        vote_type: VoteType,
        voter_percentile: u8,
        target_percentile: u8,
    },
    ModerationThresholdUpdated {
        channel_id: String,
        threshold: u8,
    },
    ContentPinned {
        channel_id: String,
        message_id: String,
        pin_record: PinRecord,
    },
    ContentUnpinned {
        channel_id: String,
        message_id: String,
        pin_record: PinRecord,
    },
    ContentHidden {
        channel_id: String,
        message_id: String,
        hide_record: HideRecord,
    },
    ContentUnhidden {
        channel_id: String,
        message_id: String,
        hide_record: HideRecord,
    },
    ContentEscalated {
        channel_id: String,
        message_id: String,
        escalation_type: EscalationType,
        thread_id: String,
    },
    GovernanceProposalCreated {
        proposal: Proposal,
    },
    GovernanceProposalResolved {
        channel_id: String,
        proposal_id: String,
        status: ProposalStatus,
        support_percentage: f64,
        total_votes: usize,
    },
    GovernanceParameterChanged {
        channel_id: String,
        parameter_name: GovernanceParameter,
        old_value: ParameterValue,
        new_value: ParameterValue,
    },
    AuditEntryAppended {
        channel_id: String,
        entry: AuditEntry,
    },
    DecayApplied {
        channel_id: String,
        factor: f64,
        users: usize,
    },
}

impl GovernanceEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ScoreUpdated { .. } => "score-updated",
            Self::ModerationThresholdUpdated { .. } => "moderation-threshold-updated",
            Self::ContentPinned { .. } => "content-pinned",
            Self::ContentUnpinned { .. } => "content-unpinned",
            Self::ContentHidden { .. } => "content-hidden",
            Self::ContentUnhidden { .. } => "content-unhidden",
            Self::ContentEscalated { .. } => "content-escalated",
            Self::GovernanceProposalCreated { .. } => "governance-proposal-created",
            Self::GovernanceProposalResolved { .. } => "governance-proposal-resolved",
            Self::GovernanceParameterChanged { .. } => "governance-parameter-changed",
            Self::AuditEntryAppended { .. } => "audit-entry-appended",
            Self::DecayApplied { .. } => "decay-applied",
        }
    }

    /// Channel the event belongs to.
    pub fn channel_id(&self) -> &str {
        match self {
            Self::ScoreUpdated { channel_id, .. }
            | Self::ModerationThresholdUpdated { channel_id, .. }
            | Self::ContentPinned { channel_id, .. }
            | Self::ContentUnpinned { channel_id, .. }
            | Self::ContentHidden { channel_id, .. }
            | Self::ContentUnhidden { channel_id, .. }
            | Self::ContentEscalated { channel_id, .. }
            | Self::GovernanceProposalResolved { channel_id, .. }
            | Self::GovernanceParameterChanged { channel_id, .. }
            | Self::AuditEntryAppended { channel_id, .. }
            | Self::DecayApplied { channel_id, .. } => channel_id,
            Self::GovernanceProposalCreated { proposal } => &proposal.channel_id,
        }
    }
}

/// Synchronous receiver of engine events.
pub trait EventListener: Send + Sync {
    /// Called once per event, in emission order.
    fn on_event(&self, event: &GovernanceEvent);
}

impl<F> EventListener for F
where
    F: Fn(&GovernanceEvent) + Send + Sync,
{
    fn on_event(&self, event: &GovernanceEvent) {
        self(event)
    }
}

/// Fan-out of engine events to listeners and broadcast subscribers.
pub struct EventBus {
    sender: broadcast::Sender<GovernanceEvent>,
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
}

impl EventBus {
    /// Create a bus whose broadcast buffer holds `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Subscribe to the broadcast stream.
    pub fn subscribe(&self) -> broadcast::Receiver<GovernanceEvent> {
        self.sender.subscribe()
    }

    /// Register a synchronous listener.
    pub fn register(&self, listener: Arc<dyn EventListener>) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.push(listener);
        }
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().map(|l| l.len()).unwrap_or(0)
    }

    /// Deliver one event.
    pub fn publish(&self, event: GovernanceEvent) {
        debug!(event = event.name(), channel_id = %event.channel_id(), "Publishing event");

        let listeners: Vec<Arc<dyn EventListener>> = self
            .listeners
            .read()
            .map(|l| l.clone())
            .unwrap_or_default();
        for listener in &listeners {
            listener.on_event(&event);
        }

        // No subscribers is not an error
        let _ = self.sender.send(event);
    }

    /// Deliver a batch of events in order.
    pub fn publish_all(&self, events: impl IntoIterator<Item = GovernanceEvent>) {
        for event in events {
            self.publish(event);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
