//! Pin and hide history for messages.
//!
//! Records are only ever appended. The current state is a pair of flags
//! next to the history that produced them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[cfg(feature = "typescript")]
use ts_rs::TS;

/// Reason recorded when none is given.
pub const DEFAULT_HIDE_REASON: &str = "community_moderation";

/// Actor recorded for actions taken because a quorum was reached.
pub const QUORUM_ACTOR: &str = "quorum";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum PinAction {
    Pin,
    Unpin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum HideAction {
    Hide,
    Unhide,
}

/// One pin or unpin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinRecord {
    pub action: PinAction,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    /// Upvotes the message held when the action was taken
    pub quorum_votes: usize,
    pub reversible: bool,
}

/// One hide or unhide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HideRecord {
    pub action: HideAction,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    /// Downvotes the message held when the action was taken
    pub quorum_votes: usize,
    pub reason: String,
    pub reversible: bool,
}

/// Caller-supplied details for a pin or unpin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinMetadata {
    pub actor: String,
    pub quorum_votes: Option<usize>,
    pub reversible: bool,
}

impl PinMetadata {
    /// A moderator acting by hand.
    pub fn by(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            quorum_votes: None,
            reversible: true,
        }
    }

    /// The quorum acting with `votes` behind it.
    pub fn quorum(votes: usize) -> Self {
        Self {
            actor: QUORUM_ACTOR.to_string(),
            quorum_votes: Some(votes),
            reversible: true,
        }
    }
}

/// Caller-supplied details for a hide or unhide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HideMetadata {
    pub actor: String,
    pub quorum_votes: Option<usize>,
    pub reason: Option<String>,
    pub reversible: bool,
}

impl HideMetadata {
    pub fn by(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            quorum_votes: None,
            reason: None,
            reversible: true,
        }
    }

    pub fn quorum(votes: usize) -> Self {
        Self {
            actor: QUORUM_ACTOR.to_string(),
            quorum_votes: Some(votes),
            reason: None,
            reversible: true,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Result of a pin or hide request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition<R> {
    /// The newly appended record, or the current one for a no-op
    pub record: R,
    /// Whether a record was appended
    pub applied: bool,
}

/// Visibility of one message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageVisibilityState {
    pub is_pinned: bool,
    pub is_hidden: bool,
    pub pin_history: Vec<PinRecord>,
    pub hide_history: Vec<HideRecord>,
}

impl MessageVisibilityState {
    /// Most recent pin record.
    pub fn pin_record(&self) -> Option<&PinRecord> {
        self.pin_history.last()
    }

    /// Most recent hide record.
    pub fn hide_record(&self) -> Option<&HideRecord> {
        self.hide_history.last()
    }

    /// Whether the message was ever unpinned.
    pub fn was_unpinned(&self) -> bool {
        self.pin_history.iter().any(|r| r.action == PinAction::Unpin)
    }

    /// Whether the message was ever unhidden.
    pub fn was_unhidden(&self) -> bool {
        self.hide_history.iter().any(|r| r.action == HideAction::Unhide)
    }

    pub(crate) fn push_pin(&mut self, record: PinRecord) {
        self.is_pinned = record.action == PinAction::Pin;
        self.pin_history.push(record);
    }

    pub(crate) fn push_hide(&mut self, record: HideRecord) {
        self.is_hidden = record.action == HideAction::Hide;
        self.hide_history.push(record);
    }
}
