//! Quorum-triggered content actions.
//!
//! Votes on messages accumulate per channel. Once the upvotes (or
//! downvotes) on a message meet the channel's pin (or hide) quorum, the
//! action is taken and recorded. Ranking by escalation score decides which
//! messages are spun off into threads.
//!
//! This is a single-writer model over one in-memory view of the channel.
//! It makes no claim to fault-tolerant distributed consensus.

mod content;
mod engine;
mod visibility;

pub use content::{escalation_score, ContentTally, ContentVotes, RankedContent};
pub use engine::{EscalationRecord, EscalationType, QuorumAction, QuorumEngine};
pub use visibility::{
    HideAction, HideMetadata, HideRecord, MessageVisibilityState, PinAction, PinMetadata,
    PinRecord, Transition, DEFAULT_HIDE_REASON, QUORUM_ACTOR,
};
