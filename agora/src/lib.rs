//! Agora - Reputation-Weighted Quorum Governance
//!
//! Decides who may act on community content inside a chat channel:
//!
//! - **Reputation**: peer votes build per-channel scores, ranked into percentiles
//! - **Moderation rights**: percentiles gate downvoting and governance votes
//! - **Content quorum**: enough votes pin, hide or escalate a message
//! - **Governance**: members propose and vote on channel parameters
//! - **Decay**: scores shrink on a timer so reputation stays current
//! - **Cooldowns**: activity-scaled rate limits per user and device
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Agora                              │
//! │                                                              │
//! │   channel ──► Mutex<ChannelState>                            │
//! │                 ├── ReputationStore                          │
//! │                 ├── QuorumEngine                             │
//! │                 ├── GovernanceProposalEngine                 │
//! │                 └── ChannelGovernanceConfig                  │
//! │                                                              │
//! │   CooldownGuard    VoteLedger    EventBus    DecayScheduler  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use agora::{Agora, AgoraConfig, VoteType};
//!
//! # tokio_test::block_on(async {
//! let agora = Agora::new(AgoraConfig::default()).unwrap();
//! agora.initialize_channel("general").await.unwrap();
//!
//! let outcome = agora.cast_vote("alice", "bob", "general", VoteType::Upvote).unwrap();
//! assert_eq!(outcome.target_score, 1);
//! assert_eq!(agora.get_percentile("bob", "general"), 100);
//! # });
//! ```

mod channel;

pub mod config;
pub mod cooldown;
pub mod decay;
pub mod engine;
pub mod events;
pub mod governance;
pub mod persistence;
pub mod quorum;
pub mod reputation;
pub mod types;

// Re-export main types
pub use agora_ledger::{AuditAction, AuditEntry, VoteLedger, VoteRecord, VoteType};
pub use config::{AgoraConfig, ChannelGovernanceConfig, QuorumThreshold};
pub use cooldown::{CooldownGuard, GlobalCooldownStatus};
pub use decay::{DecayReport, DecayScheduler};
pub use engine::Agora;
pub use events::{EventBus, EventListener, GovernanceEvent};
pub use governance::{
    GovernanceParameter, ParameterChange, ParameterValue, Proposal, ProposalStatus, ProposalVote,
    ProposalVoteOutcome,
};
pub use persistence::{
    ChannelSnapshot, MemorySnapshotStore, NoopPersistence, PersistenceError, PersistencePort,
};
pub use quorum::{
    ContentTally, EscalationRecord, EscalationType, HideMetadata, HideRecord,
    MessageVisibilityState, PinMetadata, PinRecord, QuorumAction, QuorumEngine, RankedContent,
};
pub use reputation::{Badge, LeaderboardEntry, ModerationStatus, ReputationStore, UserStatus, VoteOutcome};
pub use types::{AgoraError, Result};
