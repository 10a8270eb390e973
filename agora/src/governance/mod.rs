//! Community governance over channel parameters.
//!
//! Members above the governance percentile vote on proposals. A proposal
//! resolves as soon as its quorum (fixed at creation) is reached, and a
//! passing proposal is applied to the channel config immediately.

mod engine;
mod proposal;

pub use engine::{AppliedChange, GovernanceProposalEngine, ProposalVoteOutcome};
pub use proposal::{
    GovernanceParameter, ParameterChange, ParameterValue, Proposal, ProposalStatus, ProposalVote,
};
