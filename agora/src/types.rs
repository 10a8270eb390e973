//! Error types shared across the engine.

/// Error types for Agora.
///
/// Every variant except `StatePoisoned`, `Persistence` and `Ledger` is a
/// user-facing rejection that the chat layer can show verbatim.
#[derive(Debug, thiserror::Error)]
pub enum AgoraError {
    /// Voter and target are the same user
    #[error("You cannot vote on yourself")]
    SelfVote,

    /// Too few users in the channel for downvoting
    #[error("Downvoting requires at least {required} active users in this channel (currently {active})")]
    InsufficientCohort { active: usize, required: usize },

    /// Voter percentile below the required gate
    #[error("This action requires the {required}th percentile or higher; you are at the {actual}th percentile")]
    InsufficientPercentile { required: u8, actual: u8 },

    /// Moderation threshold outside the allowed set
    #[error("Invalid moderation threshold {0}: must be one of 5, 10 or 20")]
    InvalidThreshold(i64),

    /// Rate limit triggered
    #[error("Please wait {:.1}s before doing that again", as_secs(.remaining_ms))]
    CooldownActive { remaining_ms: u64 },

    /// Channel was never initialized (or was torn down)
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    /// Channel was already initialized
    #[error("Channel already initialized: {0}")]
    ChannelExists(String),

    /// Proposal ID unknown in this channel
    #[error("Proposal not found: {0}")]
    ProposalNotFound(String),

    /// Proposal already resolved
    #[error("Proposal {0} is closed")]
    ProposalClosed(String),

    /// Message was never tracked in this channel
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// Unpin requested for a message that is not pinned
    #[error("Message {0} is not pinned")]
    NotPinned(String),

    /// Unhide requested for a message that is not hidden
    #[error("Message {0} is not hidden")]
    NotHidden(String),

    /// Proposed parameter value is malformed
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Persistence port failure
    #[error("Persistence error: {0}")]
    Persistence(#[from] crate::persistence::PersistenceError),

    /// Ledger failure
    #[error("Ledger error: {0}")]
    Ledger(#[from] agora_ledger::LedgerError),

    /// A panic occurred while the channel state was locked
    #[error("Channel state poisoned: {0}")]
    StatePoisoned(String),
}

impl AgoraError {
    /// Whether the error is a rejection the end user caused and can see.
    pub fn is_user_facing(&self) -> bool {
        !matches!(
            self,
            Self::Persistence(_) | Self::Ledger(_) | Self::StatePoisoned(_) | Self::Config(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AgoraError>;

fn as_secs(ms: &u64) -> f64 {
    *ms as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_message_states_both_values() {
        let err = AgoraError::InsufficientPercentile {
            required: 20,
            actual: 0,
        };
        let msg = err.to_string();
        assert!(msg.contains("20th"));
        assert!(msg.contains("0th"));
        assert!(err.is_user_facing());
    }

    #[test]
    fn test_cooldown_message_in_seconds() {
        let err = AgoraError::CooldownActive { remaining_ms: 1500 };
        assert!(err.to_string().contains("1.5s"));
    }

    #[test]
    fn test_internal_errors_not_user_facing() {
        assert!(!AgoraError::StatePoisoned("general".into()).is_user_facing());
    }
}
