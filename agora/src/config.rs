//! Configuration for the Agora engine.

use serde::{Deserialize, Serialize};

use crate::types::{AgoraError, Result};

/// Moderation thresholds a channel may choose from.
pub const ALLOWED_MODERATION_THRESHOLDS: [u8; 3] = [5, 10, 20];

/// Engine-wide configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgoraConfig {
    /// Reputation configuration
    #[serde(default)]
    pub reputation: ReputationConfig,
    /// Cooldown configuration
    #[serde(default)]
    pub cooldown: CooldownConfig,
    /// Quorum configuration
    #[serde(default)]
    pub quorum: QuorumConfig,
    /// Governance configuration
    #[serde(default)]
    pub governance: GovernanceConfig,
    /// Decay configuration
    #[serde(default)]
    pub decay: DecayConfig,
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,
}

impl AgoraConfig {
    /// Load config from YAML.
    pub fn from_yaml(yaml: &str) -> std::result::Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> std::result::Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        validate_moderation_threshold(self.reputation.default_moderation_threshold as i64)?;
        self.quorum.pin.validate()?;
        self.quorum.hide.validate()?;

        if !(self.decay.factor > 0.0 && self.decay.factor <= 1.0) {
            return Err(AgoraError::Config(format!(
                "decay factor must be in (0, 1], got {}",
                self.decay.factor
            )));
        }
        if self.decay.interval_secs == 0 {
            return Err(AgoraError::Config("decay interval must be positive".into()));
        }
        if self.cooldown.prune_interval_secs == 0 {
            return Err(AgoraError::Config("cooldown prune interval must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.governance.support_ratio) {
            return Err(AgoraError::Config(format!(
                "support ratio must be in [0, 1], got {}",
                self.governance.support_ratio
            )));
        }
        if self.governance.min_voter_percentile > 100 {
            return Err(AgoraError::Config(
                "governance percentile gate must be at most 100".into(),
            ));
        }
        Ok(())
    }

    /// Per-channel defaults derived from this config.
    pub fn channel_defaults(&self) -> ChannelGovernanceConfig {
        ChannelGovernanceConfig {
            moderation_threshold: self.reputation.default_moderation_threshold,
            filter_threshold: self.reputation.default_filter_threshold,
            pin_quorum: self.quorum.pin,
            hide_quorum: self.quorum.hide,
        }
    }
}

/// Reputation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationConfig {
    /// Percentile required to downvote in new channels
    pub default_moderation_threshold: u8,
    /// Score below which content is suppressed in new channels
    pub default_filter_threshold: i64,
    /// Minimum active users before anyone may downvote
    pub min_downvote_cohort: usize,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            default_moderation_threshold: 10,
            default_filter_threshold: -10,
            min_downvote_cohort: 3,
        }
    }
}

/// Cooldown configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooldownConfig {
    /// Window between two actions of the same type (ms)
    pub base_window_ms: u64,
    /// Window once the user exceeds `elevated_after` recent actions (ms)
    pub elevated_window_ms: u64,
    /// Window once the user exceeds `heavy_after` recent actions (ms)
    pub heavy_window_ms: u64,
    /// Recent actions above which the elevated window applies
    pub elevated_after: usize,
    /// Recent actions above which the heavy window applies
    pub heavy_after: usize,
    /// How far back actions count as recent (seconds)
    pub recent_window_secs: u64,
    /// Minimum spacing between actions from one session (ms)
    pub session_spacing_ms: u64,
    /// Minimum spacing between actions across all devices (ms)
    pub global_spacing_ms: u64,
    /// How long a device stays in the distinct-device count (seconds)
    pub device_window_secs: u64,
    /// Distinct devices above which a user is flagged
    pub suspicious_device_count: usize,
    /// How often idle cooldown state is dropped (seconds)
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,
}

fn default_prune_interval_secs() -> u64 {
    300
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            base_window_ms: 1_000,
            elevated_window_ms: 5_000,
            heavy_window_ms: 30_000,
            elevated_after: 10,
            heavy_after: 20,
            recent_window_secs: 300, // 5 minutes
            session_spacing_ms: 500,
            global_spacing_ms: 500,
            device_window_secs: 3600, // 1 hour
            suspicious_device_count: 3,
            prune_interval_secs: default_prune_interval_secs(),
        }
    }
}

/// A quorum requirement for a content action.
///
/// Either an absolute vote count, a fraction of the channel's active users,
/// or both. When both are set, meeting either one qualifies.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct QuorumThreshold {
    /// Fixed number of votes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub votes: Option<u32>,
    /// Fraction of active users (0.0 - 1.0), rounded up, never below 1 vote
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fraction: Option<f64>,
}

impl QuorumThreshold {
    /// Absolute vote count only.
    pub const fn votes(n: u32) -> Self {
        Self {
            votes: Some(n),
            fraction: None,
        }
    }

    /// Fraction of active users only.
    pub const fn percent_of_active(fraction: f64) -> Self {
        Self {
            votes: None,
            fraction: Some(fraction),
        }
    }

    /// Met by `n` votes or by `fraction` of active users, whichever comes first.
    pub const fn either(n: u32, fraction: f64) -> Self {
        Self {
            votes: Some(n),
            fraction: Some(fraction),
        }
    }

    /// Fewest votes that satisfy the requirement for `active_users`.
    pub fn required(&self, active_users: usize) -> usize {
        let absolute = self.votes.map(|n| (n as usize).max(1));
        let proportional = self
            .fraction
            .map(|f| ((active_users as f64 * f).ceil() as usize).max(1));
        match (absolute, proportional) {
            (Some(a), Some(p)) => a.min(p),
            (Some(a), None) => a,
            (None, Some(p)) => p,
            (None, None) => usize::MAX,
        }
    }

    /// Whether `votes` meets either rule.
    pub fn is_met(&self, votes: usize, active_users: usize) -> bool {
        votes >= self.required(active_users)
    }

    /// Require at least one rule, a non-zero count and a fraction in (0, 1].
    pub fn validate(&self) -> Result<()> {
        if self.votes.is_none() && self.fraction.is_none() {
            return Err(AgoraError::InvalidParameter(
                "quorum needs a vote count, a fraction or both".into(),
            ));
        }
        if self.votes == Some(0) {
            return Err(AgoraError::InvalidParameter(
                "quorum vote count must be at least 1".into(),
            ));
        }
        if let Some(f) = self.fraction {
            if !(f > 0.0 && f <= 1.0) {
                return Err(AgoraError::InvalidParameter(format!(
                    "quorum fraction must be in (0, 1], got {}",
                    f
                )));
            }
        }
        Ok(())
    }
}

/// Quorum configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuorumConfig {
    /// Default upvotes needed to pin
    pub pin: QuorumThreshold,
    /// Default downvotes needed to hide
    pub hide: QuorumThreshold,
    /// Escalation score a top item must exceed to auto-escalate
    pub escalation_score_threshold: f64,
    /// Fraction of ranked content eligible for auto-escalation
    pub escalation_top_fraction: f64,
    /// Trailing window for vote velocity (seconds)
    pub velocity_window_secs: u64,
}

impl Default for QuorumConfig {
    fn default() -> Self {
        Self {
            pin: QuorumThreshold::votes(5),
            hide: QuorumThreshold::votes(5),
            escalation_score_threshold: 50.0,
            escalation_top_fraction: 0.01,
            velocity_window_secs: 3600,
        }
    }
}

/// Governance configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceConfig {
    /// Percentile required to vote on proposals
    pub min_voter_percentile: u8,
    /// Floor on the number of votes needed to resolve a proposal
    pub min_quorum: usize,
    /// Fraction of active users needed to resolve a proposal
    pub quorum_fraction: f64,
    /// Share of support votes needed to pass
    pub support_ratio: f64,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            min_voter_percentile: 25,
            min_quorum: 10,
            quorum_fraction: 0.1,
            support_ratio: 0.6,
        }
    }
}

impl GovernanceConfig {
    /// Votes required to resolve a proposal: max(min_quorum, ceil(active × fraction)).
    pub fn required_quorum(&self, active_users: usize) -> usize {
        let proportional = (active_users as f64 * self.quorum_fraction).ceil() as usize;
        self.min_quorum.max(proportional)
    }
}

/// Decay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecayConfig {
    /// Multiplier applied to every score per sweep
    pub factor: f64,
    /// Time between sweeps (seconds)
    pub interval_secs: u64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            factor: 0.8,
            interval_secs: 7 * 24 * 3600, // weekly
        }
    }
}

/// General configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Write audit entries for governance actions
    pub audit_enabled: bool,
    /// Capacity of the broadcast event buffer
    pub event_buffer: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            audit_enabled: true,
            event_buffer: 256,
        }
    }
}

/// Governance parameters of one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelGovernanceConfig {
    /// Percentile required to downvote (5, 10 or 20)
    pub moderation_threshold: u8,
    /// Score below which a user's content is suppressed
    pub filter_threshold: i64,
    /// Upvotes needed to pin a message
    pub pin_quorum: QuorumThreshold,
    /// Downvotes needed to hide a message
    pub hide_quorum: QuorumThreshold,
}

impl Default for ChannelGovernanceConfig {
    fn default() -> Self {
        AgoraConfig::default().channel_defaults()
    }
}

impl ChannelGovernanceConfig {
    /// Set the moderation threshold, rejecting values outside {5, 10, 20}.
    pub fn set_moderation_threshold(&mut self, threshold: i64) -> Result<u8> {
        let threshold = validate_moderation_threshold(threshold)?;
        self.moderation_threshold = threshold;
        Ok(threshold)
    }

    /// Check every field.
    pub fn validate(&self) -> Result<()> {
        validate_moderation_threshold(self.moderation_threshold as i64)?;
        self.pin_quorum.validate()?;
        self.hide_quorum.validate()
    }
}

/// Accept only the allowed moderation thresholds.
pub fn validate_moderation_threshold(threshold: i64) -> Result<u8> {
    ALLOWED_MODERATION_THRESHOLDS
        .iter()
        .copied()
        .find(|allowed| *allowed as i64 == threshold)
        .ok_or(AgoraError::InvalidThreshold(threshold))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AgoraConfig::default();
        assert_eq!(config.reputation.default_moderation_threshold, 10);
        assert_eq!(config.reputation.default_filter_threshold, -10);
        assert_eq!(config.cooldown.base_window_ms, 1_000);
        assert_eq!(config.decay.factor, 0.8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let mut config = AgoraConfig::default();
        config.quorum.pin = QuorumThreshold::percent_of_active(0.25);
        let yaml = config.to_yaml().unwrap();
        let parsed = AgoraConfig::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.quorum.pin, QuorumThreshold::percent_of_active(0.25));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "governance:\n  min_voter_percentile: 30\n  min_quorum: 4\n  quorum_fraction: 0.2\n  support_ratio: 0.5\n";
        let config = AgoraConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.governance.min_quorum, 4);
        assert_eq!(config.cooldown.session_spacing_ms, 500);
    }

    #[test]
    fn test_moderation_threshold_allowed_set() {
        let mut channel = ChannelGovernanceConfig::default();
        assert_eq!(channel.set_moderation_threshold(20).unwrap(), 20);
        assert_eq!(channel.moderation_threshold, 20);

        for bad in [0, 7, 15, 25, -5] {
            assert!(matches!(
                channel.set_moderation_threshold(bad),
                Err(AgoraError::InvalidThreshold(v)) if v == bad
            ));
        }
        assert_eq!(channel.moderation_threshold, 20);
    }

    #[test]
    fn test_quorum_threshold_required() {
        assert_eq!(QuorumThreshold::votes(5).required(1000), 5);
        assert_eq!(QuorumThreshold::percent_of_active(0.1).required(35), 4);
        assert_eq!(QuorumThreshold::percent_of_active(0.1).required(0), 1);
        assert!(QuorumThreshold::votes(3).is_met(3, 0));
        assert!(!QuorumThreshold::votes(3).is_met(2, 0));
    }

    #[test]
    fn test_quorum_either_rule_qualifies() {
        let quorum = QuorumThreshold::either(5, 0.1);

        // 10% of 20 active users is 2 votes, well under the absolute 5
        assert_eq!(quorum.required(20), 2);
        assert!(quorum.is_met(2, 20));
        assert!(!QuorumThreshold::votes(5).is_met(2, 20));

        // 10% of 200 active users is 20 votes, the absolute 5 is met first
        assert_eq!(quorum.required(200), 5);
        assert!(quorum.is_met(5, 200));
        assert!(!QuorumThreshold::percent_of_active(0.1).is_met(5, 200));

        assert!(!quorum.is_met(1, 20));
    }

    #[test]
    fn test_quorum_threshold_validation() {
        assert!(QuorumThreshold::votes(0).validate().is_err());
        assert!(QuorumThreshold::percent_of_active(0.0).validate().is_err());
        assert!(QuorumThreshold::percent_of_active(1.5).validate().is_err());
        assert!(QuorumThreshold::either(3, 2.0).validate().is_err());
        assert!(QuorumThreshold::default().validate().is_err());
        assert!(QuorumThreshold::percent_of_active(0.5).validate().is_ok());
        assert!(QuorumThreshold::either(5, 0.1).validate().is_ok());
    }

    #[test]
    fn test_quorum_yaml_accepts_either_rule() {
        let yaml = "quorum:\n  pin:\n    votes: 5\n    fraction: 0.1\n  hide:\n    votes: 4\n  escalation_score_threshold: 50.0\n  escalation_top_fraction: 0.01\n  velocity_window_secs: 3600\n";
        let config = AgoraConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.quorum.pin, QuorumThreshold::either(5, 0.1));
        assert_eq!(config.quorum.hide, QuorumThreshold::votes(4));
    }

    #[test]
    fn test_required_quorum() {
        let governance = GovernanceConfig::default();
        assert_eq!(governance.required_quorum(5), 10);
        assert_eq!(governance.required_quorum(100), 10);
        assert_eq!(governance.required_quorum(101), 11);
        assert_eq!(governance.required_quorum(250), 25);
    }

    #[test]
    fn test_invalid_decay_factor_rejected() {
        let mut config = AgoraConfig::default();
        config.decay.factor = 1.5;
        assert!(matches!(config.validate(), Err(AgoraError::Config(_))));
    }
}
