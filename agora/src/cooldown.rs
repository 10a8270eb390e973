//! Per-user rate limiting with activity-scaled windows.
//!
//! Each check holds the user's map entry for its whole duration, so checking
//! and recording is one atomic step: two concurrent votes from the same user
//! cannot both pass.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::CooldownConfig;
use crate::types::{AgoraError, Result};

#[derive(Debug, Default)]
struct CooldownState {
    /// Last success per action type
    last_action: HashMap<String, DateTime<Utc>>,
    /// Last success per session/device
    last_session: HashMap<String, DateTime<Utc>>,
    /// Successful actions inside the recent window, oldest first
    recent: VecDeque<DateTime<Utc>>,
}

impl CooldownState {
    fn prune_recent(&mut self, cutoff: DateTime<Utc>) {
        while self.recent.front().is_some_and(|ts| *ts < cutoff) {
            self.recent.pop_front();
        }
    }
}

#[derive(Debug, Default)]
struct DeviceActivity {
    last_action: Option<DateTime<Utc>>,
    devices: HashMap<String, DateTime<Utc>>,
    suspicious_flags: u64,
}

/// Outcome of a cross-device check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalCooldownStatus {
    /// Distinct devices seen inside the device window
    pub distinct_devices: usize,
    /// Times the user has been flagged for too many devices
    pub suspicious_flags: u64,
}

/// Rate limiter for votes and governance actions.
pub struct CooldownGuard {
    config: CooldownConfig,
    states: DashMap<String, CooldownState>,
    devices: DashMap<String, DeviceActivity>,
}

impl CooldownGuard {
    /// Create a guard with default configuration.
    pub fn new() -> Self {
        Self::with_config(CooldownConfig::default())
    }

    /// Create with custom configuration.
    pub fn with_config(config: CooldownConfig) -> Self {
        Self {
            config,
            states: DashMap::new(),
            devices: DashMap::new(),
        }
    }

    /// Check the user's cooldowns and, if clear, record the action.
    pub fn check_and_record(
        &self,
        user_id: &str,
        action_type: &str,
        session_id: Option<&str>,
    ) -> Result<()> {
        self.check_and_record_at(user_id, action_type, session_id, Utc::now())
    }

    /// [`check_and_record`](Self::check_and_record) at an explicit time.
    pub fn check_and_record_at(
        &self,
        user_id: &str,
        action_type: &str,
        session_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.states.entry(user_id.to_string()).or_default();
        state.prune_recent(now - Duration::seconds(self.config.recent_window_secs as i64));

        let window_ms = self.window_ms(state.recent.len());
        let mut remaining_ms = 0;

        if let Some(last) = state.last_action.get(action_type) {
            remaining_ms = remaining_ms.max(remaining(*last, now, window_ms));
        }
        if let Some(session) = session_id {
            if let Some(last) = state.last_session.get(session) {
                remaining_ms =
                    remaining_ms.max(remaining(*last, now, self.config.session_spacing_ms));
            }
        }

        if remaining_ms > 0 {
            debug!(
                user_id = %user_id,
                action_type = %action_type,
                remaining_ms = remaining_ms,
                "Cooldown active"
            );
            return Err(AgoraError::CooldownActive { remaining_ms });
        }

        state.last_action.insert(action_type.to_string(), now);
        if let Some(session) = session_id {
            state.last_session.insert(session.to_string(), now);
        }
        state.recent.push_back(now);
        Ok(())
    }

    /// Enforce the cross-device floor and track distinct devices.
    pub fn check_global_cooldown(&self, user_id: &str, device_id: &str) -> Result<GlobalCooldownStatus> {
        self.check_global_cooldown_at(user_id, device_id, Utc::now())
    }

    /// [`check_global_cooldown`](Self::check_global_cooldown) at an explicit time.
    pub fn check_global_cooldown_at(
        &self,
        user_id: &str,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<GlobalCooldownStatus> {
        let mut activity = self.devices.entry(user_id.to_string()).or_default();

        let cutoff = now - Duration::seconds(self.config.device_window_secs as i64);
        activity.devices.retain(|_, seen| *seen >= cutoff);

        if let Some(last) = activity.last_action {
            let remaining_ms = remaining(last, now, self.config.global_spacing_ms);
            if remaining_ms > 0 {
                return Err(AgoraError::CooldownActive { remaining_ms });
            }
        }

        activity.last_action = Some(now);
        activity.devices.insert(device_id.to_string(), now);

        let distinct_devices = activity.devices.len();
        if distinct_devices > self.config.suspicious_device_count {
            activity.suspicious_flags += 1;
            warn!(
                user_id = %user_id,
                distinct_devices = distinct_devices,
                flags = activity.suspicious_flags,
                "User active from too many devices"
            );
        }

        Ok(GlobalCooldownStatus {
            distinct_devices,
            suspicious_flags: activity.suspicious_flags,
        })
    }

    /// Times a user has been flagged for device spread.
    pub fn suspicious_flags(&self, user_id: &str) -> u64 {
        self.devices
            .get(user_id)
            .map(|a| a.suspicious_flags)
            .unwrap_or(0)
    }

    /// Actions the user has taken inside the recent window.
    pub fn recent_action_count(&self, user_id: &str) -> usize {
        self.recent_action_count_at(user_id, Utc::now())
    }

    /// [`recent_action_count`](Self::recent_action_count) at an explicit time.
    pub fn recent_action_count_at(&self, user_id: &str, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::seconds(self.config.recent_window_secs as i64);
        self.states
            .get(user_id)
            .map(|s| s.recent.iter().filter(|ts| **ts >= cutoff).count())
            .unwrap_or(0)
    }

    /// Users with rate-limit state in memory.
    pub fn tracked_users(&self) -> usize {
        self.states.len()
    }

    /// Clear every cooldown for a user. Returns whether any state existed.
    ///
    /// The suspicious-device counter is kept; it only ever grows.
    pub fn reset_cooldowns(&self, user_id: &str, reason: &str) -> bool {
        let had_state = self.states.remove(user_id).is_some();
        if let Some(mut activity) = self.devices.get_mut(user_id) {
            activity.last_action = None;
            activity.devices.clear();
        }
        info!(user_id = %user_id, reason = %reason, "Cooldowns reset");
        had_state
    }

    /// Drop state that can no longer affect any check.
    ///
    /// Returns how many users were dropped.
    pub fn prune_at(&self, now: DateTime<Utc>) -> usize {
        let before = self.states.len();
        let longest_ms = self
            .config
            .heavy_window_ms
            .max(self.config.elevated_window_ms)
            .max(self.config.base_window_ms)
            .max(self.config.session_spacing_ms);
        let action_cutoff = now - Duration::milliseconds(longest_ms as i64);
        let recent_cutoff = now - Duration::seconds(self.config.recent_window_secs as i64);

        self.states.retain(|_, state| {
            state.prune_recent(recent_cutoff);
            state.last_action.retain(|_, ts| *ts >= action_cutoff);
            state.last_session.retain(|_, ts| *ts >= action_cutoff);
            !(state.recent.is_empty() && state.last_action.is_empty() && state.last_session.is_empty())
        });

        let device_cutoff = now - Duration::seconds(self.config.device_window_secs as i64);
        self.devices.retain(|_, activity| {
            activity.devices.retain(|_, seen| *seen >= device_cutoff);
            !activity.devices.is_empty() || activity.suspicious_flags > 0
        });

        let dropped = before.saturating_sub(self.states.len());
        if dropped > 0 {
            debug!(dropped = dropped, remaining = self.states.len(), "Pruned idle cooldown state");
        }
        dropped
    }

    fn window_ms(&self, recent_actions: usize) -> u64 {
        if recent_actions > self.config.heavy_after {
            self.config.heavy_window_ms
        } else if recent_actions > self.config.elevated_after {
            self.config.elevated_window_ms
        } else {
            self.config.base_window_ms
        }
    }
}

impl Default for CooldownGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Milliseconds left before `window_ms` has passed since `last`.
fn remaining(last: DateTime<Utc>, now: DateTime<Utc>, window_ms: u64) -> u64 {
    let elapsed = (now - last).num_milliseconds().max(0) as u64;
    window_ms.saturating_sub(elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn ms(n: i64) -> Duration {
        Duration::milliseconds(n)
    }

    #[test]
    fn test_base_window() {
        let guard = CooldownGuard::new();
        let now = t0();

        guard.check_and_record_at("alice", "upvote", None, now).unwrap();
        let err = guard
            .check_and_record_at("alice", "upvote", None, now + ms(400))
            .unwrap_err();
        assert!(matches!(err, AgoraError::CooldownActive { remaining_ms: 600 }));

        // other action types and other users are unaffected
        guard.check_and_record_at("alice", "downvote", None, now + ms(400)).unwrap();
        guard.check_and_record_at("bob", "upvote", None, now + ms(400)).unwrap();

        guard.check_and_record_at("alice", "upvote", None, now + ms(1000)).unwrap();
    }

    #[test]
    fn test_failed_check_does_not_record() {
        let guard = CooldownGuard::new();
        let now = t0();

        guard.check_and_record_at("alice", "upvote", None, now).unwrap();
        assert!(guard.check_and_record_at("alice", "upvote", None, now + ms(900)).is_err());
        assert_eq!(guard.recent_action_count_at("alice", now + ms(900)), 1);
        guard.check_and_record_at("alice", "upvote", None, now + ms(1000)).unwrap();
    }

    #[test]
    fn test_session_spacing_across_action_types() {
        let guard = CooldownGuard::new();
        let now = t0();

        guard.check_and_record_at("alice", "upvote", Some("tab-1"), now).unwrap();
        let err = guard
            .check_and_record_at("alice", "downvote", Some("tab-1"), now + ms(200))
            .unwrap_err();
        assert!(matches!(err, AgoraError::CooldownActive { remaining_ms: 300 }));

        // a different session is not throttled by tab-1
        guard.check_and_record_at("alice", "downvote", Some("tab-2"), now + ms(200)).unwrap();
        guard.check_and_record_at("alice", "pin", Some("tab-1"), now + ms(500)).unwrap();
    }

    #[test]
    fn test_window_escalates_with_activity() {
        let guard = CooldownGuard::new();
        let now = t0();

        for i in 0..11 {
            guard
                .check_and_record_at("busy", &format!("action-{}", i), None, now)
                .unwrap();
        }
        // 11 recent actions: the 5s window applies
        let err = guard
            .check_and_record_at("busy", "action-0", None, now + ms(2000))
            .unwrap_err();
        assert!(matches!(err, AgoraError::CooldownActive { remaining_ms: 3000 }));

        for i in 11..21 {
            guard
                .check_and_record_at("busy", &format!("action-{}", i), None, now)
                .unwrap();
        }
        // 21 recent actions: the 30s window applies
        let err = guard
            .check_and_record_at("busy", "action-0", None, now + ms(10_000))
            .unwrap_err();
        assert!(matches!(err, AgoraError::CooldownActive { remaining_ms: 20_000 }));
    }

    #[test]
    fn test_recent_actions_expire() {
        let guard = CooldownGuard::new();
        let now = t0();

        for i in 0..15 {
            guard
                .check_and_record_at("busy", &format!("action-{}", i), None, now)
                .unwrap();
        }
        // after the recent window, the base window applies again
        let later = now + Duration::seconds(301);
        guard.check_and_record_at("busy", "action-0", None, later).unwrap();
        assert_eq!(guard.recent_action_count_at("busy", later), 1);
    }

    #[test]
    fn test_reset_clears_state() {
        let guard = CooldownGuard::new();
        let now = t0();

        guard.check_and_record_at("alice", "upvote", Some("s"), now).unwrap();
        assert!(guard.reset_cooldowns("alice", "support ticket"));
        guard.check_and_record_at("alice", "upvote", Some("s"), now + ms(1)).unwrap();
        assert!(!guard.reset_cooldowns("nobody", "noop"));
    }

    #[test]
    fn test_global_floor_across_devices() {
        let guard = CooldownGuard::new();
        let now = t0();

        guard.check_global_cooldown_at("alice", "phone", now).unwrap();
        let err = guard
            .check_global_cooldown_at("alice", "laptop", now + ms(100))
            .unwrap_err();
        assert!(matches!(err, AgoraError::CooldownActive { remaining_ms: 400 }));
        guard.check_global_cooldown_at("alice", "laptop", now + ms(500)).unwrap();
    }

    #[test]
    fn test_suspicious_device_counter_is_monotonic() {
        let guard = CooldownGuard::new();
        let mut now = t0();

        for device in ["d1", "d2", "d3"] {
            let status = guard.check_global_cooldown_at("alice", device, now).unwrap();
            assert_eq!(status.suspicious_flags, 0);
            now += ms(600);
        }

        let status = guard.check_global_cooldown_at("alice", "d4", now).unwrap();
        assert_eq!(status.distinct_devices, 4);
        assert_eq!(status.suspicious_flags, 1);

        now += ms(600);
        let status = guard.check_global_cooldown_at("alice", "d1", now).unwrap();
        assert_eq!(status.suspicious_flags, 2);

        // flags survive a reset and pruning
        guard.reset_cooldowns("alice", "admin override");
        guard.prune_at(now + Duration::hours(2));
        assert_eq!(guard.suspicious_flags("alice"), 2);
    }

    #[test]
    fn test_prune_drops_idle_users() {
        let guard = CooldownGuard::new();
        let now = t0();

        guard.check_and_record_at("alice", "upvote", Some("s"), now).unwrap();
        assert_eq!(guard.prune_at(now + Duration::seconds(10)), 0);
        assert_eq!(guard.recent_action_count_at("alice", now + Duration::seconds(10)), 1);

        assert_eq!(guard.prune_at(now + Duration::seconds(400)), 1);
        assert_eq!(guard.recent_action_count_at("alice", now + Duration::seconds(400)), 0);
        assert!(guard.states.get("alice").is_none());
    }

    #[test]
    fn test_recent_count_ignores_expired_actions() {
        let guard = CooldownGuard::new();
        let now = t0();

        guard.check_and_record_at("alice", "upvote", None, now).unwrap();
        assert_eq!(guard.recent_action_count_at("alice", now), 1);
        // no prune has run, the stale action still must not count
        assert_eq!(guard.recent_action_count_at("alice", now + Duration::days(30)), 0);
    }

    #[test]
    fn test_prune_releases_idle_users() {
        let guard = CooldownGuard::new();
        let then = t0();

        for i in 0..1000 {
            guard
                .check_and_record_at(&format!("u{}", i), "upvote", Some("s"), then)
                .unwrap();
        }
        assert_eq!(guard.tracked_users(), 1000);

        assert_eq!(guard.prune_at(then + Duration::days(30)), 1000);
        assert_eq!(guard.tracked_users(), 0);
    }

    #[test]
    fn test_concurrent_checks_admit_one() {
        use std::sync::Arc;

        let guard = Arc::new(CooldownGuard::new());
        let now = t0();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let guard = Arc::clone(&guard);
                std::thread::spawn(move || guard.check_and_record_at("alice", "upvote", None, now).is_ok())
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 1);
    }
}
