//! Periodic reputation decay.
//!
//! ## Overview
//!
//! Scores shrink toward zero over time so that reputation reflects recent
//! participation. On every tick the scheduler asks the engine to multiply
//! every score in every channel by the decay factor. Each channel is decayed
//! under its own lock, so a sweep never interleaves with a vote.
//!
//! The same task drops idle cooldown state on a second, shorter interval.
//!
//! ## Shutdown
//!
//! `stop()` sends on a shutdown channel and waits for the task. A sweep that
//! has already started runs to completion first.

use std::sync::Weak;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::DecayConfig;
use crate::engine::Agora;
use crate::types::{AgoraError, Result};

/// Summary of one decay sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecayReport {
    pub factor: f64,
    /// Channels with at least one scored user
    pub channels: usize,
    /// Users whose score was decayed
    pub users: usize,
}

/// Reject factors outside (0, 1].
pub fn validate_decay_factor(factor: f64) -> Result<()> {
    if factor > 0.0 && factor <= 1.0 {
        Ok(())
    } else {
        Err(AgoraError::InvalidParameter(format!(
            "decay factor must be in (0, 1], got {}",
            factor
        )))
    }
}

/// Background task that decays scores on a fixed interval.
pub struct DecayScheduler {
    factor: f64,
    interval: Duration,
    prune_interval: Duration,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl DecayScheduler {
    /// Create a scheduler from config.
    pub fn new(config: &DecayConfig) -> Self {
        Self::with_interval(config.factor, Duration::from_secs(config.interval_secs))
    }

    /// Create a scheduler with an explicit interval.
    pub fn with_interval(factor: f64, interval: Duration) -> Self {
        Self {
            factor,
            interval,
            prune_interval: Duration::from_secs(300),
            shutdown_tx: None,
            handle: None,
        }
    }

    /// Set how often idle cooldown state is pruned.
    pub fn prune_every(mut self, prune_interval: Duration) -> Self {
        self.prune_interval = prune_interval;
        self
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Start ticking. Starting a running scheduler does nothing.
    pub fn start(&mut self, agora: Weak<Agora>) -> Result<()> {
        validate_decay_factor(self.factor)?;
        if self.interval.is_zero() || self.prune_interval.is_zero() {
            return Err(AgoraError::InvalidParameter(
                "scheduler intervals must be positive".into(),
            ));
        }
        if self.is_running() {
            return Ok(());
        }

        info!(
            factor = self.factor,
            interval_secs = self.interval.as_secs_f64(),
            "Starting decay scheduler"
        );

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let factor = self.factor;
        let interval = self.interval;
        let prune_interval = self.prune_interval;

        self.shutdown_tx = Some(shutdown_tx);
        self.handle = Some(tokio::spawn(async move {
            run_decay_loop(agora, factor, interval, prune_interval, shutdown_rx).await;
        }));
        Ok(())
    }

    /// Signal shutdown and wait for the task to finish.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            info!("Stopping decay scheduler");
            if let Err(e) = handle.await {
                error!(error = %e, "Decay task ended abnormally");
            }
        }
    }
}

async fn run_decay_loop(
    agora: Weak<Agora>,
    factor: f64,
    interval: Duration,
    prune_interval: Duration,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    let mut prune_ticker = tokio::time::interval(prune_interval);
    // The first tick completes immediately
    ticker.tick().await;
    prune_ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(agora) = agora.upgrade() else {
                    debug!("Engine dropped, decay loop exiting");
                    break;
                };
                match agora.apply_decay(factor).await {
                    Ok(report) => debug!(
                        channels = report.channels,
                        users = report.users,
                        "Decay tick complete"
                    ),
                    Err(e) => error!(error = %e, "Decay sweep failed"),
                }
            }
            _ = prune_ticker.tick() => {
                let Some(agora) = agora.upgrade() else {
                    debug!("Engine dropped, decay loop exiting");
                    break;
                };
                agora.prune_cooldowns();
            }
            _ = shutdown_rx.recv() => {
                info!("Decay scheduler shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factor_bounds() {
        assert!(validate_decay_factor(0.8).is_ok());
        assert!(validate_decay_factor(1.0).is_ok());
        assert!(validate_decay_factor(0.0).is_err());
        assert!(validate_decay_factor(1.2).is_err());
        assert!(validate_decay_factor(f64::NAN).is_err());
    }

    #[tokio::test]
    async fn test_start_rejects_bad_factor() {
        let mut scheduler = DecayScheduler::with_interval(1.5, Duration::from_millis(10));
        assert!(scheduler.start(Weak::new()).is_err());
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn test_loop_exits_when_engine_dropped() {
        let mut scheduler = DecayScheduler::with_interval(0.8, Duration::from_millis(10));
        scheduler.start(Weak::new()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!scheduler.is_running());
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_start_rejects_zero_prune_interval() {
        let mut scheduler = DecayScheduler::with_interval(0.8, Duration::from_millis(10))
            .prune_every(Duration::ZERO);
        assert!(scheduler.start(Weak::new()).is_err());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let mut scheduler = DecayScheduler::new(&DecayConfig::default());
        scheduler.start(Weak::new()).unwrap();
        assert!(scheduler.is_running());
        scheduler.stop().await;
        scheduler.stop().await;
        assert!(!scheduler.is_running());
    }
}
