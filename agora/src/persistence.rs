//! Snapshot port for channel state.
//!
//! The engine keeps all state in memory. A [`PersistencePort`] receives a
//! [`ChannelSnapshot`] after each decay sweep and on shutdown, and is asked
//! for one when a channel is initialized.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ChannelGovernanceConfig;

/// Errors from a persistence backend.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Snapshot encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Durable state of one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub channel_id: String,
    pub config: ChannelGovernanceConfig,
    /// Raw scores; percentiles are recomputed on load
    pub scores: BTreeMap<String, i64>,
    pub saved_at: DateTime<Utc>,
}

/// Storage backend for channel snapshots.
#[async_trait]
pub trait PersistencePort: Send + Sync {
    /// Load the last snapshot of a channel, if any.
    async fn load_channel(&self, channel_id: &str) -> Result<Option<ChannelSnapshot>, PersistenceError>;

    /// Store a snapshot, replacing the previous one.
    async fn save_channel(&self, snapshot: &ChannelSnapshot) -> Result<(), PersistenceError>;
}

/// Port that stores nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPersistence;

#[async_trait]
impl PersistencePort for NoopPersistence {
    async fn load_channel(&self, _channel_id: &str) -> Result<Option<ChannelSnapshot>, PersistenceError> {
        Ok(None)
    }

    async fn save_channel(&self, _snapshot: &ChannelSnapshot) -> Result<(), PersistenceError> {
        Ok(())
    }
}

/// In-process store holding snapshots as JSON.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: DashMap<String, String>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored channels.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Store a snapshot without going through the async port.
    pub fn insert(&self, snapshot: &ChannelSnapshot) -> Result<(), PersistenceError> {
        let json = serde_json::to_string(snapshot)?;
        self.snapshots.insert(snapshot.channel_id.clone(), json);
        Ok(())
    }

    /// Read a snapshot without going through the async port.
    pub fn get(&self, channel_id: &str) -> Result<Option<ChannelSnapshot>, PersistenceError> {
        self.snapshots
            .get(channel_id)
            .map(|json| serde_json::from_str(json.value()))
            .transpose()
            .map_err(PersistenceError::from)
    }
}

#[async_trait]
impl PersistencePort for MemorySnapshotStore {
    async fn load_channel(&self, channel_id: &str) -> Result<Option<ChannelSnapshot>, PersistenceError> {
        self.get(channel_id)
    }

    async fn save_channel(&self, snapshot: &ChannelSnapshot) -> Result<(), PersistenceError> {
        self.insert(snapshot)?;
        debug!(
            channel_id = %snapshot.channel_id,
            users = snapshot.scores.len(),
            "Snapshot saved"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> ChannelSnapshot {
        ChannelSnapshot {
            channel_id: "general".to_string(),
            config: ChannelGovernanceConfig::default(),
            scores: BTreeMap::from([("alice".to_string(), 4), ("bob".to_string(), -2)]),
            saved_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemorySnapshotStore::new();
        assert!(store.load_channel("general").await.unwrap().is_none());

        let snap = snapshot();
        store.save_channel(&snap).await.unwrap();
        assert_eq!(store.load_channel("general").await.unwrap(), Some(snap));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_noop_loads_nothing() {
        let port = NoopPersistence;
        port.save_channel(&snapshot()).await.unwrap();
        assert!(port.load_channel("general").await.unwrap().is_none());
    }
}
