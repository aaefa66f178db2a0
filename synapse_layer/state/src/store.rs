// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

//! Exclusive owner of the replicated state.
//!
//! All mutations go through [`StateStore::with_write`], which runs the
//! mutation inside the single writer section and persists an atomic JSON
//! snapshot before releasing it. Components never hold references into the
//! state across suspension points; they submit closures and observe results.

use std::{path::PathBuf, sync::Arc};

use log::*;
use synapse_common_types::NodeId;
use tokio::sync::RwLock;

use crate::{
    error::StorageError,
    models::{NetworkConfig, NetworkState},
};

const LOG_TARGET: &str = "synapse::state::store";

const SNAPSHOT_FILE: &str = "state.json";

#[derive(Clone, Debug)]
pub struct StateStore {
    snapshot_path: PathBuf,
    inner: Arc<RwLock<NetworkState>>,
}

impl StateStore {
    /// Loads the snapshot under `data_dir/<node_id>/state.json`, or
    /// bootstraps fresh state with the given config defaults when no
    /// snapshot exists. A snapshot that exists but does not parse is a hard
    /// error; silently discarding state would be worse than refusing to
    /// start.
    pub fn initialize(
        data_dir: impl Into<PathBuf>,
        node_id: &NodeId,
        config: NetworkConfig,
    ) -> Result<Self, StorageError> {
        let dir = data_dir.into().join(node_id.as_str());
        std::fs::create_dir_all(&dir)?;
        let snapshot_path = dir.join(SNAPSHOT_FILE);

        let state = if snapshot_path.exists() {
            let raw = std::fs::read_to_string(&snapshot_path)?;
            let state = serde_json::from_str(&raw).map_err(StorageError::CorruptSnapshot)?;
            info!(target: LOG_TARGET, "Loaded state snapshot from {}", snapshot_path.display());
            state
        } else {
            info!(target: LOG_TARGET, "No snapshot found, bootstrapping fresh state");
            NetworkState::bootstrap(config)
        };

        Ok(Self {
            snapshot_path,
            inner: Arc::new(RwLock::new(state)),
        })
    }

    /// In-memory store for tests and simulations; never persists.
    pub fn in_memory(config: NetworkConfig) -> Self {
        Self {
            snapshot_path: PathBuf::new(),
            inner: Arc::new(RwLock::new(NetworkState::bootstrap(config))),
        }
    }

    pub fn snapshot_path(&self) -> &PathBuf {
        &self.snapshot_path
    }

    pub async fn with_read<F, R>(&self, f: F) -> R
    where F: FnOnce(&NetworkState) -> R {
        let guard = self.inner.read().await;
        f(&guard)
    }

    /// Runs `f` inside the exclusive write section and snapshots the
    /// resulting state before the section is released, so the on-disk
    /// snapshot is always the image of a completed mutation.
    pub async fn with_write<F, R>(&self, f: F) -> Result<R, StorageError>
    where F: FnOnce(&mut NetworkState) -> R {
        let mut guard = self.inner.write().await;
        let result = f(&mut guard);
        self.persist(&guard).await?;
        Ok(result)
    }

    async fn persist(&self, state: &NetworkState) -> Result<(), StorageError> {
        if self.snapshot_path.as_os_str().is_empty() {
            return Ok(());
        }
        let encoded = serde_json::to_vec_pretty(state).map_err(StorageError::Encode)?;

        // Transient I/O gets a short exponential backoff before surfacing
        let mut delay = std::time::Duration::from_millis(50);
        let mut attempt = 1;
        loop {
            match self.write_snapshot(&encoded).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < 3 => {
                    warn!(
                        target: LOG_TARGET,
                        "Snapshot write attempt {} failed, retrying in {:?}: {}", attempt, delay, e
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 4;
                    attempt += 1;
                },
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Write-to-temp plus rename keeps the snapshot atomic under crashes.
    async fn write_snapshot(&self, encoded: &[u8]) -> std::io::Result<()> {
        let tmp_path = self.snapshot_path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, encoded).await?;
        tokio::fs::rename(&tmp_path, &self.snapshot_path).await
    }
}

#[cfg(test)]
mod tests {
    use synapse_common_types::ChannelId;

    use super::*;

    fn node_id() -> NodeId {
        NodeId::new("deadbeef00")
    }

    #[tokio::test]
    async fn mutations_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::initialize(dir.path(), &node_id(), NetworkConfig::default()).unwrap();
        store
            .with_write(|state| {
                state.channel_entry(&ChannelId::new("dev")).treasury_balance = 42;
            })
            .await
            .unwrap();
        drop(store);

        let reloaded = StateStore::initialize(dir.path(), &node_id(), NetworkConfig::default()).unwrap();
        let treasury = reloaded
            .with_read(|state| state.channel(&ChannelId::new("dev")).unwrap().treasury_balance)
            .await;
        assert_eq!(treasury, 42);
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_a_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot_dir = dir.path().join(node_id().as_str());
        std::fs::create_dir_all(&snapshot_dir).unwrap();
        std::fs::write(snapshot_dir.join(SNAPSHOT_FILE), "{ not json").unwrap();

        let err = StateStore::initialize(dir.path(), &node_id(), NetworkConfig::default()).unwrap_err();
        assert!(matches!(err, StorageError::CorruptSnapshot(_)));
    }

    #[tokio::test]
    async fn fresh_state_applies_config_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = NetworkConfig::default();
        config.initial_balance_sp = 777;
        let store = StateStore::initialize(dir.path(), &node_id(), config).unwrap();
        let initial = store.with_read(|state| state.config.initial_balance_sp).await;
        assert_eq!(initial, 777);
    }

    #[tokio::test]
    async fn snapshot_file_is_valid_json_after_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::initialize(dir.path(), &node_id(), NetworkConfig::default()).unwrap();
        store.with_write(|_| {}).await.unwrap();
        let raw = std::fs::read_to_string(store.snapshot_path()).unwrap();
        let _: NetworkState = serde_json::from_str(&raw).unwrap();
    }
}
