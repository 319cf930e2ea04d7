//! In-memory KV shard with snapshotting and peer replication.
//!
//! One `KvStore` owns one shard: a string map, the address of its successor
//! in the ring (assigned by the broker), and a background task that
//! periodically pulls the successor's data into a backup file and writes the
//! node's own snapshot.

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use super::protocol::ENDPOINT_PEER_BACKUP;
use crate::common::{ensure_parent_dir, Error, Result, SnapshotConfig};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const PULL_ATTEMPTS: usize = 3;

/// Everything the node lock guards: the shard data and the successor
/// address move together.
#[derive(Default)]
struct StoreState {
    data: HashMap<String, String>,
    successor: Option<String>,
}

pub struct KvStore {
    name: String,
    address: String,
    state: RwLock<StoreState>,
    snapshot_task: Mutex<Option<JoinHandle<()>>>,
    http_client: reqwest::Client,
    config: SnapshotConfig,
}

impl KvStore {
    pub fn new(name: &str, address: &str, config: SnapshotConfig) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            address: address.to_string(),
            state: RwLock::new(StoreState::default()),
            snapshot_task: Mutex::new(None),
            http_client: reqwest::Client::new(),
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Inserts or updates a pair. Empty keys are rejected.
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        if key.is_empty() {
            return Err(Error::ClientError("key cannot be empty".to_string()));
        }
        let mut state = self.state.write().await;
        state.data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<String> {
        let state = self.state.read().await;
        state
            .data
            .get(key)
            .cloned()
            .ok_or_else(|| Error::KeyNotFound(key.to_string()))
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .data
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| Error::KeyNotFound(key.to_string()))
    }

    /// Returns a copy of the whole shard, detached from later mutations.
    pub async fn get_all(&self) -> HashMap<String, String> {
        self.state.read().await.data.clone()
    }

    pub async fn key_count(&self) -> usize {
        self.state.read().await.data.len()
    }

    /// Records the successor address pushed by the broker.
    pub async fn set_successor(&self, address: &str) {
        let mut state = self.state.write().await;
        state.successor = Some(address.to_string());
        tracing::info!("store {}: successor is now {}", self.name, address);
    }

    pub async fn successor(&self) -> Option<String> {
        self.state.read().await.successor.clone()
    }

    /// Writes `<name>.snapshot.json` (create/truncate, full encode). The
    /// read-lock is held across the write so the file never mixes two
    /// versions of the shard.
    pub async fn save_snapshot(&self) -> Result<()> {
        let state = self.state.read().await;
        let path = self.config.store_snapshot(&self.name);
        ensure_parent_dir(&path)?;
        let encoded = serde_json::to_string(&state.data)?;
        fs::write(&path, encoded)?;
        tracing::info!("store {}: snapshot saved to {}", self.name, path.display());
        Ok(())
    }

    /// Replaces the shard with the contents of a snapshot file from the node
    /// snapshot directory. A missing file is not an error: the shard is left
    /// as it was (empty on a fresh node).
    pub async fn load_snapshot(&self, filename: &str) -> Result<()> {
        let path = self.config.store_dir().join(filename);
        if !path.exists() {
            tracing::info!(
                "store {}: snapshot file {} does not exist, starting empty",
                self.name,
                path.display()
            );
            return Ok(());
        }
        let raw = fs::read_to_string(&path)?;
        let data: HashMap<String, String> = serde_json::from_str(&raw)?;

        let mut state = self.state.write().await;
        state.data = data;
        tracing::info!("store {}: data loaded from {}", self.name, path.display());
        Ok(())
    }

    /// Merges the pulled peer backup (`peerof<name>.snapshot.json`) into the
    /// shard; backup values win on key collisions. A missing backup means
    /// there is nothing to merge.
    pub async fn load_and_merge_backup(&self) -> Result<()> {
        let path = self.config.peer_backup(&self.name);
        if !path.exists() {
            tracing::info!("store {}: no peer backup to merge", self.name);
            return Ok(());
        }
        let raw = fs::read_to_string(&path)?;
        let backup: HashMap<String, String> = serde_json::from_str(&raw)?;

        let mut state = self.state.write().await;
        let merged = backup.len();
        state.data.extend(backup);
        tracing::info!(
            "store {}: merged {} entries from peer backup",
            self.name,
            merged
        );
        Ok(())
    }

    /// Pulls the successor's full shard and writes it to the peer backup
    /// file. A no-op when no successor is assigned.
    pub async fn pull_peer_backup(&self) -> Result<()> {
        let successor = { self.state.read().await.successor.clone() };
        let Some(peer) = successor else {
            return Ok(());
        };

        let url = format!("http://{}{}", peer, ENDPOINT_PEER_BACKUP);
        let response = self
            .get_with_retry(&url, REQUEST_TIMEOUT, PULL_ATTEMPTS)
            .await?;
        if !response.status().is_success() {
            return Err(Error::UnexpectedStatus {
                store: peer,
                status: response.status().as_u16(),
            });
        }
        let data: HashMap<String, String> = response
            .json()
            .await
            .map_err(|e| Error::Other(format!("failed to decode peer backup: {}", e)))?;

        let path = self.config.peer_backup(&self.name);
        ensure_parent_dir(&path)?;
        fs::write(&path, serde_json::to_string(&data)?)?;
        tracing::info!(
            "store {}: pulled {} entries from peer {} into {}",
            self.name,
            data.len(),
            peer,
            path.display()
        );
        Ok(())
    }

    /// Spawns the periodic snapshot task. A repeated call replaces the
    /// running task so an operator can change the interval without leaking
    /// loops.
    pub async fn start_periodic_snapshots(self: Arc<Self>, interval: Duration) {
        let store = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; the first snapshot
            // should wait a full interval.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if store.successor().await.is_some() {
                    if let Err(e) = store.pull_peer_backup().await {
                        tracing::warn!("store {}: peer backup pull failed: {}", store.name, e);
                    }
                }
                if let Err(e) = store.save_snapshot().await {
                    tracing::warn!("store {}: periodic snapshot failed: {}", store.name, e);
                }
            }
        });

        let mut task = self.snapshot_task.lock().await;
        if let Some(old) = task.replace(handle) {
            old.abort();
            tracing::info!("store {}: restarted periodic snapshot task", self.name);
        } else {
            tracing::info!(
                "store {}: periodic snapshots every {:?}",
                self.name,
                interval
            );
        }
    }

    /// Aborts the periodic snapshot task if one is running.
    pub async fn stop_periodic_snapshots(&self) {
        let mut task = self.snapshot_task.lock().await;
        if let Some(handle) = task.take() {
            handle.abort();
            tracing::info!("store {}: periodic snapshot task stopped", self.name);
        }
    }

    async fn get_with_retry(
        &self,
        url: &str,
        timeout: Duration,
        attempts: usize,
    ) -> Result<reqwest::Response> {
        let mut delay_ms = 150u64;

        for attempt in 0..attempts {
            match self.http_client.get(url).timeout(timeout).send().await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if attempt + 1 == attempts {
                        return Err(Error::NodeUnreachable {
                            name: url.to_string(),
                            detail: e.to_string(),
                        });
                    }
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(Error::Other("retry attempts exhausted".to_string()))
    }
}
