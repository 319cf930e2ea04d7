//! Broker core: registration, routing, failure takeover, snapshots.
//!
//! The broker owns one guarded `BrokerState` (store map, load counters, peer
//! ring); the three structures always change together under the write lock.
//! Outbound HTTP happens with the lock released, and the lock is re-acquired
//! for load updates and ring surgery.

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use super::protocol::{BrokerSnapshotFile, SnapshotResult};
use super::ring::PeerRing;
use crate::common::{ensure_parent_dir, Error, Result, SnapshotConfig};
use crate::kvstore::protocol as node_api;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Identity of a registered store. Immutable after registration.
#[derive(Debug, Clone)]
pub struct StoreDescriptor {
    pub name: String,
    pub address: String,
}

#[derive(Default)]
struct BrokerState {
    stores: HashMap<String, StoreDescriptor>,
    loads: HashMap<String, u64>,
    /// Load counters restored from the broker snapshot for names that have
    /// not re-registered yet; applied when that name registers.
    parked_loads: HashMap<String, u64>,
    ring: PeerRing,
}

pub struct Broker {
    state: RwLock<BrokerState>,
    http_client: reqwest::Client,
    config: SnapshotConfig,
}

impl Broker {
    pub fn new(config: SnapshotConfig) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(BrokerState::default()),
            http_client: reqwest::Client::new(),
            config,
        })
    }

    /// Registers a store: descriptor + load counter + ring tail, then
    /// re-notifies every node of its successor.
    pub async fn register_store(&self, name: &str, address: &str) -> Result<()> {
        let pairs = {
            let mut state = self.state.write().await;
            if state.stores.contains_key(name) {
                return Err(Error::StoreExists(name.to_string()));
            }
            if address.is_empty() {
                return Err(Error::ClientError("invalid IP address".to_string()));
            }

            state.stores.insert(
                name.to_string(),
                StoreDescriptor {
                    name: name.to_string(),
                    address: address.to_string(),
                },
            );
            let initial_load = state.parked_loads.remove(name).unwrap_or(0);
            state.loads.insert(name.to_string(), initial_load);
            state.ring.add_tail(name, address);

            tracing::info!(
                "registered store {} at {} (ring size {})",
                name,
                address,
                state.ring.len()
            );
            state.ring.successor_pairs()
        };

        self.notify_ring(pairs).await;
        self.persist_snapshot().await;
        Ok(())
    }

    /// Routes a write to the least-loaded store, evicting and retrying on
    /// transport failure until a store accepts or none remain.
    pub async fn set_key(&self, key: &str, value: &str) -> Result<()> {
        if key.is_empty() {
            return Err(Error::ClientError("key cannot be empty".to_string()));
        }

        loop {
            let target = self.least_loaded_store().await?;

            let url = format!("http://{}{}", target.address, node_api::ENDPOINT_SET);
            let payload = node_api::SetRequest {
                key: key.to_string(),
                value: value.to_string(),
            };
            let response = self
                .http_client
                .post(&url)
                .json(&payload)
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await;

            match response {
                Err(e) => {
                    tracing::warn!("store {} unreachable during set: {}", target.name, e);
                    self.takeover(&target.name).await;
                }
                Ok(response) if response.status().is_success() => {
                    let mut state = self.state.write().await;
                    if let Some(load) = state.loads.get_mut(&target.name) {
                        *load += 1;
                    }
                    tracing::debug!("key {} set on store {}", key, target.name);
                    return Ok(());
                }
                Ok(response) => {
                    return Err(Error::UnexpectedStatus {
                        store: target.name,
                        status: response.status().as_u16(),
                    });
                }
            }
        }
    }

    /// Scans stores in ring order until one answers the key. Unreachable
    /// stores are taken over mid-scan and skipped.
    pub async fn get_key(&self, key: &str) -> Result<String> {
        let targets = self.ring_order_stores().await;

        for target in targets {
            if !self.store_exists(&target.name).await {
                continue;
            }
            let url = format!("http://{}{}", target.address, node_api::ENDPOINT_GET);
            let response = self
                .http_client
                .get(&url)
                .query(&[("key", key)])
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await;

            match response {
                Err(e) => {
                    tracing::warn!("store {} unreachable during get: {}", target.name, e);
                    self.takeover(&target.name).await;
                }
                Ok(response) if response.status() == reqwest::StatusCode::NOT_FOUND => continue,
                Ok(response) if response.status().is_success() => {
                    match response.json::<node_api::KeyValueResponse>().await {
                        Ok(body) => {
                            tracing::debug!("key {} found on store {}", key, target.name);
                            return Ok(body.value);
                        }
                        Err(e) => {
                            tracing::warn!("bad get response from store {}: {}", target.name, e);
                        }
                    }
                }
                Ok(response) => {
                    tracing::warn!(
                        "store {} answered get with status {}",
                        target.name,
                        response.status()
                    );
                }
            }
        }

        Err(Error::KeyNotFound(key.to_string()))
    }

    /// Locates the store holding the key via get probes, then deletes it
    /// there. The owning store's load counter is reset to zero on success.
    pub async fn delete_key(&self, key: &str) -> Result<()> {
        let owner = self.locate_key(key).await?;

        let url = format!("http://{}{}", owner.address, node_api::ENDPOINT_DELETE);
        let payload = node_api::DeleteRequest {
            key: key.to_string(),
        };
        let response = self
            .http_client
            .post(&url)
            .json(&payload)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await;

        match response {
            Err(e) => {
                tracing::warn!("store {} unreachable during delete: {}", owner.name, e);
                self.takeover(&owner.name).await;
                Err(Error::NodeUnreachable {
                    name: owner.name,
                    detail: e.to_string(),
                })
            }
            Ok(response) if response.status().is_success() => {
                {
                    let mut state = self.state.write().await;
                    if let Some(load) = state.loads.get_mut(&owner.name) {
                        *load = 0;
                    }
                }
                self.persist_snapshot().await;
                tracing::info!("key {} deleted from store {}", key, owner.name);
                Ok(())
            }
            Ok(response) if response.status() == reqwest::StatusCode::NOT_FOUND => {
                Err(Error::KeyNotFound(key.to_string()))
            }
            Ok(response) => Err(Error::UnexpectedStatus {
                store: owner.name,
                status: response.status().as_u16(),
            }),
        }
    }

    /// Collects every store's full shard and renders `Store, Key, Value`
    /// lines. Per-store failures are skipped.
    pub async fn get_all_data(&self) -> Vec<String> {
        let targets = self.ring_order_stores().await;
        let mut all_data = Vec::new();

        for target in targets {
            let url = format!("http://{}{}", target.address, node_api::ENDPOINT_GET_ALL);
            let response = self
                .http_client
                .get(&url)
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await;

            let response = match response {
                Ok(response) if response.status().is_success() => response,
                Ok(response) => {
                    tracing::warn!(
                        "store {} answered getall with status {}",
                        target.name,
                        response.status()
                    );
                    continue;
                }
                Err(e) => {
                    tracing::warn!("store {} unreachable during getall: {}", target.name, e);
                    continue;
                }
            };

            match response.json::<HashMap<String, String>>().await {
                Ok(data) => {
                    for (key, value) in data {
                        all_data.push(format!(
                            "Store: {}, Key: {}, Value: {}",
                            target.name, key, value
                        ));
                    }
                }
                Err(e) => {
                    tracing::warn!("bad getall response from store {}: {}", target.name, e);
                }
            }
        }

        all_data
    }

    pub async fn list_stores(&self) -> Vec<String> {
        let state = self.state.read().await;
        state.stores.keys().cloned().collect()
    }

    pub async fn store_exists(&self, name: &str) -> bool {
        self.state.read().await.stores.contains_key(name)
    }

    pub async fn get_store(&self, name: &str) -> Result<StoreDescriptor> {
        let state = self.state.read().await;
        state
            .stores
            .get(name)
            .cloned()
            .ok_or_else(|| Error::StoreNotFound(name.to_string()))
    }

    pub async fn loads(&self) -> HashMap<String, u64> {
        self.state.read().await.loads.clone()
    }

    /// Fires a snapshot request at every store; partial failures are
    /// reported, not fatal.
    pub async fn manual_snapshot_fanout(&self) -> Vec<SnapshotResult> {
        let targets = self.ring_order_stores().await;
        let mut results = Vec::with_capacity(targets.len());

        for target in targets {
            let url = format!("http://{}{}", target.address, node_api::ENDPOINT_SAVE);
            let ok = match self
                .http_client
                .post(&url)
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => true,
                Ok(response) => {
                    tracing::warn!(
                        "store {} answered snapshot request with status {}",
                        target.name,
                        response.status()
                    );
                    false
                }
                Err(e) => {
                    tracing::warn!("snapshot request to store {} failed: {}", target.name, e);
                    false
                }
            };
            results.push(SnapshotResult {
                store: target.name,
                ok,
            });
        }

        results
    }

    /// Tells one store to start its periodic snapshot task.
    pub async fn enable_periodic_snapshots(&self, storename: &str, interval_secs: u64) -> Result<()> {
        if interval_secs == 0 {
            return Err(Error::ClientError(
                "interval must be a positive number of seconds".to_string(),
            ));
        }
        let store = self.get_store(storename).await?;

        let url = format!(
            "http://{}{}",
            store.address,
            node_api::ENDPOINT_START_SNAPSHOTS
        );
        let response = self
            .http_client
            .get(&url)
            .query(&[("interval", interval_secs)])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| Error::NodeUnreachable {
                name: store.name.clone(),
                detail: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(Error::UnexpectedStatus {
                store: store.name,
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    /// Persists the load counters (live and parked) to the broker snapshot
    /// file.
    pub async fn save_broker_snapshot(&self) -> Result<()> {
        let snapshot = {
            let state = self.state.read().await;
            let mut stores = state.parked_loads.clone();
            stores.extend(state.loads.clone());
            BrokerSnapshotFile { stores }
        };

        let path = self.config.broker_snapshot();
        ensure_parent_dir(&path)?;
        fs::write(&path, serde_json::to_string(&snapshot)?)?;
        tracing::debug!("broker snapshot saved to {}", path.display());
        Ok(())
    }

    /// Restores load counters from the broker snapshot file. Counters for
    /// stores that are not registered yet are parked and applied at
    /// registration; a missing file is not an error.
    pub async fn load_broker_snapshot(&self) -> Result<()> {
        let path = self.config.broker_snapshot();
        if !path.exists() {
            tracing::info!("no broker snapshot at {}", path.display());
            return Ok(());
        }
        let raw = fs::read_to_string(&path)?;
        let snapshot: BrokerSnapshotFile = serde_json::from_str(&raw)?;

        let mut state = self.state.write().await;
        for (name, load) in snapshot.stores {
            if state.stores.contains_key(&name) {
                state.loads.insert(name, load);
            } else {
                state.parked_loads.insert(name, load);
            }
        }
        tracing::info!("broker snapshot loaded from {}", path.display());
        Ok(())
    }

    /// Failure handler for an unreachable store T: tell T's predecessor to
    /// merge its backup, evict T from all three structures, re-notify the
    /// ring.
    pub async fn takeover(&self, dead: &str) {
        let (predecessor, pairs) = {
            let mut state = self.state.write().await;
            if !state.stores.contains_key(dead) {
                // Another request already evicted this store.
                return;
            }
            let predecessor = state
                .ring
                .predecessor_of(dead)
                .map(|node| (node.name.clone(), node.address.clone()));

            state.stores.remove(dead);
            state.loads.remove(dead);
            if let Err(e) = state.ring.remove(dead) {
                tracing::warn!("ring eviction of {} failed: {}", dead, e);
            }
            tracing::info!("evicted dead store {} (ring size {})", dead, state.ring.len());
            (predecessor, state.ring.successor_pairs())
        };

        if let Some((pred_name, pred_address)) = predecessor {
            if pred_name != dead {
                self.notify_peer_dead(&pred_name, &pred_address).await;
            }
        }

        self.notify_ring(pairs).await;
        self.persist_snapshot().await;
    }

    pub(crate) async fn least_loaded_store(&self) -> Result<StoreDescriptor> {
        let state = self.state.read().await;
        let name = state
            .loads
            .iter()
            .min_by_key(|(_, load)| **load)
            .map(|(name, _)| name.clone())
            .ok_or(Error::NoStoresAvailable)?;
        Ok(state.stores[&name].clone())
    }

    async fn ring_order_stores(&self) -> Vec<StoreDescriptor> {
        let state = self.state.read().await;
        state
            .ring
            .traverse()
            .into_iter()
            .map(|node| StoreDescriptor {
                name: node.name.clone(),
                address: node.address.clone(),
            })
            .collect()
    }

    /// Probes stores in ring order for the key, returning the owner.
    async fn locate_key(&self, key: &str) -> Result<StoreDescriptor> {
        let targets = self.ring_order_stores().await;

        for target in targets {
            if !self.store_exists(&target.name).await {
                continue;
            }
            let url = format!("http://{}{}", target.address, node_api::ENDPOINT_GET);
            let response = self
                .http_client
                .get(&url)
                .query(&[("key", key)])
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await;

            match response {
                Err(e) => {
                    tracing::warn!("store {} unreachable during probe: {}", target.name, e);
                    self.takeover(&target.name).await;
                }
                Ok(response) if response.status().is_success() => return Ok(target),
                Ok(_) => continue,
            }
        }

        Err(Error::KeyNotFound(key.to_string()))
    }

    /// Sends each node its successor's address. Single-node rings have
    /// nothing to notify; per-message failures are logged and skipped.
    async fn notify_ring(&self, pairs: Vec<(String, String)>) {
        for (address, successor) in pairs {
            if address.is_empty() || successor.is_empty() {
                tracing::warn!(
                    "skipping peer notification with empty address: {} -> {}",
                    address,
                    successor
                );
                continue;
            }
            if address == successor {
                tracing::debug!("skipping self notification for {}", address);
                continue;
            }

            let url = format!("http://{}{}", address, node_api::ENDPOINT_NOTIFY);
            let payload = node_api::NotifyRequest {
                peer_ip: successor.clone(),
            };
            match self
                .http_client
                .post(&url)
                .json(&payload)
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => {
                    tracing::info!("notified {} about successor {}", address, successor);
                }
                Ok(response) => {
                    tracing::warn!(
                        "peer notification to {} answered status {}",
                        address,
                        response.status()
                    );
                }
                Err(e) => {
                    tracing::warn!("peer notification to {} failed: {}", address, e);
                }
            }
        }
    }

    async fn notify_peer_dead(&self, name: &str, address: &str) {
        let url = format!("http://{}{}", address, node_api::ENDPOINT_PEER_DEAD);
        match self
            .http_client
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                tracing::info!("store {} merged its peer backup", name);
            }
            Ok(response) => {
                tracing::warn!(
                    "peer-dead notification to {} answered status {}",
                    name,
                    response.status()
                );
            }
            Err(e) => {
                tracing::warn!("peer-dead notification to {} failed: {}", name, e);
            }
        }
    }

    async fn persist_snapshot(&self) {
        if let Err(e) = self.save_broker_snapshot().await {
            tracing::warn!("could not persist broker snapshot: {}", e);
        }
    }
}
