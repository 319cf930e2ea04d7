//! Broker Network Protocol
//!
//! Endpoint paths and DTOs for the broker's client-facing HTTP surface, plus
//! the on-disk shape of the broker snapshot.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// --- API Endpoints ---

/// Node registration (nodes POST here at startup).
pub const ENDPOINT_REGISTER: &str = "/register";
/// Routed write: picks the least-loaded store.
pub const ENDPOINT_SET: &str = "/set";
/// Routed read: scans stores in ring order.
pub const ENDPOINT_GET: &str = "/get";
/// Aggregated dump across every live store.
pub const ENDPOINT_GET_ALL: &str = "/getall";
/// Routed delete: locates the owner, then deletes.
pub const ENDPOINT_DELETE: &str = "/delete";
/// Registered store names.
pub const ENDPOINT_LIST_STORES: &str = "/stores/list";
/// Fires a snapshot request at every store.
pub const ENDPOINT_SNAPSHOT_MANUAL: &str = "/kvstore/snapshot/manual";
/// Starts one store's periodic snapshot task.
pub const ENDPOINT_SNAPSHOT_PERIODIC: &str = "/kvstore/snapshot/periodic";
/// Broker stats for dashboards.
pub const ENDPOINT_STATS: &str = "/health/stats";

// --- Data Transfer Objects ---

/// Registration payload a node sends at startup.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub ip_address: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetKeyRequest {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteKeyRequest {
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub struct GetKeyQuery {
    pub key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetKeyResponse {
    pub message: String,
    pub value: String,
}

/// Enables the periodic snapshot task on one store.
#[derive(Debug, Serialize, Deserialize)]
pub struct PeriodicSnapshotRequest {
    pub storename: String,
    /// Tick interval in seconds.
    pub interval: u64,
}

/// Per-store outcome of a manual snapshot fanout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotResult {
    pub store: String,
    pub ok: bool,
}

/// On-disk broker snapshot: only the per-store load counters survive a
/// restart; the store map is rebuilt from registrations.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct BrokerSnapshotFile {
    pub stores: HashMap<String, u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BrokerStatsResponse {
    pub stores: usize,
    pub names: Vec<String>,
    pub loads: HashMap<String, u64>,
    pub cpu_usage: f32,
    pub mem_used_mb: u64,
    pub mem_total_mb: u64,
}
