//! KV-Store Node Network Protocol
//!
//! Endpoint paths and DTOs for the node's HTTP surface. The broker and peer
//! nodes build their requests from these constants, so the two sides of every
//! wire message share one definition.

use serde::{Deserialize, Serialize};

// --- API Endpoints ---

/// Public write endpoint (broker-forwarded).
pub const ENDPOINT_SET: &str = "/set";
/// Public read endpoint (broker-forwarded).
pub const ENDPOINT_GET: &str = "/get";
/// Routed delete (broker-forwarded after locating the owner).
pub const ENDPOINT_DELETE: &str = "/delete";
/// Full dump of this node's shard.
pub const ENDPOINT_GET_ALL: &str = "/getall";
/// Identity probe.
pub const ENDPOINT_NAME: &str = "/name";
/// Broker tells this node who its successor is.
pub const ENDPOINT_NOTIFY: &str = "/notify";
/// Broker tells this node its successor died; the node merges its backup.
pub const ENDPOINT_PEER_DEAD: &str = "/peer-dead";
/// Predecessor pulls a copy of this node's data from here.
pub const ENDPOINT_PEER_BACKUP: &str = "/peer-backup";
/// Writes the node's own snapshot file.
pub const ENDPOINT_SAVE: &str = "/save";
/// Replaces the node's data from a snapshot file.
pub const ENDPOINT_LOAD: &str = "/load";
/// Spawns the periodic snapshot task.
pub const ENDPOINT_START_SNAPSHOTS: &str = "/start-snapshots";
/// Node stats for dashboards.
pub const ENDPOINT_STATS: &str = "/health/stats";

// --- Data Transfer Objects ---

#[derive(Debug, Serialize, Deserialize)]
pub struct SetRequest {
    pub key: String,
    pub value: String,
}

/// Echo of a stored or fetched pair.
#[derive(Debug, Serialize, Deserialize)]
pub struct KeyValueResponse {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct GetQuery {
    pub key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub key: String,
}

/// Successor assignment pushed by the broker after every ring change.
#[derive(Debug, Serialize, Deserialize)]
pub struct NotifyRequest {
    pub peer_ip: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AckResponse {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

/// Snapshot file to restore, relative to the node snapshot directory.
#[derive(Debug, Serialize, Deserialize)]
pub struct LoadRequest {
    pub filename: String,
}

#[derive(Debug, Deserialize)]
pub struct SnapshotIntervalQuery {
    /// Tick interval in seconds.
    pub interval: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NameResponse {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeStatsResponse {
    pub name: String,
    pub keys: usize,
    pub successor: Option<String>,
    pub cpu_usage: f32,
    pub mem_used_mb: u64,
    pub mem_total_mb: u64,
}
