//! Snapshot location configuration.
//!
//! Every snapshot file the system writes lives under one configurable root
//! (`SNAPSHOT_DIR`, default `./data`): node snapshots and peer backups under
//! `<root>/kvstore/`, the broker's load snapshot under `<root>/broker/`.

use std::path::{Path, PathBuf};

const SNAPSHOT_DIR_ENV: &str = "SNAPSHOT_DIR";
const DEFAULT_ROOT: &str = "./data";

#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    root: PathBuf,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ROOT),
        }
    }
}

impl SnapshotConfig {
    /// Reads the snapshot root from `SNAPSHOT_DIR`, falling back to `./data`.
    pub fn from_env() -> Self {
        match std::env::var(SNAPSHOT_DIR_ENV) {
            Ok(dir) if !dir.is_empty() => Self::with_root(dir),
            _ => Self::default(),
        }
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding per-node snapshot files.
    pub fn store_dir(&self) -> PathBuf {
        self.root.join("kvstore")
    }

    /// `<root>/kvstore/<name>.snapshot.json`
    pub fn store_snapshot(&self, name: &str) -> PathBuf {
        self.store_dir().join(format!("{}.snapshot.json", name))
    }

    /// `<root>/kvstore/peerof<name>.snapshot.json`
    pub fn peer_backup(&self, name: &str) -> PathBuf {
        self.store_dir().join(format!("peerof{}.snapshot.json", name))
    }

    /// `<root>/broker/broker_snapshot.json`
    pub fn broker_snapshot(&self) -> PathBuf {
        self.root.join("broker").join("broker_snapshot.json")
    }
}

/// Creates the parent directory of a snapshot path if it is missing.
pub fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}
