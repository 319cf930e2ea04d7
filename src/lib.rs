//! Sharded In-Memory KV Cluster Library
//!
//! This library crate defines the components of a small sharded key-value
//! service with asynchronous durability and best-effort fault tolerance.
//!
//! ## Architecture Modules
//! - **`broker`**: the singleton routing layer. Places writes on the least
//!   loaded store, scans stores for reads, maintains the circular peer ring,
//!   and repairs the ring when a store stops answering.
//! - **`kvstore`**: one shard-owning node. Serves its slice of the data,
//!   snapshots itself periodically, and pulls backup copies of its ring
//!   successor so it can take over when that successor dies.
//! - **`common`**: the error taxonomy and snapshot path configuration shared
//!   by both binaries.

pub mod broker;
pub mod common;
pub mod kvstore;
