//! End-to-end cluster scenarios.
//!
//! Each test stands up real kv-store nodes on ephemeral loopback ports,
//! registers them with a broker, and drives the broker API the way a client
//! would. Snapshots land in per-test temporary roots.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::task::JoinHandle;

use kvcluster::broker::service::Broker;
use kvcluster::common::SnapshotConfig;
use kvcluster::kvstore::handlers;
use kvcluster::kvstore::protocol::{KeyValueResponse, LoadRequest, SetRequest};
use kvcluster::kvstore::store::KvStore;

struct TestNode {
    store: Arc<KvStore>,
    address: String,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    server: JoinHandle<()>,
}

impl TestNode {
    async fn spawn(name: &str, root: &std::path::Path) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = format!("127.0.0.1:{}", listener.local_addr().unwrap().port());
        let store = KvStore::new(name, &address, SnapshotConfig::with_root(root));
        let app = handlers::router(store.clone());
        let (shutdown, rx) = tokio::sync::oneshot::channel();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = rx.await;
                })
                .await
                .unwrap();
        });
        Self {
            store,
            address,
            shutdown: Some(shutdown),
            server,
        }
    }

    /// Takes the node off the network: the server closes every connection
    /// and the port stops answering, like a crashed process.
    async fn kill(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        (&mut self.server).await.unwrap();
    }
}

async fn register(broker: &Broker, node: &TestNode) {
    broker
        .register_store(node.store.name(), &node.address)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_set_balances_across_stores() {
    let dir = TempDir::new().unwrap();
    let broker = Broker::new(SnapshotConfig::with_root(dir.path()));
    let a = TestNode::spawn("alpha", dir.path()).await;
    let b = TestNode::spawn("beta", dir.path()).await;
    register(&broker, &a).await;
    register(&broker, &b).await;

    broker.set_key("foo", "1").await.unwrap();
    broker.set_key("bar", "2").await.unwrap();

    // One write per store: the second set must pick the store still at
    // load zero.
    let loads = broker.loads().await;
    assert_eq!(loads["alpha"], 1);
    assert_eq!(loads["beta"], 1);
    assert_eq!(a.store.key_count().await, 1);
    assert_eq!(b.store.key_count().await, 1);

    assert_eq!(broker.get_key("foo").await.unwrap(), "1");
    assert_eq!(broker.get_key("bar").await.unwrap(), "2");
}

#[tokio::test]
async fn test_registration_notifies_ring_successors() {
    let dir = TempDir::new().unwrap();
    let broker = Broker::new(SnapshotConfig::with_root(dir.path()));
    let a = TestNode::spawn("alpha", dir.path()).await;
    let b = TestNode::spawn("beta", dir.path()).await;
    let c = TestNode::spawn("gamma", dir.path()).await;

    register(&broker, &a).await;
    // A single-node ring cannot notify itself.
    assert!(a.store.successor().await.is_none());

    register(&broker, &b).await;
    assert_eq!(a.store.successor().await.unwrap(), b.address);
    assert_eq!(b.store.successor().await.unwrap(), a.address);

    register(&broker, &c).await;
    assert_eq!(a.store.successor().await.unwrap(), b.address);
    assert_eq!(b.store.successor().await.unwrap(), c.address);
    assert_eq!(c.store.successor().await.unwrap(), a.address);
}

#[tokio::test]
async fn test_takeover_merges_backup_into_predecessor() {
    let dir = TempDir::new().unwrap();
    let broker = Broker::new(SnapshotConfig::with_root(dir.path()));
    let a = TestNode::spawn("alpha", dir.path()).await;
    let mut b = TestNode::spawn("beta", dir.path()).await;
    register(&broker, &a).await;
    register(&broker, &b).await;

    // Data that lives on beta, backed up by alpha's pull.
    b.store.set("bkey", "bval").await.unwrap();
    a.store.pull_peer_backup().await.unwrap();

    b.kill().await;

    // The scan reaches the dead store, evicts it, and tells alpha to merge
    // its backup. The merged key is visible from the next lookup on.
    let _ = broker.get_key("bkey").await;
    assert_eq!(broker.list_stores().await, vec!["alpha".to_string()]);
    assert_eq!(a.store.get("bkey").await.unwrap(), "bval");
    assert_eq!(broker.get_key("bkey").await.unwrap(), "bval");
}

#[tokio::test]
async fn test_snapshot_replay_over_http() {
    let dir = TempDir::new().unwrap();
    let client = reqwest::Client::new();
    let mut first = TestNode::spawn("nu", dir.path()).await;

    client
        .post(format!("http://{}/set", first.address))
        .json(&SetRequest {
            key: "x".to_string(),
            value: "1".to_string(),
        })
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap();
    client
        .post(format!("http://{}/save", first.address))
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap();
    first.kill().await;

    // A fresh process with the same name restores the shard from disk.
    let second = TestNode::spawn("nu", dir.path()).await;
    client
        .post(format!("http://{}/load", second.address))
        .json(&LoadRequest {
            filename: "nu.snapshot.json".to_string(),
        })
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap();

    let body: KeyValueResponse = client
        .get(format!("http://{}/get", second.address))
        .query(&[("key", "x")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body.value, "1");
}

#[tokio::test]
async fn test_periodic_pull_copies_successor_data() {
    let dir = TempDir::new().unwrap();
    let broker = Broker::new(SnapshotConfig::with_root(dir.path()));
    let a = TestNode::spawn("alpha", dir.path()).await;
    let b = TestNode::spawn("beta", dir.path()).await;
    register(&broker, &a).await;
    register(&broker, &b).await;

    b.store.set("k", "v").await.unwrap();
    a.store
        .clone()
        .start_periodic_snapshots(Duration::from_millis(50))
        .await;
    tokio::time::sleep(Duration::from_millis(400)).await;
    a.store.stop_periodic_snapshots().await;

    let backup_path = SnapshotConfig::with_root(dir.path()).peer_backup("alpha");
    let raw = std::fs::read_to_string(backup_path).unwrap();
    let backup: std::collections::HashMap<String, String> = serde_json::from_str(&raw).unwrap();
    assert_eq!(backup, b.store.get_all().await);

    // The tick also wrote alpha's own snapshot.
    let own_path = SnapshotConfig::with_root(dir.path()).store_snapshot("alpha");
    assert!(own_path.exists());
}

#[tokio::test]
async fn test_concurrent_sets_are_all_routed() {
    let dir = TempDir::new().unwrap();
    let broker = Broker::new(SnapshotConfig::with_root(dir.path()));
    let a = TestNode::spawn("alpha", dir.path()).await;
    let b = TestNode::spawn("beta", dir.path()).await;
    register(&broker, &a).await;
    register(&broker, &b).await;

    let mut writers = Vec::new();
    for i in 0..30 {
        let broker = broker.clone();
        writers.push(tokio::spawn(async move {
            broker
                .set_key(&format!("key-{}", i), &format!("value-{}", i))
                .await
                .unwrap();
        }));
    }
    for writer in writers {
        writer.await.unwrap();
    }

    let loads = broker.loads().await;
    assert_eq!(loads.values().sum::<u64>(), 30);

    for i in 0..30 {
        assert_eq!(
            broker.get_key(&format!("key-{}", i)).await.unwrap(),
            format!("value-{}", i)
        );
    }
}

#[tokio::test]
async fn test_get_all_lists_store_key_value_lines() {
    let dir = TempDir::new().unwrap();
    let broker = Broker::new(SnapshotConfig::with_root(dir.path()));
    let a = TestNode::spawn("alpha", dir.path()).await;
    let b = TestNode::spawn("beta", dir.path()).await;
    register(&broker, &a).await;
    register(&broker, &b).await;

    broker.set_key("foo", "1").await.unwrap();
    broker.set_key("bar", "2").await.unwrap();

    let lines = broker.get_all_data().await;
    assert_eq!(lines.len(), 2);
    assert!(lines.iter().any(|l| l.ends_with("Key: foo, Value: 1")));
    assert!(lines.iter().any(|l| l.ends_with("Key: bar, Value: 2")));
    assert!(lines.iter().all(|l| l.starts_with("Store: ")));
}

#[tokio::test]
async fn test_delete_removes_key_and_resets_load() {
    let dir = TempDir::new().unwrap();
    let broker = Broker::new(SnapshotConfig::with_root(dir.path()));
    let a = TestNode::spawn("alpha", dir.path()).await;
    let b = TestNode::spawn("beta", dir.path()).await;
    register(&broker, &a).await;
    register(&broker, &b).await;

    broker.set_key("foo", "1").await.unwrap();
    broker.set_key("bar", "2").await.unwrap();

    let owner = if a.store.get("foo").await.is_ok() {
        "alpha"
    } else {
        "beta"
    };

    broker.delete_key("foo").await.unwrap();

    assert!(broker.get_key("foo").await.is_err());
    assert_eq!(broker.loads().await[owner], 0);

    // Deleting again reports not-found.
    assert!(broker.delete_key("foo").await.is_err());

    // The other key is untouched.
    assert_eq!(broker.get_key("bar").await.unwrap(), "2");
}

#[tokio::test]
async fn test_enable_periodic_snapshots_through_broker() {
    let dir = TempDir::new().unwrap();
    let broker = Broker::new(SnapshotConfig::with_root(dir.path()));
    let a = TestNode::spawn("alpha", dir.path()).await;
    register(&broker, &a).await;
    a.store.set("k", "v").await.unwrap();

    broker.enable_periodic_snapshots("alpha", 1).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    a.store.stop_periodic_snapshots().await;

    let path = SnapshotConfig::with_root(dir.path()).store_snapshot("alpha");
    assert!(path.exists());

    // Unknown stores are rejected.
    assert!(broker.enable_periodic_snapshots("ghost", 1).await.is_err());
}

#[tokio::test]
async fn test_manual_snapshot_fanout_reports_per_store_results() {
    let dir = TempDir::new().unwrap();
    let broker = Broker::new(SnapshotConfig::with_root(dir.path()));
    let a = TestNode::spawn("alpha", dir.path()).await;
    let mut b = TestNode::spawn("beta", dir.path()).await;
    register(&broker, &a).await;
    register(&broker, &b).await;
    a.store.set("k", "v").await.unwrap();

    b.kill().await;
    let results = broker.manual_snapshot_fanout().await;

    assert_eq!(results.len(), 2);
    assert!(results.iter().find(|r| r.store == "alpha").unwrap().ok);
    assert!(!results.iter().find(|r| r.store == "beta").unwrap().ok);

    assert!(SnapshotConfig::with_root(dir.path())
        .store_snapshot("alpha")
        .exists());
}
