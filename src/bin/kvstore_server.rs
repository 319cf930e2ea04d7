use std::time::Duration;

use anyhow::Context;
use kvcluster::broker::protocol::RegisterRequest;
use kvcluster::common::SnapshotConfig;
use kvcluster::kvstore::handlers;
use kvcluster::kvstore::store::KvStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: {} <name> <port>", args[0]);
        std::process::exit(1);
    }
    let name = args[1].clone();
    let port = args[2].clone();
    let address = format!("localhost:{}", port);

    let broker_url =
        std::env::var("BROKER_URL").context("BROKER_URL environment variable not set")?;

    let store = KvStore::new(&name, &address, SnapshotConfig::from_env());
    let app = handlers::router(store.clone());

    // Serve before registering: the broker notifies the ring (including
    // this node) while it handles the registration.
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    tracing::info!("Starting KVStore {} web server on {}", name, address);
    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    register_with_broker(&broker_url, &name, &address).await?;

    tokio::select! {
        result = server => {
            result??;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            store.stop_periodic_snapshots().await;
        }
    }

    Ok(())
}

/// Announces this node to the broker. Registration failure is fatal: an
/// unregistered node never receives traffic or a successor.
async fn register_with_broker(broker_url: &str, name: &str, address: &str) -> anyhow::Result<()> {
    let payload = RegisterRequest {
        name: name.to_string(),
        ip_address: address.to_string(),
    };
    let response = reqwest::Client::new()
        .post(broker_url)
        .json(&payload)
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .context("failed to reach broker")?;

    anyhow::ensure!(
        response.status().is_success(),
        "failed to register with broker, status code: {}",
        response.status()
    );
    Ok(())
}
