use std::net::SocketAddr;

use kvcluster::broker::handlers;
use kvcluster::broker::service::Broker;
use kvcluster::common::SnapshotConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let bind_addr: SocketAddr = std::env::var("BROKER_BIND")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        .parse()?;

    let broker = Broker::new(SnapshotConfig::from_env());
    if let Err(e) = broker.load_broker_snapshot().await {
        tracing::warn!("could not load broker snapshot: {}", e);
    }

    let app = handlers::router(broker);

    tracing::info!("Starting broker web server on {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
