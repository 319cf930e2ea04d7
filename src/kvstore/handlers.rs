//! KV-Store Node API Handlers
//!
//! HTTP endpoints that expose one `KvStore` shard to the broker and to its
//! ring predecessor. Handlers translate requests into store calls and map
//! errors onto status codes at the edge.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Extension, Query},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use sysinfo::System;

use super::protocol::{
    AckResponse, DeleteRequest, GetQuery, KeyValueResponse, LoadRequest, NameResponse,
    NodeStatsResponse, NotifyRequest, SetRequest, SnapshotIntervalQuery, StatusResponse,
    ENDPOINT_DELETE, ENDPOINT_GET, ENDPOINT_GET_ALL, ENDPOINT_LOAD, ENDPOINT_NAME,
    ENDPOINT_NOTIFY, ENDPOINT_PEER_BACKUP, ENDPOINT_PEER_DEAD, ENDPOINT_SAVE, ENDPOINT_SET,
    ENDPOINT_START_SNAPSHOTS, ENDPOINT_STATS,
};
use super::store::KvStore;
use crate::common::Error;

/// Assembles the node's HTTP surface around one shard.
pub fn router(store: Arc<KvStore>) -> Router {
    Router::new()
        .route(ENDPOINT_SET, post(handle_set))
        .route(ENDPOINT_GET, get(handle_get))
        .route(ENDPOINT_DELETE, post(handle_delete))
        .route(ENDPOINT_GET_ALL, get(handle_get_all))
        .route(ENDPOINT_NAME, get(handle_name))
        .route(ENDPOINT_NOTIFY, post(handle_notify))
        .route(ENDPOINT_PEER_DEAD, post(handle_peer_dead))
        .route(ENDPOINT_PEER_BACKUP, get(handle_peer_backup))
        .route(ENDPOINT_SAVE, post(handle_save))
        .route(ENDPOINT_LOAD, post(handle_load))
        .route(ENDPOINT_START_SNAPSHOTS, get(handle_start_snapshots))
        .route(ENDPOINT_STATS, get(handle_stats))
        .layer(Extension(store))
}

async fn handle_set(
    Extension(store): Extension<Arc<KvStore>>,
    Json(req): Json<SetRequest>,
) -> Response {
    match store.set(&req.key, &req.value).await {
        Ok(()) => Json(KeyValueResponse {
            key: req.key,
            value: req.value,
        })
        .into_response(),
        Err(e) => {
            tracing::error!("set failed: {}", e);
            e.into_response()
        }
    }
}

async fn handle_get(
    Extension(store): Extension<Arc<KvStore>>,
    Query(query): Query<GetQuery>,
) -> Response {
    match store.get(&query.key).await {
        Ok(value) => Json(KeyValueResponse {
            key: query.key,
            value,
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn handle_delete(
    Extension(store): Extension<Arc<KvStore>>,
    Json(req): Json<DeleteRequest>,
) -> Response {
    match store.delete(&req.key).await {
        Ok(()) => Json(StatusResponse {
            status: format!("key {} deleted", req.key),
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn handle_get_all(Extension(store): Extension<Arc<KvStore>>) -> Response {
    Json(store.get_all().await).into_response()
}

async fn handle_name(Extension(store): Extension<Arc<KvStore>>) -> Response {
    Json(NameResponse {
        name: store.name().to_string(),
    })
    .into_response()
}

/// Broker push: this node's successor changed.
async fn handle_notify(
    Extension(store): Extension<Arc<KvStore>>,
    Json(req): Json<NotifyRequest>,
) -> Response {
    store.set_successor(&req.peer_ip).await;
    Json(AckResponse {
        message: "Peer notified successfully".to_string(),
    })
    .into_response()
}

/// Broker push: this node's successor died. Merge the last pulled backup
/// into the local shard.
async fn handle_peer_dead(Extension(store): Extension<Arc<KvStore>>) -> Response {
    match store.load_and_merge_backup().await {
        Ok(()) => Json(StatusResponse {
            status: "Data successfully loaded from peer backup".to_string(),
        })
        .into_response(),
        Err(e) => {
            tracing::error!("peer backup merge failed: {}", e);
            e.into_response()
        }
    }
}

/// Serves a full copy of the shard to the pulling predecessor.
async fn handle_peer_backup(Extension(store): Extension<Arc<KvStore>>) -> Response {
    Json(store.get_all().await).into_response()
}

async fn handle_save(Extension(store): Extension<Arc<KvStore>>) -> Response {
    match store.save_snapshot().await {
        Ok(()) => Json(StatusResponse {
            status: "Data successfully saved to disk".to_string(),
        })
        .into_response(),
        Err(e) => {
            tracing::error!("snapshot save failed: {}", e);
            e.into_response()
        }
    }
}

async fn handle_load(
    Extension(store): Extension<Arc<KvStore>>,
    Json(req): Json<LoadRequest>,
) -> Response {
    match store.load_snapshot(&req.filename).await {
        Ok(()) => Json(StatusResponse {
            status: "Data successfully loaded from disk".to_string(),
        })
        .into_response(),
        Err(e) => {
            tracing::error!("snapshot load failed: {}", e);
            e.into_response()
        }
    }
}

async fn handle_start_snapshots(
    Extension(store): Extension<Arc<KvStore>>,
    Query(query): Query<SnapshotIntervalQuery>,
) -> Response {
    if query.interval == 0 {
        return Error::ClientError("interval must be a positive number of seconds".to_string())
            .into_response();
    }
    store
        .clone()
        .start_periodic_snapshots(Duration::from_secs(query.interval))
        .await;
    Json(StatusResponse {
        status: "Periodic snapshots started".to_string(),
    })
    .into_response()
}

async fn handle_stats(Extension(store): Extension<Arc<KvStore>>) -> Response {
    let mut sys = System::new_all();
    sys.refresh_cpu();
    sys.refresh_memory();

    Json(NodeStatsResponse {
        name: store.name().to_string(),
        keys: store.key_count().await,
        successor: store.successor().await,
        cpu_usage: sys.global_cpu_info().cpu_usage(),
        mem_used_mb: sys.used_memory() / (1024 * 1024),
        mem_total_mb: sys.total_memory() / (1024 * 1024),
    })
    .into_response()
}
