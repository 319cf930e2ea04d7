//! Broker API Handlers
//!
//! Client-facing HTTP endpoints. Handlers delegate to the `Broker` core and
//! map errors onto status codes at the edge; routing, takeover, and snapshot
//! logic all live in `service.rs`.

use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use sysinfo::System;

use super::protocol::{
    BrokerStatsResponse, DeleteKeyRequest, GetKeyQuery, GetKeyResponse, MessageResponse,
    PeriodicSnapshotRequest, RegisterRequest, SetKeyRequest, ENDPOINT_DELETE, ENDPOINT_GET,
    ENDPOINT_GET_ALL, ENDPOINT_LIST_STORES, ENDPOINT_REGISTER, ENDPOINT_SET,
    ENDPOINT_SNAPSHOT_MANUAL, ENDPOINT_SNAPSHOT_PERIODIC, ENDPOINT_STATS,
};
use super::service::Broker;

/// Assembles the broker's HTTP surface.
pub fn router(broker: Arc<Broker>) -> Router {
    Router::new()
        .route(ENDPOINT_REGISTER, post(handle_register))
        .route(ENDPOINT_SET, post(handle_set))
        .route(ENDPOINT_GET, get(handle_get))
        .route(ENDPOINT_DELETE, post(handle_delete))
        .route(ENDPOINT_GET_ALL, get(handle_get_all))
        .route(ENDPOINT_LIST_STORES, get(handle_list_stores))
        .route(ENDPOINT_SNAPSHOT_MANUAL, post(handle_manual_snapshot))
        .route(ENDPOINT_SNAPSHOT_PERIODIC, post(handle_periodic_snapshot))
        .route(ENDPOINT_STATS, get(handle_stats))
        .layer(Extension(broker))
}

async fn handle_register(
    Extension(broker): Extension<Arc<Broker>>,
    Json(req): Json<RegisterRequest>,
) -> Response {
    match broker.register_store(&req.name, &req.ip_address).await {
        Ok(()) => Json(MessageResponse {
            message: "Store registered successfully".to_string(),
        })
        .into_response(),
        Err(e) => {
            tracing::error!("registration of {} failed: {}", req.name, e);
            e.into_response()
        }
    }
}

async fn handle_set(
    Extension(broker): Extension<Arc<Broker>>,
    Json(req): Json<SetKeyRequest>,
) -> Response {
    match broker.set_key(&req.key, &req.value).await {
        Ok(()) => Json(MessageResponse {
            message: "Set operation successful".to_string(),
        })
        .into_response(),
        Err(e) => {
            tracing::error!("set of key {} failed: {}", req.key, e);
            e.into_response()
        }
    }
}

async fn handle_get(
    Extension(broker): Extension<Arc<Broker>>,
    Query(query): Query<GetKeyQuery>,
) -> Response {
    match broker.get_key(&query.key).await {
        Ok(value) => Json(GetKeyResponse {
            message: "Get operation successful".to_string(),
            value,
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn handle_delete(
    Extension(broker): Extension<Arc<Broker>>,
    Json(req): Json<DeleteKeyRequest>,
) -> Response {
    match broker.delete_key(&req.key).await {
        Ok(()) => Json(MessageResponse {
            message: format!("Key '{}' successfully deleted.", req.key),
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn handle_get_all(Extension(broker): Extension<Arc<Broker>>) -> Response {
    Json(broker.get_all_data().await).into_response()
}

async fn handle_list_stores(Extension(broker): Extension<Arc<Broker>>) -> Response {
    Json(broker.list_stores().await).into_response()
}

async fn handle_manual_snapshot(Extension(broker): Extension<Arc<Broker>>) -> Response {
    let results = broker.manual_snapshot_fanout().await;
    let succeeded = results.iter().filter(|r| r.ok).count();
    let failed = results.len() - succeeded;

    Json(MessageResponse {
        message: format!(
            "Manual snapshot finished: {} succeeded, {} failed",
            succeeded, failed
        ),
    })
    .into_response()
}

async fn handle_periodic_snapshot(
    Extension(broker): Extension<Arc<Broker>>,
    Json(req): Json<PeriodicSnapshotRequest>,
) -> Response {
    match broker
        .enable_periodic_snapshots(&req.storename, req.interval)
        .await
    {
        Ok(()) => Json(MessageResponse {
            message: format!(
                "Periodic snapshots enabled for store {} with interval {} seconds.",
                req.storename, req.interval
            ),
        })
        .into_response(),
        Err(e) => {
            tracing::error!(
                "enabling periodic snapshots on {} failed: {}",
                req.storename,
                e
            );
            e.into_response()
        }
    }
}

async fn handle_stats(Extension(broker): Extension<Arc<Broker>>) -> Response {
    let names = broker.list_stores().await;
    let loads = broker.loads().await;

    let mut sys = System::new_all();
    sys.refresh_cpu();
    sys.refresh_memory();

    Json(BrokerStatsResponse {
        stores: names.len(),
        names,
        loads,
        cpu_usage: sys.global_cpu_info().cpu_usage(),
        mem_used_mb: sys.used_memory() / (1024 * 1024),
        mem_total_mb: sys.total_memory() / (1024 * 1024),
    })
    .into_response()
}
