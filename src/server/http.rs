//! Administrative HTTP surface.
//!
//! A parallel JSON view over a subset of the wire semantics, plus the
//! operational endpoints `/health`, `/ready` and `/metrics`. Handlers call
//! the same stores the wire commands do.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::{Error, Result};
use crate::server::AppState;
use crate::store::Predicate;

/// Bind and serve the admin surface until shutdown.
pub async fn serve(state: Arc<AppState>, shutdown: CancellationToken) -> Result<()> {
    let addr = format!("{}:{}", state.config.bind_addr, state.config.http_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "http listener bound");

    let app = router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .route("/stats", get(stats))
        .route("/cluster", get(cluster))
        .route("/keys/{key}", get(get_key).put(put_key).delete(delete_key))
        .route("/orderbook/{key}", get(order_book))
        .route(
            "/documents/{collection}/{id}",
            put(put_document).get(get_document).delete(delete_document),
        )
        .route("/documents/{collection}/query", post(query_documents))
        .route("/documents/{collection}/indexes", post(create_index))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

type HttpError = (StatusCode, Json<JsonValue>);

fn http_error(status: StatusCode, err: &Error) -> HttpError {
    (status, Json(json!({ "error": err.to_string() })))
}

fn map_error(err: Error) -> HttpError {
    match err {
        Error::NotFound => http_error(StatusCode::NOT_FOUND, &err),
        Error::WrongType | Error::Constraint(_) => http_error(StatusCode::BAD_REQUEST, &err),
        _ => http_error(StatusCode::INTERNAL_SERVER_ERROR, &err),
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn ready(State(state): State<Arc<AppState>>) -> Json<JsonValue> {
    Json(json!({ "ready": true, "keys": state.keyspace.len() }))
}

async fn metrics(State(state): State<Arc<AppState>>) -> String {
    let stats = state.keyspace.stats();
    let commands = state
        .stats
        .commands_total
        .load(std::sync::atomic::Ordering::Relaxed);
    let connections = state
        .stats
        .connections_total
        .load(std::sync::atomic::Ordering::Relaxed);
    format!(
        "fincache_keys {}\n\
         fincache_keyspace_hits {}\n\
         fincache_keyspace_misses {}\n\
         fincache_expired_keys {}\n\
         fincache_evicted_keys {}\n\
         fincache_memory_used_bytes {}\n\
         fincache_commands_total {}\n\
         fincache_connections_total {}\n\
         fincache_pubsub_channels {}\n\
         fincache_pubsub_delivered_total {}\n",
        stats.keys,
        stats.hits,
        stats.misses,
        stats.expired,
        stats.evictions,
        stats.memory_used,
        commands,
        connections,
        state.bus.channel_count(),
        state.bus.delivered_total(),
    )
}

async fn stats(State(state): State<Arc<AppState>>) -> Json<JsonValue> {
    Json(serde_json::to_value(state.keyspace.stats()).unwrap_or_default())
}

async fn cluster(State(state): State<Arc<AppState>>) -> Json<JsonValue> {
    Json(json!({
        "active": state.cluster.is_active(),
        "epoch": state.cluster.epoch(),
        "slots_assigned": state.cluster.slots_assigned(),
        "nodes": state.cluster.nodes(),
    }))
}

async fn get_key(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> std::result::Result<Json<JsonValue>, HttpError> {
    let value = state.keyspace.get(&key).map_err(map_error)?;
    Ok(Json(json!({
        "key": key,
        "value": String::from_utf8_lossy(&value),
        "ttl": state.keyspace.ttl(&key),
    })))
}

#[derive(Debug, Deserialize)]
struct PutKeyBody {
    value: String,
    #[serde(default)]
    ttl_seconds: Option<i64>,
}

async fn put_key(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(body): Json<PutKeyBody>,
) -> impl IntoResponse {
    let ttl = body.ttl_seconds.map(chrono::Duration::seconds);
    state.keyspace.set(&key, body.value.into(), ttl);
    StatusCode::NO_CONTENT
}

async fn delete_key(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Json<JsonValue> {
    let deleted = state.keyspace.delete(&[key.as_str()]);
    Json(json!({ "deleted": deleted }))
}

#[derive(Debug, Deserialize)]
struct DepthQuery {
    #[serde(default = "default_depth")]
    depth: usize,
}

fn default_depth() -> usize {
    10
}

async fn order_book(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Query(query): Query<DepthQuery>,
) -> std::result::Result<Json<JsonValue>, HttpError> {
    let view = state
        .keyspace
        .with_sorted(&key, |idx| {
            let (bids, asks) = idx.book_depth(query.depth);
            json!({
                "bids": bids.iter().map(|(m, s)| json!({ "member": m, "score": s })).collect::<Vec<_>>(),
                "asks": asks.iter().map(|(m, s)| json!({ "member": m, "score": s })).collect::<Vec<_>>(),
                "best_bid": idx.best_bid().map(|(m, s)| json!({ "member": m, "score": s })),
                "best_ask": idx.best_ask().map(|(m, s)| json!({ "member": m, "score": s })),
                "spread": idx.spread(),
            })
        })
        .map_err(map_error)?
        .ok_or_else(|| map_error(Error::NotFound))?;
    Ok(Json(view))
}

#[derive(Debug, Deserialize)]
struct PutDocumentQuery {
    #[serde(default)]
    ttl_seconds: Option<i64>,
}

async fn put_document(
    State(state): State<Arc<AppState>>,
    Path((collection, id)): Path<(String, String)>,
    Query(query): Query<PutDocumentQuery>,
    Json(body): Json<JsonValue>,
) -> std::result::Result<StatusCode, HttpError> {
    let ttl = query.ttl_seconds.map(chrono::Duration::seconds);
    state
        .keyspace
        .with_documents_mut(&collection, |store| store.set(&id, body, ttl))
        .map_err(map_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_document(
    State(state): State<Arc<AppState>>,
    Path((collection, id)): Path<(String, String)>,
) -> std::result::Result<Json<JsonValue>, HttpError> {
    let document = state
        .keyspace
        .with_documents(&collection, |store| {
            store.get(&id).map(|doc| serde_json::to_value(doc).unwrap_or_default())
        })
        .map_err(map_error)?
        .flatten()
        .ok_or_else(|| map_error(Error::NotFound))?;
    Ok(Json(document))
}

async fn delete_document(
    State(state): State<Arc<AppState>>,
    Path((collection, id)): Path<(String, String)>,
) -> std::result::Result<Json<JsonValue>, HttpError> {
    let deleted = state
        .keyspace
        .with_documents_mut(&collection, |store| Ok(store.delete(&id)))
        .map_err(map_error)?;
    Ok(Json(json!({ "deleted": deleted })))
}

#[derive(Debug, Deserialize)]
struct QueryBody {
    #[serde(default)]
    predicates: Vec<Predicate>,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_limit() -> usize {
    50
}

async fn query_documents(
    State(state): State<Arc<AppState>>,
    Path(collection): Path<String>,
    Json(body): Json<QueryBody>,
) -> std::result::Result<Json<JsonValue>, HttpError> {
    let hits = state
        .keyspace
        .with_documents(&collection, |store| {
            store
                .query(&body.predicates, body.limit, body.offset)
                .into_iter()
                .map(|doc| serde_json::to_value(doc).unwrap_or_default())
                .collect::<Vec<_>>()
        })
        .map_err(map_error)?
        .unwrap_or_default();
    Ok(Json(json!({ "count": hits.len(), "documents": hits })))
}

#[derive(Debug, Deserialize)]
struct IndexBody {
    field: String,
}

async fn create_index(
    State(state): State<Arc<AppState>>,
    Path(collection): Path<String>,
    Json(body): Json<IndexBody>,
) -> std::result::Result<StatusCode, HttpError> {
    state
        .keyspace
        .with_documents_mut(&collection, |store| {
            store.create_index(&body.field);
            Ok(())
        })
        .map_err(map_error)?;
    Ok(StatusCode::CREATED)
}
