//! REST API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use devscope_core::{Level, NodeId};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::state::AppState;

/// API error response
#[derive(Serialize)]
struct ApiError {
    error: String,
}

impl ApiError {
    fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

fn not_found(msg: impl Into<String>) -> Response {
    (StatusCode::NOT_FOUND, Json(ApiError::new(msg))).into_response()
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
    uptime_secs: i64,
    devices: usize,
    endpoints: usize,
    advertisements: usize,
}

/// Liveness and a few index counters
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let indexer = &state.indexer;
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: (Utc::now() - state.started).num_seconds(),
        devices: indexer.count(Level::Device).await,
        endpoints: indexer.count(Level::Endpoint).await,
        advertisements: indexer.count(Level::Advertisement).await,
    })
}

/// Feeds and their status
pub async fn list_feeds(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.indexer.feed_status().await)
}

/// Full tree snapshot
pub async fn get_tree(State(state): State<Arc<AppState>>) -> Response {
    match state.indexer.snapshot().await {
        Some(snapshot) => Json(snapshot).into_response(),
        None => not_found("Index is empty"),
    }
}

/// A single node
pub async fn get_node(State(state): State<Arc<AppState>>, Path(id): Path<u64>) -> Response {
    match state.indexer.node(NodeId(id)).await {
        Some(node) => Json(node).into_response(),
        None => not_found("Node not found"),
    }
}

/// Children of a node, sorted by name
pub async fn get_children(State(state): State<Arc<AppState>>, Path(id): Path<u64>) -> Response {
    match state.indexer.children_of(NodeId(id)).await {
        Some(children) => Json(children).into_response(),
        None => not_found("Node not found"),
    }
}

/// Property grid rows of a node
pub async fn get_properties(State(state): State<Arc<AppState>>, Path(id): Path<u64>) -> Response {
    match state.indexer.properties(NodeId(id)).await {
        Some(properties) => Json(properties).into_response(),
        None => not_found("Node not found"),
    }
}

#[derive(Serialize)]
struct Loaded {
    first_load: bool,
}

/// Mark a node's children as loaded, as a tree view does on first expand
pub async fn load_children(State(state): State<Arc<AppState>>, Path(id): Path<u64>) -> Response {
    match state.indexer.ensure_children_loaded(NodeId(id)).await {
        Ok(first_load) => {
            debug!(node = id, first_load, "Children loaded");
            Json(Loaded { first_load }).into_response()
        }
        Err(devscope_discovery::IndexerError::UnknownNode(_)) => not_found("Node not found"),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiError::new(e.to_string())),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::server::router;
    use crate::state::AppState;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use devscope_core::{guids, Level, NameTables, PropertyBag};
    use devscope_discovery::{
        keys, ChannelFeed, DiscoveryFeed, FeedDomain, FeedHandle, Indexer, StaticDeviceInfo,
    };
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn state() -> (Arc<AppState>, FeedHandle) {
        let (feed, handle) = ChannelFeed::new(FeedDomain::Devices, "devices");
        let feeds: Vec<Arc<dyn DiscoveryFeed>> = vec![Arc::new(feed)];
        let indexer = Indexer::start(
            Default::default(),
            Arc::new(NameTables::builtin()),
            Arc::new(StaticDeviceInfo::new()),
            feeds,
        )
        .await
        .unwrap();
        (AppState::with_indexer(Arc::new(indexer), Config::default()), handle)
    }

    async fn get(state: &Arc<AppState>, uri: &str) -> (StatusCode, Value) {
        let response = router(state.clone())
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _handle) = state().await;
        let (status, body) = get(&state, "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["devices"], 0);
    }

    #[tokio::test]
    async fn test_unknown_node_is_404() {
        let (state, _handle) = state().await;
        let (status, body) = get(&state, "/api/nodes/4242").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Node not found");
    }

    #[tokio::test]
    async fn test_children_sorted() {
        let (state, handle) = state().await;
        for (id, name) in [("d1", "zeta"), ("d2", "Alpha"), ("d3", "mid")] {
            let props = PropertyBag::new()
                .with(keys::CLASS_GUID, guids::DEVCLASS_USB)
                .with(keys::ITEM_NAME_DISPLAY, name);
            handle.appeared(id, props);
        }
        state.indexer.flush().await.unwrap();

        let group = state
            .indexer
            .find(Level::ClassGroup, &guids::DEVCLASS_USB.to_string())
            .await
            .unwrap();
        let (status, body) = get(&state, &format!("/api/nodes/{}/children", group)).await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|n| n["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["Alpha", "mid", "zeta"]);

        let device = state.indexer.find(Level::Device, "d2").await.unwrap();
        let (_, props) = get(&state, &format!("/api/nodes/{}/properties", device)).await;
        assert_eq!(props[0]["name"], "Id");
        assert_eq!(props[0]["value"], "d2");
    }

    #[tokio::test]
    async fn test_tree_and_feeds() {
        let (state, _handle) = state().await;
        let (status, tree) = get(&state, "/api/tree").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(tree["level"], "root");
        assert_eq!(tree["children"].as_array().unwrap().len(), 2);

        let (_, feeds) = get(&state, "/api/feeds").await;
        assert_eq!(feeds[0]["name"], "devices");
        assert_eq!(feeds[0]["status"]["state"], "running");
    }

    #[tokio::test]
    async fn test_load_children() {
        let (state, _handle) = state().await;
        let root = state.indexer.root().await;
        let request = Request::builder()
            .method("POST")
            .uri(format!("/api/nodes/{}/load", root))
            .body(Body::empty())
            .unwrap();
        let response = router(state.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["first_load"], true);
    }
}
