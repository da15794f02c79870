//! Topology routes - read-only views of the canonical graph

use axum::{Router, extract::State, response::Json as ResponseJson, routing::get};
use netpath::{EdgeKey, Node, TopologyHealth, TopologySnapshot};

use crate::{AppState, response::ApiResponse};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/topology", get(get_topology))
        .route("/topology/nodes/active", get(get_active_nodes))
        .route("/topology/nodes/failed", get(get_failed_nodes))
        .route("/topology/edges/failed", get(get_failed_edges))
        .route("/topology/health", get(get_health))
}

pub async fn get_topology(
    State(state): State<AppState>,
) -> ResponseJson<ApiResponse<TopologySnapshot>> {
    ResponseJson(ApiResponse::success(state.topology.snapshot().await))
}

pub async fn get_active_nodes(State(state): State<AppState>) -> ResponseJson<ApiResponse<Vec<Node>>> {
    ResponseJson(ApiResponse::success(state.topology.active_nodes().await))
}

pub async fn get_failed_nodes(State(state): State<AppState>) -> ResponseJson<ApiResponse<Vec<Node>>> {
    ResponseJson(ApiResponse::success(state.topology.failed_nodes().await))
}

pub async fn get_failed_edges(
    State(state): State<AppState>,
) -> ResponseJson<ApiResponse<Vec<EdgeKey>>> {
    ResponseJson(ApiResponse::success(state.topology.failed_edges().await))
}

pub async fn get_health(State(state): State<AppState>) -> ResponseJson<ApiResponse<TopologyHealth>> {
    ResponseJson(ApiResponse::success(state.topology.health().await))
}
