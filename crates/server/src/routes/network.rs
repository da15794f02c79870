//! Network routes - operator and simulator control of the simulated network
//!
//! Every change lands in the simulator first; node changes then reach the
//! topology core through an immediate heartbeat.

use axum::{
    Router,
    extract::State,
    response::Json as ResponseJson,
    routing::{get, post},
};
use netpath::{EdgeKey, TopologyInit};
use serde::Deserialize;
use ts_rs::TS;

use crate::{AppState, error::ApiError, response::ApiResponse, simulator::SimulatorStatus};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/network/initialize", post(initialize))
        .route("/network/update-node", post(update_node))
        .route("/network/down", post(node_down))
        .route("/network/restore", post(restore_node))
        .route("/network/update-edge", post(update_edge))
        .route("/network/edge-down", post(edge_down))
        .route("/network/edge-restore", post(edge_restore))
        .route("/network/add-node", post(add_node))
        .route("/network/delete-node", post(delete_node))
        .route("/network/add-edge", post(add_edge))
        .route("/network/delete-edge", post(delete_edge))
        .route("/network/stop", post(stop))
        .route("/network/status", get(status))
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct NodeRequest {
    #[serde(alias = "id")]
    pub node_id: String,
}

#[derive(Debug, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNodeRequest {
    #[serde(alias = "id")]
    pub node_id: String,
    pub cpu: i64,
    pub latency: i64,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct AddNodeRequest {
    #[serde(alias = "nodeId")]
    pub id: String,
    pub cpu: i64,
    pub latency: i64,
}

#[derive(Debug, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct EdgeRequest {
    pub source: String,
    pub target: String,
}

impl EdgeRequest {
    fn key(&self) -> EdgeKey {
        EdgeKey::new(self.source.clone(), self.target.clone())
    }
}

#[derive(Debug, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEdgeRequest {
    pub source: String,
    pub target: String,
    pub status: Option<String>,
    pub latency: Option<i64>,
}

#[derive(Debug, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct AddEdgeRequest {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub latency: i64,
}

// ============================================================================
// Handlers
// ============================================================================

/// Load a network. The payload is validated here so malformed input is a 400.
pub async fn initialize(
    State(state): State<AppState>,
    ResponseJson(payload): ResponseJson<serde_json::Value>,
) -> Result<ResponseJson<ApiResponse<SimulatorStatus>>, ApiError> {
    let init = TopologyInit::from_value(payload)?;
    state.simulator.initialize(init).await?;
    let status = state.simulator.status().await;
    Ok(ResponseJson(ApiResponse::success_with_message(
        status,
        "Network initialized",
    )))
}

pub async fn update_node(
    State(state): State<AppState>,
    ResponseJson(request): ResponseJson<UpdateNodeRequest>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    state
        .simulator
        .update_node(
            &request.node_id,
            request.cpu,
            request.latency,
            request.status.as_deref(),
        )
        .await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

pub async fn node_down(
    State(state): State<AppState>,
    ResponseJson(request): ResponseJson<NodeRequest>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    state.simulator.node_down(&request.node_id).await?;
    Ok(ResponseJson(ApiResponse::success_with_message(
        (),
        format!("Node {} is down", request.node_id),
    )))
}

pub async fn restore_node(
    State(state): State<AppState>,
    ResponseJson(request): ResponseJson<NodeRequest>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    state.simulator.restore_node(&request.node_id).await?;
    Ok(ResponseJson(ApiResponse::success_with_message(
        (),
        format!("Node {} restored", request.node_id),
    )))
}

pub async fn update_edge(
    State(state): State<AppState>,
    ResponseJson(request): ResponseJson<UpdateEdgeRequest>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    let key = EdgeKey::new(request.source, request.target);
    state
        .simulator
        .update_edge(&key, request.status.as_deref(), request.latency)
        .await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

pub async fn edge_down(
    State(state): State<AppState>,
    ResponseJson(request): ResponseJson<EdgeRequest>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    let key = request.key();
    state.simulator.edge_down(&key).await?;
    Ok(ResponseJson(ApiResponse::success_with_message(
        (),
        format!("Edge {} is down", key),
    )))
}

pub async fn edge_restore(
    State(state): State<AppState>,
    ResponseJson(request): ResponseJson<EdgeRequest>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    let key = request.key();
    state.simulator.edge_restore(&key).await?;
    Ok(ResponseJson(ApiResponse::success_with_message(
        (),
        format!("Edge {} restored", key),
    )))
}

pub async fn add_node(
    State(state): State<AppState>,
    ResponseJson(request): ResponseJson<AddNodeRequest>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    state
        .simulator
        .add_node(&request.id, request.cpu, request.latency)
        .await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

pub async fn delete_node(
    State(state): State<AppState>,
    ResponseJson(request): ResponseJson<NodeRequest>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    state.simulator.delete_node(&request.node_id).await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

pub async fn add_edge(
    State(state): State<AppState>,
    ResponseJson(request): ResponseJson<AddEdgeRequest>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    let key = EdgeKey::new(request.source, request.target);
    state.simulator.add_edge(&key, request.latency).await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

pub async fn delete_edge(
    State(state): State<AppState>,
    ResponseJson(request): ResponseJson<EdgeRequest>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    state.simulator.delete_edge(&request.key()).await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

pub async fn stop(State(state): State<AppState>) -> ResponseJson<ApiResponse<SimulatorStatus>> {
    state.simulator.stop();
    ResponseJson(ApiResponse::success(state.simulator.status().await))
}

pub async fn status(State(state): State<AppState>) -> ResponseJson<ApiResponse<SimulatorStatus>> {
    ResponseJson(ApiResponse::success(state.simulator.status().await))
}
