//! Path routes - compute and inspect ranked routes between node pairs

use axum::{
    Router,
    extract::{Query, State},
    response::Json as ResponseJson,
    routing::{get, post},
};
use indexmap::IndexMap;
use netpath::{PathCandidate, PathSet, WeightConfig};
use serde::Deserialize;
use ts_rs::TS;

use crate::{AppState, error::ApiError, response::ApiResponse};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/paths/calculate", post(calculate))
        .route("/paths/batch", post(calculate_batch))
        .route("/paths/active", get(get_active))
        .route("/paths/primary", get(get_primary))
        .route("/paths/backup", get(get_backups))
}

#[derive(Debug, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct CalculatePathsRequest {
    pub source: String,
    pub destination: String,
    pub weights: Option<WeightConfig>,
}

#[derive(Debug, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct BatchPathsRequest {
    /// Source node id to destination node ids
    #[ts(type = "Record<string, Array<string>>")]
    pub pairs: IndexMap<String, Vec<String>>,
    pub weights: Option<WeightConfig>,
}

#[derive(Debug, Deserialize)]
pub struct PairQuery {
    pub source: Option<String>,
    pub destination: Option<String>,
}

pub async fn calculate(
    State(state): State<AppState>,
    ResponseJson(request): ResponseJson<CalculatePathsRequest>,
) -> Result<ResponseJson<ApiResponse<PathSet>>, ApiError> {
    let set = state
        .topology
        .compute_paths(&request.source, &request.destination, request.weights)
        .await?;
    let message = if set.is_empty() {
        format!("No path from {} to {}", request.source, request.destination)
    } else {
        format!("{} paths found", set.candidates.len())
    };
    Ok(ResponseJson(ApiResponse::success_with_message(set, message)))
}

pub async fn calculate_batch(
    State(state): State<AppState>,
    ResponseJson(request): ResponseJson<BatchPathsRequest>,
) -> Result<ResponseJson<ApiResponse<Vec<PathSet>>>, ApiError> {
    if request.pairs.is_empty() {
        return Err(ApiError::BadRequest("pairs must not be empty".to_string()));
    }
    let sets = state
        .topology
        .compute_batch(&request.pairs, request.weights)
        .await?;
    Ok(ResponseJson(ApiResponse::success(sets)))
}

/// Active path sets, or the one for `?source=&destination=`
pub async fn get_active(
    State(state): State<AppState>,
    Query(query): Query<PairQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<PathSet>>>, ApiError> {
    match (query.source, query.destination) {
        (Some(source), Some(destination)) => {
            let set = state
                .topology
                .active_paths(&source, &destination)
                .await
                .ok_or_else(|| {
                    ApiError::NotFound(format!("No active paths for {}->{}", source, destination))
                })?;
            Ok(ResponseJson(ApiResponse::success(vec![set])))
        }
        (None, None) => Ok(ResponseJson(ApiResponse::success(
            state.topology.all_active_paths().await,
        ))),
        _ => Err(ApiError::BadRequest(
            "source and destination must be given together".to_string(),
        )),
    }
}

pub async fn get_primary(
    State(state): State<AppState>,
) -> ResponseJson<ApiResponse<Vec<PathCandidate>>> {
    ResponseJson(ApiResponse::success(state.topology.primary_paths().await))
}

pub async fn get_backups(
    State(state): State<AppState>,
) -> ResponseJson<ApiResponse<Vec<PathCandidate>>> {
    ResponseJson(ApiResponse::success(state.topology.backup_paths().await))
}
