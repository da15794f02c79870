//! Alert routes - listing, acknowledgement and live WebSocket fan-out

use axum::{
    Router,
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::{Json as ResponseJson, Response},
    routing::{get, post},
};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::{AppState, alerts::Alert, error::ApiError, response::ApiResponse};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/alerts", get(list_alerts))
        .route("/alerts/{id}/ack", post(acknowledge_alert))
        .route("/ws/alerts", get(alerts_ws))
}

pub async fn list_alerts(State(state): State<AppState>) -> ResponseJson<ApiResponse<Vec<Alert>>> {
    ResponseJson(ApiResponse::success(state.alerts.list()))
}

pub async fn acknowledge_alert(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Alert>>, ApiError> {
    let alert = state
        .alerts
        .acknowledge(id)
        .ok_or_else(|| ApiError::NotFound(format!("Alert {} not found", id)))?;
    Ok(ResponseJson(ApiResponse::success(alert)))
}

/// WebSocket upgrade handler streaming every new alert
pub async fn alerts_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_alerts_socket(socket, state))
}

async fn handle_alerts_socket(socket: WebSocket, state: AppState) {
    let mut rx = state.alerts.subscribe();
    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        loop {
            let alert = match rx.recv().await {
                Ok(alert) => alert,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Alert socket lagged, skipped {} alerts", skipped);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let text = match serde_json::to_string(&alert) {
                Ok(t) => t,
                Err(_) => continue,
            };

            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Clients only listen; drain until they close
    loop {
        tokio::select! {
            _ = &mut send_task => break,
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    tracing::warn!("WebSocket receive error: {}", e);
                    break;
                }
            },
        }
    }

    send_task.abort();
    tracing::debug!("Alert socket closed");
}
