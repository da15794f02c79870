use axum::{
    Router, middleware,
    routing::{IntoMakeService, get},
};
use tower_http::cors::CorsLayer;

use crate::{AppState, middleware as app_middleware};

pub mod alerts;
pub mod health;
pub mod network;
pub mod paths;
pub mod topology;

/// The full application with state applied
pub fn app(state: AppState) -> Router {
    let base_routes = Router::new()
        .merge(network::router())
        .merge(topology::router())
        .merge(paths::router())
        .merge(alerts::router())
        .layer(middleware::from_fn(app_middleware::request_id_middleware))
        .with_state(state);

    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api", base_routes)
        .layer(CorsLayer::permissive())
}

pub fn router(state: AppState) -> IntoMakeService<Router> {
    app(state).into_make_service()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
    };
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use crate::config::ServerConfig;

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    fn network() -> Value {
        json!({
            "nodes": [
                { "id": "A", "cpu": 4, "latency": 10 },
                { "id": "B", "cpu": 4, "latency": 10 },
                { "id": "C", "cpu": 4, "latency": 10 },
                { "id": "D", "cpu": 4, "latency": 150 }
            ],
            "edges": [
                { "source": "A", "target": "B", "latency": 1 },
                { "source": "B", "target": "C", "latency": 1 },
                { "source": "A", "target": "D", "latency": 1 },
                { "source": "D", "target": "C", "latency": 1 }
            ]
        })
    }

    async fn initialized() -> (AppState, Router) {
        let state = AppState::new(ServerConfig::default());
        let app = app(state.clone());
        let (status, _) = send(&app, Method::POST, "/api/network/initialize", Some(network())).await;
        assert_eq!(status, StatusCode::OK);
        (state, app)
    }

    #[tokio::test]
    async fn test_health() {
        let app = app(AppState::new(ServerConfig::default()));
        let (status, body) = send(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "ok");
    }

    #[tokio::test]
    async fn test_initialize_validation() {
        let app = app(AppState::new(ServerConfig::default()));
        let (status, body) =
            send(&app, Method::POST, "/api/network/initialize", Some(json!({ "edges": [] }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let (status, _) =
            send(&app, Method::POST, "/api/network/initialize", Some(json!({ "nodes": [] }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_topology_views() {
        let (_state, app) = initialized().await;
        let (status, body) = send(&app, Method::GET, "/api/topology", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["nodes"].as_array().unwrap().len(), 4);

        let (_, body) = send(&app, Method::GET, "/api/topology/health", None).await;
        assert_eq!(body["data"]["activeNodes"], 4);
    }

    #[tokio::test]
    async fn test_unknown_node_is_not_found() {
        let (_state, app) = initialized().await;
        let (status, _) =
            send(&app, Method::POST, "/api/network/down", Some(json!({ "nodeId": "Z" }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_node_down_reroutes_paths() {
        let (state, app) = initialized().await;
        let request = json!({
            "source": "A",
            "destination": "C",
            "weights": { "hop": 0.0, "cpu": 0.0, "latency": 1.0 }
        });
        let (status, body) = send(&app, Method::POST, "/api/paths/calculate", Some(request)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["candidates"][0]["path"], json!(["A", "B", "C"]));
        assert_eq!(body["data"]["candidates"][0]["pathType"], "PRIMARY");

        let (status, _) =
            send(&app, Method::POST, "/api/network/down", Some(json!({ "nodeId": "B" }))).await;
        assert_eq!(status, StatusCode::OK);
        state.topology.flush().await.unwrap();

        let (_, body) = send(&app, Method::GET, "/api/topology/nodes/failed", None).await;
        assert_eq!(body["data"][0]["id"], "B");

        let (status, body) =
            send(&app, Method::GET, "/api/paths/active?source=A&destination=C", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["candidates"][0]["path"], json!(["A", "D", "C"]));

        // the alert listener runs on its own task
        let mut alerts = Value::Null;
        for _ in 0..50 {
            let (_, body) = send(&app, Method::GET, "/api/alerts", None).await;
            if !body["data"].as_array().is_some_and(|a| a.is_empty()) {
                alerts = body["data"].clone();
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(alerts[0]["kind"], "FAILURE");
        assert_eq!(alerts[0]["subject"], "B");
    }

    #[tokio::test]
    async fn test_edge_down_and_restore() {
        let (state, app) = initialized().await;
        let edge = json!({ "source": "A", "target": "B" });

        send(&app, Method::POST, "/api/network/edge-down", Some(edge.clone())).await;
        state.topology.flush().await.unwrap();
        let (_, body) = send(&app, Method::GET, "/api/topology/edges/failed", None).await;
        assert_eq!(body["data"], json!(["A->B"]));

        let (status, _) = send(&app, Method::POST, "/api/network/edge-restore", Some(edge)).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = send(&app, Method::GET, "/api/topology/edges/failed", None).await;
        assert_eq!(body["data"], json!([]));
    }

    #[tokio::test]
    async fn test_path_request_validation() {
        let (_state, app) = initialized().await;
        let (status, _) = send(&app, Method::POST, "/api/paths/batch", Some(json!({ "pairs": {} }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, Method::GET, "/api/paths/active?source=A", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) =
            send(&app, Method::GET, "/api/paths/active?source=A&destination=C", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let batch = json!({ "pairs": { "A": ["C", "D"] } });
        let (status, body) = send(&app, Method::POST, "/api/paths/batch", Some(batch)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_alert_ack_is_not_found() {
        let (_state, app) = initialized().await;
        let uri = format!("/api/alerts/{}/ack", uuid::Uuid::new_v4());
        let (status, _) = send(&app, Method::POST, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
