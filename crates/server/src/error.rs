use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use netpath::NetpathError;
use thiserror::Error;

use crate::response::ApiResponse;

#[derive(Debug, Error, ts_rs::TS)]
#[ts(type = "string")]
pub enum ApiError {
    #[error(transparent)]
    Netpath(#[from] NetpathError),
    #[error("Bad Request: {0}")]
    BadRequest(String),
    #[error("Not Found: {0}")]
    NotFound(String),
    #[error("Internal Server Error: {0}")]
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status_code = match &self {
            ApiError::Netpath(err) => match err {
                NetpathError::Validation(_) => StatusCode::BAD_REQUEST,
                NetpathError::NotFound(_) => StatusCode::NOT_FOUND,
                NetpathError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                NetpathError::ChannelClosed(_) => StatusCode::SERVICE_UNAVAILABLE,
                NetpathError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let error_message = match &self {
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::NotFound(msg) => msg.clone(),
            ApiError::InternalError(msg) => msg.clone(),
            ApiError::Netpath(err) => err.to_string(),
        };

        if status_code.is_server_error() {
            tracing::error!("{}", error_message);
        }

        let response = ApiResponse::<()>::error(&error_message);
        (status_code, Json(response)).into_response()
    }
}
