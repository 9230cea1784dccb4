use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use ingest_protocol::HttpErrorEnvelope;
use std::fmt::Display;

pub type HttpResult<T> = Result<T, GatewayError>;

/// The gateway's own error type for request handlers. Conversions from
/// `sqlx`/`durable_queue` errors live at the call site (`map_err`), since
/// each handler knows which status the failure deserves better than a
/// blanket `From` impl would.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn internal(err: impl Display) -> Self {
        Self::Internal(err.to_string())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message),
            Self::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };
        (status, Json(HttpErrorEnvelope::new(message))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn not_found_matches_frozen_error_envelope() {
        let response = GatewayError::NotFound("node ESP32_A not connected".to_owned()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "node ESP32_A not connected");
    }

    #[tokio::test]
    async fn bad_request_matches_frozen_error_envelope() {
        let response = GatewayError::BadRequest("unknown command".to_owned()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "unknown command");
    }
}
