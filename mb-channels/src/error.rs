use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Failures while handling an inbound webhook request.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// The body is not signed with the app secret. The reason is for logs
    /// only; callers get a generic message.
    #[error("webhook authentication failed: {0}")]
    Authentication(&'static str),

    #[error("verify token mismatch")]
    VerifyToken,

    /// The verify token matched but the handshake is incomplete.
    #[error("webhook handshake rejected: {0}")]
    Handshake(&'static str),

    #[error("invalid webhook payload: {0}")]
    Payload(String),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        match self {
            Self::Authentication(_) => (
                StatusCode::FORBIDDEN,
                Json(serde_json::json!({
                    "status": "error",
                    "error": "Error, wrong signature",
                })),
            )
                .into_response(),
            Self::VerifyToken => (
                StatusCode::UNAUTHORIZED,
                "Error, wrong validation token".to_string(),
            )
                .into_response(),
            Self::Handshake(reason) => (
                StatusCode::BAD_REQUEST,
                format!("Error, {reason}"),
            )
                .into_response(),
            Self::Payload(message) => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "status": "error",
                    "error": format!("invalid messenger webhook payload: {message}"),
                })),
            )
                .into_response(),
        }
    }
}
