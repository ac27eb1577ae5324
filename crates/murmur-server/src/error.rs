use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::auth::AuthError;
use crate::ingest::IngestError;
use crate::store::StoreCallError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Unauthorized: {0}")]
    Unauthenticated(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Attachment too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Attachment storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::PayloadTooLarge { .. } => {
                (StatusCode::PAYLOAD_TOO_LARGE, self.to_string())
            }
            ServerError::Store(detail) => {
                tracing::error!(error = %detail, "Store failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "Store error".to_string())
            }
            ServerError::Storage(detail) => {
                tracing::error!(error = %detail, "Attachment storage failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Attachment storage error".to_string(),
                )
            }
            ServerError::Internal(detail) => {
                tracing::error!(error = %detail, "Internal failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<IngestError> for ServerError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::EmptyMessage
            | IngestError::SelfAddressed
            | IngestError::RecipientNotFound(_) => ServerError::BadRequest(err.to_string()),
            IngestError::ResolveFailed(e) | IngestError::PersistFailed(e) => ServerError::Store(e),
            IngestError::AttachmentStoreFailed(e) => ServerError::Storage(e),
        }
    }
}

impl From<AuthError> for ServerError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingToken | AuthError::InvalidToken(_) | AuthError::Expired => {
                ServerError::Unauthenticated(err.to_string())
            }
            AuthError::InvalidCredentials => ServerError::Unauthenticated(err.to_string()),
            AuthError::Key(_) | AuthError::Hash(_) | AuthError::Signing(_) => {
                ServerError::Internal(err.to_string())
            }
        }
    }
}

impl From<StoreCallError> for ServerError {
    fn from(err: StoreCallError) -> Self {
        ServerError::Store(err.to_string())
    }
}
