use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use compass_index::IndexError;
use compass_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to bind {0}: {1}")]
    Bind(String, std::io::Error),
    #[error("server error: {0}")]
    Server(String),
}

/// Error body returned by every `/api` handler.
#[derive(Debug)]
pub(crate) struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub(crate) fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub(crate) fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<IndexError> for ApiError {
    fn from(err: IndexError) -> Self {
        let status = match &err {
            IndexError::ProjectNotFound | IndexError::FileNotFound(_) => StatusCode::NOT_FOUND,
            IndexError::InvalidPath(_) | IndexError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            IndexError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            IndexError::Store(StoreError::Duplicate(_)) => StatusCode::CONFLICT,
            IndexError::MissingCredential => StatusCode::FAILED_DEPENDENCY,
            IndexError::Retrieval(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("request failed: {err}");
        }
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}
