//! Maps core errors to JSON `{ "error": ... }` responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use clara_core::knowledge::KnowledgeError;
use clara_core::SessionError;
use serde_json::json;

#[derive(Debug)]
pub enum ApiError {
    Session(SessionError),
    Knowledge(KnowledgeError),
    BadRequest(String),
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        ApiError::Session(e)
    }
}

impl From<KnowledgeError> for ApiError {
    fn from(e: KnowledgeError) -> Self {
        ApiError::Knowledge(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Session(SessionError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Session(SessionError::NotActive(_)) => StatusCode::CONFLICT,
            ApiError::Session(SessionError::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            ApiError::Session(SessionError::TranscriptionUnavailable) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Session(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Knowledge(KnowledgeError::EmptyDocument) => StatusCode::BAD_REQUEST,
            ApiError::Knowledge(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Session(e) => e.to_string(),
            ApiError::Knowledge(e) => e.to_string(),
            ApiError::BadRequest(m) => m.clone(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{} {}", status, self.message());
        }
        (status, Json(json!({ "error": self.message() }))).into_response()
    }
}
