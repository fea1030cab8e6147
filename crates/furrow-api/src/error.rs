//! API error types and JSON error response formatting.
//!
//! ApiError provides a consistent JSON error response format across all
//! endpoints, mapping core errors to HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use furrow_core::error::FurrowError;
use furrow_vector::EmbeddingProvider;

/// JSON error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "bad_request", "not_found").
    pub error: String,
    /// Human-readable error message.
    pub message: String,
    /// Optional structured details about the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// API error type that maps to HTTP status codes and JSON responses.
#[derive(Debug)]
pub enum ApiError {
    /// 400 Bad Request - missing or invalid parameters.
    BadRequest(String),
    /// 404 Not Found - resource does not exist.
    NotFound(String),
    /// 422 Unprocessable Entity - valid syntax but semantic validation failure.
    UnprocessableEntity(String),
    /// 500 Internal Server Error - unexpected server error.
    Internal(String),
    /// 503 Service Unavailable - an embedding backend cannot serve the request.
    ServiceUnavailable {
        message: String,
        details: Option<serde_json::Value>,
    },
}

impl ApiError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        ApiError::ServiceUnavailable {
            message: message.into(),
            details: None,
        }
    }

    /// Map a text-embedding failure, naming the provider configuration so a
    /// client can tell a missing credential from a transient failure.
    pub fn from_provider(err: FurrowError, provider: &EmbeddingProvider) -> Self {
        let provider_config = provider.configured().as_str();
        let provider_active = provider.active().as_str();
        match err {
            FurrowError::MissingCredential { mode, variable } => ApiError::ServiceUnavailable {
                message: "Embedding provider unavailable".to_string(),
                details: Some(json!({
                    "reason": format!("{} not set but provider is '{}'", variable, mode),
                    "provider_config": provider_config,
                    "provider_active": provider_active,
                    "suggestion": format!(
                        "Set {} or use EMBEDDING_PROVIDER=auto to fall back to local embeddings",
                        variable
                    ),
                })),
            },
            FurrowError::ProviderUnavailable(msg) => ApiError::ServiceUnavailable {
                message: "Embedding provider unavailable".to_string(),
                details: Some(json!({
                    "reason": "Failed to generate embedding",
                    "error": msg,
                    "provider_config": provider_config,
                    "provider_active": provider_active,
                })),
            },
            FurrowError::EmptyInput => ApiError::ServiceUnavailable {
                message: "Embedding provider unavailable".to_string(),
                details: Some(json!({
                    "reason": "Empty query",
                    "provider_config": provider_config,
                    "provider_active": provider_active,
                })),
            },
            other => other.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg, None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg, None),
            ApiError::UnprocessableEntity(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "unprocessable_entity",
                msg,
                None,
            ),
            ApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg, None)
            }
            ApiError::ServiceUnavailable { message, details } => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                message,
                details,
            ),
        };

        let body = ErrorBody {
            error: error_code.to_string(),
            message,
            details,
        };

        (status, Json(body)).into_response()
    }
}

impl From<FurrowError> for ApiError {
    fn from(err: FurrowError) -> Self {
        match err {
            FurrowError::NotFound(msg) => ApiError::NotFound(msg),
            FurrowError::InvalidInput(msg) | FurrowError::Image(msg) => {
                ApiError::UnprocessableEntity(msg)
            }
            FurrowError::EmptyInput => ApiError::BadRequest("Empty input".to_string()),
            FurrowError::MissingCredential { mode, variable } => ApiError::ServiceUnavailable {
                message: format!("{} not set but provider is '{}'", variable, mode),
                details: None,
            },
            FurrowError::ProviderUnavailable(msg) => ApiError::unavailable(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}
