//! Error types and HTTP response conversion.
//!
//! Every error response carries the JSON envelope
//! `{error, error_code, request_id, details?}` plus an `X-Request-ID`
//! header. Handlers return `Result<T, Error>`; `IntoResponse` attaches the
//! envelope (minus the trace id) to the response extensions, and the
//! request-id middleware in [`crate::api`] fills in `request_id` and the
//! header when the response leaves the service.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error as ThisError;

use crate::store::StoreError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Request body was not valid JSON
    #[error("invalid JSON body: {message}")]
    InvalidJson { message: String },

    /// Submission without a query
    #[error("query must not be empty")]
    MissingQuery,

    /// A required body field was absent
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    /// A required query parameter was absent
    #[error("missing required parameter: {param}")]
    MissingParam { param: &'static str },

    /// Invalid request data or business rule violation
    #[error("{message}")]
    InvalidRequest { message: String },

    /// Operation not legal for the entity's current state
    #[error("{message}")]
    InvalidStatus { message: String },

    /// Requested resource not found
    #[error("{resource} {id} not found")]
    NotFound { resource: &'static str, id: String },

    /// No route matches the request path
    #[error("route not found")]
    RouteNotFound,

    /// Resubmission of a terminal request id
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// Tenant exceeded its submission rate
    #[error("rate limit exceeded: {message}")]
    RateLimitExceeded { message: String },

    /// A provider bucket refused the request
    #[error("provider {provider} is rate limited")]
    ProviderRateLimit { provider: String },

    /// Upstream adapter did not answer in time
    #[error("gateway timeout: {message}")]
    GatewayTimeout { message: String },

    /// External workflow dispatch failed
    #[error("workflow error: {message}")]
    WorkflowError { message: String },

    /// Generic internal service error
    #[error("failed to {operation}")]
    Internal { operation: String },

    /// Durable store error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Routing engine error
    #[error(transparent)]
    Router(#[from] conductor::RouterError),
}

/// The wire shape of every error response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub error_code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidJson { .. }
            | Error::MissingQuery
            | Error::MissingField { .. }
            | Error::MissingParam { .. }
            | Error::InvalidRequest { .. }
            | Error::InvalidStatus { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } | Error::RouteNotFound => StatusCode::NOT_FOUND,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::RateLimitExceeded { .. } | Error::ProviderRateLimit { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            Error::GatewayTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Error::WorkflowError { .. } | Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Store(err) => match err {
                StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Router(err) => match err {
                conductor::RouterError::RequestNotFound(_) => StatusCode::NOT_FOUND,
                conductor::RouterError::InvalidState { .. } => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Stable machine-readable code for the envelope.
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::InvalidJson { .. } => "INVALID_JSON",
            Error::MissingQuery => "MISSING_QUERY",
            Error::MissingField { .. } => "MISSING_FIELD",
            Error::MissingParam { .. } => "MISSING_PARAM",
            Error::InvalidRequest { .. } => "INVALID_REQUEST",
            Error::InvalidStatus { .. } => "INVALID_STATUS",
            Error::NotFound { .. } => "NOT_FOUND",
            Error::RouteNotFound => "ROUTE_NOT_FOUND",
            Error::Conflict { .. } => "CONFLICT",
            Error::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            Error::ProviderRateLimit { .. } => "PROVIDER_RATE_LIMIT",
            Error::GatewayTimeout { .. } => "GATEWAY_TIMEOUT",
            Error::WorkflowError { .. } => "WORKFLOW_ERROR",
            Error::Internal { .. } => "INTERNAL_ERROR",
            Error::Store(err) => match err {
                StoreError::NotFound { .. } => "NOT_FOUND",
                _ => "INTERNAL_ERROR",
            },
            Error::Router(err) => match err {
                conductor::RouterError::RequestNotFound(_) => "NOT_FOUND",
                conductor::RouterError::InvalidState { .. } => "INVALID_STATUS",
                _ => "INTERNAL_ERROR",
            },
        }
    }

    /// User-safe message, without leaking internals on 5xx.
    pub fn user_message(&self) -> String {
        match self {
            Error::Internal { .. } | Error::Store(StoreError::Database(_)) => {
                "internal server error".to_string()
            }
            Error::Router(conductor::RouterError::Storage(_))
            | Error::Router(conductor::RouterError::DispatcherGone) => {
                "internal server error".to_string()
            }
            other => other.to_string(),
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.user_message(),
            error_code: self.error_code(),
            request_id: None,
            details: None,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Internal { .. } | Error::WorkflowError { .. } => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Store(err) if !matches!(err, StoreError::NotFound { .. }) => {
                tracing::error!("Store error: {:#}", self);
            }
            Error::Router(err) if !matches!(err, conductor::RouterError::RequestNotFound(_) | conductor::RouterError::InvalidState { .. }) => {
                tracing::error!("Router error: {:#}", self);
            }
            Error::RateLimitExceeded { .. } | Error::ProviderRateLimit { .. } => {
                tracing::info!("Rate limit exceeded: {}", self);
            }
            _ => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        let body = self.body();

        // The request-id middleware rewrites the body with the trace id; the
        // JSON here is the fallback for responses that bypass it.
        let mut response = (status, axum::Json(body.clone())).into_response();
        response.extensions_mut().insert(body);
        response
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_the_recognized_set() {
        assert_eq!(Error::MissingQuery.error_code(), "MISSING_QUERY");
        assert_eq!(
            Error::InvalidJson {
                message: "x".into()
            }
            .error_code(),
            "INVALID_JSON"
        );
        assert_eq!(Error::RouteNotFound.error_code(), "ROUTE_NOT_FOUND");
        assert_eq!(Error::RouteNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            Error::RateLimitExceeded {
                message: "x".into()
            }
            .status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn router_errors_map_to_envelope_codes() {
        let err = Error::Router(conductor::RouterError::RequestNotFound(uuid::Uuid::new_v4()));
        assert_eq!(err.error_code(), "NOT_FOUND");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let err = Error::Router(conductor::RouterError::InvalidState {
            id: uuid::Uuid::new_v4(),
            actual: "processing",
            expected: "pending or queued",
        });
        assert_eq!(err.error_code(), "INVALID_STATUS");
    }

    #[test]
    fn internal_errors_do_not_leak_details() {
        let err = Error::Internal {
            operation: "connect to secret backend at 10.0.0.1".to_string(),
        };
        assert_eq!(err.user_message(), "internal server error");
    }
}
