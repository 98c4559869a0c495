use crate::circuit_breaker::CircuitStatus;
use crate::rate_limiter::RateLimitDecision;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

/// Classified failure of a guarded call.
///
/// `RateLimited` and `CircuitOpen` are raised before the backend is touched;
/// `ExternalFailure` means it was tried and every attempt failed.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("rate limit exceeded")]
    RateLimited(RateLimitDecision),

    #[error("circuit breaker is open")]
    CircuitOpen(CircuitStatus),

    #[error("external service failure: {0}")]
    ExternalFailure(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    /// Stable code clients can branch on.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::RateLimited(_) => "RATE_LIMITED",
            GatewayError::CircuitOpen(_) => "CIRCUIT_OPEN",
            GatewayError::ExternalFailure(_) => "EXTERNAL_FAILURE",
            GatewayError::Validation(_) => "VALIDATION_ERROR",
            GatewayError::Configuration(_) => "CONFIGURATION_ERROR",
            GatewayError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::CircuitOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::ExternalFailure(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::Configuration(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            GatewayError::RateLimited(decision) => Some(json!({
                "limit": decision.limit,
                "remaining": decision.remaining,
                "resetAt": decision.reset_at,
            })),
            GatewayError::CircuitOpen(status) => Some(json!({ "circuitBreakerStatus": status })),
            GatewayError::ExternalFailure(detail) => Some(json!({ "details": detail })),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorBody,
}

impl ErrorResponse {
    pub fn from_gateway_error(err: &GatewayError) -> Self {
        let message = match err {
            GatewayError::RateLimited(_) => "Too many requests, please retry later".to_string(),
            GatewayError::CircuitOpen(_) => {
                "Spreadsheet backend is temporarily unavailable, please retry later".to_string()
            }
            other => other.to_string(),
        };
        Self {
            success: false,
            error: ErrorBody {
                code: err.code(),
                message,
                details: err.details(),
            },
        }
    }
}

/// `X-RateLimit-*` headers for an admission decision.
pub fn rate_limit_headers(decision: &RateLimitDecision) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(decision.reset_epoch_secs()));
    headers
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse::from_gateway_error(&self);
        let mut response = (status, Json(body)).into_response();

        if let GatewayError::RateLimited(decision) = &self {
            response.headers_mut().extend(rate_limit_headers(decision));
            response
                .headers_mut()
                .insert("retry-after", HeaderValue::from(decision.retry_after));
        }
        response
    }
}

/// Failure writing or reading the audit log. Never becomes the primary
/// result of a guarded call.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit log I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("audit entry could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Failure of the spreadsheet backend itself.
#[derive(Debug, Error)]
pub enum SheetsError {
    #[error("sheet write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("sheet rejected the row: {0}")]
    Rejected(String),
}
