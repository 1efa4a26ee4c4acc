/* src/error.rs */

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use crate::types::iso_timestamp;

/// Result type alias for operations that may fail with [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while setting the service up.
#[derive(Error, Debug)]
pub enum Error {
    /// The outbound geolocation client could not be built.
    #[error("Failed to build geolocation client: {0}")]
    GeoClient(#[from] reqwest::Error),

    /// `BIND_ADDRESS` is not a socket address.
    #[error("Invalid bind address: {0}")]
    InvalidBindAddress(String),
}

/// Errors returned by the `/api/ip` endpoint.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiError {
    #[error("Invalid query parameters.")]
    InvalidQuery,

    #[error("Too many requests. Try again shortly.")]
    RateLimited { retry_after: u64 },

    #[error("Unable to detect a valid client IP from request headers.")]
    DetectionFailed,

    #[error("Only GET is supported on this endpoint.")]
    MethodNotAllowed,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidQuery => StatusCode::BAD_REQUEST,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::DetectionFailed => StatusCode::INTERNAL_SERVER_ERROR,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidQuery => "INVALID_QUERY",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::DetectionFailed => "IP_DETECTION_FAILED",
            Self::MethodNotAllowed => "METHOD_NOT_ALLOWED",
        }
    }
}

/// JSON body of every error response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    pub status_code: u16,
    pub timestamp: String,
}

impl From<&ApiError> for ErrorBody {
    fn from(err: &ApiError) -> Self {
        Self {
            error: err.code(),
            message: err.to_string(),
            status_code: err.status().as_u16(),
            timestamp: iso_timestamp(&Utc::now()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status(), Json(ErrorBody::from(&self))).into_response();

        if let Self::RateLimited { retry_after } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }

        response
    }
}
