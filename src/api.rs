/* src/api.rs */

//! `GET /api/ip`.
//!
//! Rate limiting runs as a route layer ahead of the handler, so a rejected
//! request never reaches query validation or detection. Every other method is
//! answered with a fixed `405` body.

use axum::{
    Json, Router,
    extract::{Query, State, rejection::QueryRejection},
    http::{
        HeaderMap,
        header::{CACHE_CONTROL, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS},
    },
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::detector::{IpDetector, is_valid_detection};
use crate::error::ApiError;
use crate::middleware::{RateLimitLayer, headers_to_map};
use crate::ratelimit::RateLimiter;
use crate::types::IpInfo;

pub const IP_ROUTE: &str = "/api/ip";
const NO_STORE: &str = "no-store, no-cache, must-revalidate";

/// Shared state for the handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub detector: Arc<IpDetector>,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(detector: IpDetector, limiter: RateLimiter) -> Self {
        Self {
            detector: Arc::new(detector),
            limiter: Arc::new(limiter),
        }
    }
}

/// Build the application router.
pub fn create_router(state: AppState) -> Router {
    let ip_route = get(ip_handler)
        .route_layer(RateLimitLayer::new(state.limiter.clone()))
        .fallback(method_not_allowed);

    Router::new()
        .route(IP_ROUTE, ip_route)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    #[default]
    Json,
    Text,
}

/// Query string of `GET /api/ip`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IpQuery {
    #[serde(default)]
    pub format: ResponseFormat,
    /// Comma-separated extras; `geo` requests geolocation.
    pub include: Option<String>,
}

impl IpQuery {
    pub fn include_geo(&self) -> bool {
        self.include
            .as_deref()
            .is_some_and(|include| include.split(',').any(|item| item.trim() == "geo"))
    }
}

async fn ip_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<IpQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query.map_err(|rejection| {
        debug!(error = %rejection, "Rejected query string");
        ApiError::InvalidQuery
    })?;

    let headers = headers_to_map(&headers);
    let info = state.detector.detect(&headers, query.include_geo()).await;

    if !is_valid_detection(&info) {
        warn!(source = %info.source, "No client address in request headers; check the reverse proxy");
        return Err(ApiError::DetectionFailed);
    }

    Ok(match query.format {
        ResponseFormat::Json => json_response(&info),
        ResponseFormat::Text => text_response(&info),
    })
}

async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

fn json_response(info: &IpInfo) -> Response {
    (
        [(CACHE_CONTROL, NO_STORE), (X_CONTENT_TYPE_OPTIONS, "nosniff")],
        Json(info),
    )
        .into_response()
}

fn text_response(info: &IpInfo) -> Response {
    (
        [
            (CONTENT_TYPE, "text/plain; charset=utf-8"),
            (CACHE_CONTROL, NO_STORE),
        ],
        render_text(info),
    )
        .into_response()
}

/// Plain-text summary served for `format=text`.
pub fn render_text(info: &IpInfo) -> String {
    let location = match &info.location {
        Some(location) => format!(
            "Location: {}, {}, {}",
            or_unknown(&location.city),
            or_unknown(&location.region),
            or_unknown(&location.country)
        ),
        None => "Location: Not requested".to_string(),
    };
    let isp = match &info.isp {
        Some(isp) => format!(
            "ISP: {} ({})",
            or_unknown(&isp.name),
            isp.asn.as_deref().unwrap_or("N/A")
        ),
        None => "ISP: Not requested".to_string(),
    };

    [
        format!("Your IP Address: {} ({})", info.ip, info.ip_version),
        location,
        isp,
        format!("Timestamp: {}", text_timestamp(&info.timestamp)),
    ]
    .join("\n")
}

/// `YYYY-MM-DD HH:MM:SS UTC`, keeping milliseconds only when they are non-zero.
fn text_timestamp(at: &DateTime<Utc>) -> String {
    if at.timestamp_subsec_millis() == 0 {
        at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
    } else {
        at.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string()
    }
}

fn or_unknown(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("Unknown")
}
