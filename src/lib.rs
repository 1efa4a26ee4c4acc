/* src/lib.rs */
//! # What's My IP
//!
//! A small HTTP service that tells callers which IP address it sees for them.
//! The address is taken from the headers set by an upstream reverse proxy,
//! classified by routing category and optionally enriched with geolocation.
//!
//! ## Features
//!
//! - Client address from `CF-Connecting-IP`, `X-Real-IP`, `X-Forwarded-For` and
//!   RFC 7239 `Forwarded`, in that order of trust
//! - Public / Private / CGNAT / Loopback / Link-Local classification
//! - Fixed-window, in-memory rate limiting per client
//! - Opt-in geolocation through ipapi.co, degrading to warnings on failure
//! - `GET /api/ip` in JSON or plain text
//!
//! ## Examples
//!
//! ### Basic Usage
//!
//! ```rust
//! use myip::{extractor::HeaderMap, ip::IpCategory, ip_category, pick_candidate};
//!
//! let mut headers = HeaderMap::new();
//! headers.insert("x-forwarded-for".to_string(), "100.64.3.4, 10.0.0.1".to_string());
//!
//! let candidate = pick_candidate(&headers);
//! // Every hop is non-public, so the leftmost one is reported.
//! assert_eq!(candidate.ip, "100.64.3.4");
//! assert_eq!(ip_category(&candidate.ip), IpCategory::Cgnat);
//! ```

pub mod api;
pub mod config;
pub mod detector;
pub mod error;
pub mod extractor;
pub mod geo;
pub mod ip;
pub mod middleware;
pub mod ratelimit;
pub mod types;

pub use api::{AppState, create_router};
pub use config::Config;
pub use detector::{IpDetector, is_valid_detection};
pub use error::{ApiError, Error, Result};
pub use extractor::{HeaderMap, pick_candidate, rate_limit_key};
pub use geo::{GeoError, GeoLookup, GeoProvider, IpApiProvider};
pub use ip::{detect_ip_version, ip_category, is_cgnat, is_private_ip, is_valid_ip, strip_port};
pub use middleware::{RateLimitLayer, RateLimitService};
pub use ratelimit::{RateLimitConfig, RateLimitDecision, RateLimiter};
pub use types::{DetectionSource, IpInfo};
